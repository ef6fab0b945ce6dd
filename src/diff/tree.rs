//! File-tree classification.
//!
//! Entries are matched by their path relative to the scope root:
//! - only in before: deleted
//! - only in after: added
//! - in both with different kind, size or content hash: modified
//! - otherwise: unchanged

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::capture::archive::entry_name;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Device-side modification time carried through the archive. Files only;
    /// directories are not archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_date: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffResult {
    pub added: Vec<FileEntry>,
    pub deleted: Vec<FileEntry>,
    /// After-side entries.
    pub modified: Vec<FileEntry>,
    pub unchanged: Vec<FileEntry>,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty())
    }
}

pub type Tree = BTreeMap<String, FileEntry>;

/// Walk `root` and describe every file and directory below it.
pub fn scan_tree(root: &Path) -> Result<Tree> {
    let mut tree = Tree::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name().follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let Some(path) = entry_name(root, entry.path()) else {
            continue;
        };
        let metadata = entry.metadata().map_err(io::Error::from)?;
        let is_directory = metadata.is_dir();

        let (hash, modified_date) = if metadata.is_file() {
            let modified = metadata
                .modified()
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339_opts(SecondsFormat::Secs, true));
            (Some(hash_file(entry.path())?), modified)
        } else {
            (None, None)
        };

        tree.insert(
            path.clone(),
            FileEntry {
                path,
                size: if is_directory { 0 } else { metadata.len() },
                is_directory,
                hash,
                modified_date,
            },
        );
    }

    Ok(tree)
}

fn hash_file(path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn classify(before: &Tree, after: &Tree) -> DiffResult {
    let mut result = DiffResult::default();

    for (path, old) in before {
        match after.get(path) {
            None => result.deleted.push(old.clone()),
            Some(new) if differs(old, new) => result.modified.push(new.clone()),
            Some(new) => result.unchanged.push(new.clone()),
        }
    }
    for (path, new) in after {
        if !before.contains_key(path) {
            result.added.push(new.clone());
        }
    }

    result
}

fn differs(old: &FileEntry, new: &FileEntry) -> bool {
    if old.is_directory || new.is_directory {
        return old.is_directory != new.is_directory;
    }
    old.size != new.size || old.hash != new.hash
}

pub fn compare_trees(before: &Path, after: &Path) -> Result<DiffResult> {
    Ok(classify(&scan_tree(before)?, &scan_tree(after)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::fs;

    fn paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn classifies_by_relative_path_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let before = dir.path().join("before");
        let after = dir.path().join("after");
        for root in [&before, &after] {
            fs::create_dir_all(root.join("sub")).unwrap();
            fs::write(root.join("same.txt"), "same").unwrap();
        }
        fs::write(before.join("gone.txt"), "x").unwrap();
        fs::write(after.join("new.txt"), "y").unwrap();
        fs::write(before.join("sub/edit.txt"), "aaaa").unwrap();
        fs::write(after.join("sub/edit.txt"), "aaab").unwrap();

        let result = compare_trees(&before, &after).unwrap();
        assert_eq!(paths(&result.deleted), vec!["gone.txt"]);
        assert_eq!(paths(&result.added), vec!["new.txt"]);
        assert_eq!(paths(&result.modified), vec!["sub/edit.txt"]);
        assert_eq!(paths(&result.unchanged), vec!["same.txt", "sub"]);
        assert!(result.has_changes());
    }

    #[test]
    fn file_replaced_by_directory_is_modified() {
        let dir = tempfile::tempdir().unwrap();
        let before = dir.path().join("before");
        let after = dir.path().join("after");
        fs::create_dir_all(&before).unwrap();
        fs::create_dir_all(after.join("thing")).unwrap();
        fs::write(before.join("thing"), "").unwrap();

        let result = compare_trees(&before, &after).unwrap();
        assert_eq!(paths(&result.modified), vec!["thing"]);
        assert!(result.modified[0].is_directory);
    }

    #[test]
    fn entries_carry_hash_and_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "abc").unwrap();

        let tree = scan_tree(dir.path()).unwrap();
        let entry = &tree["a"];
        assert_eq!(entry.size, 3);
        assert_eq!(
            entry.hash.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert!(entry.modified_date.is_some());
    }

    #[test]
    fn identical_trees_have_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "abc").unwrap();
        let result = compare_trees(dir.path(), dir.path()).unwrap();
        assert!(!result.has_changes());
        assert_eq!(result.unchanged.len(), 1);
    }

    fn tree() -> impl Strategy<Value = Tree> {
        let entry = (any::<bool>(), 0u64..3, "[xy]");
        proptest::collection::btree_map("[a-e]", entry, 0..6).prop_map(|entries| {
            entries
                .into_iter()
                .map(|(path, (is_directory, size, hash))| {
                    let entry = FileEntry {
                        path: path.clone(),
                        size: if is_directory { 0 } else { size },
                        is_directory,
                        hash: (!is_directory).then_some(hash),
                        modified_date: None,
                    };
                    (path, entry)
                })
                .collect()
        })
    }

    fn path_set(entries: &[FileEntry]) -> BTreeSet<String> {
        entries.iter().map(|e| e.path.clone()).collect()
    }

    proptest! {
        #[test]
        fn classification_is_symmetric(a in tree(), b in tree()) {
            let forward = classify(&a, &b);
            let backward = classify(&b, &a);

            prop_assert_eq!(path_set(&forward.added), path_set(&backward.deleted));
            prop_assert_eq!(path_set(&forward.deleted), path_set(&backward.added));
            prop_assert_eq!(path_set(&forward.modified), path_set(&backward.modified));
            prop_assert_eq!(path_set(&forward.unchanged), path_set(&backward.unchanged));
        }
    }
}
