//! Diff engine.
//!
//! Compares two committed snapshots of the same app:
//! 1. every scope materialized in "before" is extracted on both sides (once)
//!    and its file trees classified; scopes missing on one side only warn
//! 2. app data is diffed structurally when both sides carry a structured
//!    encoding, otherwise per flattened text file
//! 3. optionally an external tool renders a textual diff per scope

pub mod app_data;
pub mod external;
pub mod extract;
pub mod tree;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::capture::Category;
use crate::config::DiffConfig;
use crate::error::{Error, Result};
use crate::store::{format, SnapshotMetadata, SnapshotStore, StoredAppData};
pub use app_data::{diff_app_data, AppDataChanges, ArtifactChange, ArtifactStatus, DiffEntry, DiffStatus};
pub use external::ToolOptions;
pub use tree::{DiffResult, FileEntry};

impl From<&DiffConfig> for ToolOptions {
    fn from(config: &DiffConfig) -> Self {
        ToolOptions {
            tool: config.tool,
            unified: config.unified,
            color: config.color,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeDiff {
    pub scope: String,
    pub files: DiffResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "changes", rename_all = "lowercase")]
pub enum AppDataComparison {
    Structured(AppDataChanges),
    Text(Vec<ArtifactChange>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub before: SnapshotMetadata,
    pub after: SnapshotMetadata,
    pub warnings: Vec<String>,
    pub scopes: Vec<ScopeDiff>,
    pub app_data: AppDataComparison,
}

pub async fn diff_snapshots(
    store: &SnapshotStore,
    device: &str,
    bundle: &str,
    before: &str,
    after: &str,
    options: &ToolOptions,
) -> Result<SnapshotDiff> {
    let before_meta = store.load(device, bundle, before)?;
    let after_meta = store.load(device, bundle, after)?;
    let before_dir = store.snapshot_dir(device, bundle, before)?;
    let after_dir = store.snapshot_dir(device, bundle, after)?;

    let mut warnings = Vec::new();
    let mut scopes = Vec::new();
    let after_scopes = after_meta.materialized_scopes();

    for scope in before_meta.materialized_scopes() {
        if !after_scopes.contains(scope) {
            warn(&mut warnings, format!("scope '{scope}' is missing from \"{after}\", skipped"));
            continue;
        }

        let (before_dir, after_dir, name) = (before_dir.clone(), after_dir.clone(), scope.clone());
        let (compared, scope_warnings) =
            tokio::task::spawn_blocking(move || compare_scope(&before_dir, &after_dir, &name))
                .await
                .map_err(|e| Error::Io(std::io::Error::other(e)))?;
        for message in scope_warnings {
            warn(&mut warnings, message);
        }
        let Some((files, before_tree, after_tree)) = compared else {
            continue;
        };

        let tool_output = external::run_tool(options, &before_tree, &after_tree)
            .await?
            .filter(|out| out.differences)
            .map(|out| out.text);

        scopes.push(ScopeDiff {
            scope: scope.clone(),
            files,
            tool_output,
        });
    }

    for scope in after_scopes {
        if !before_meta.materialized_scopes().contains(scope) {
            warn(&mut warnings, format!("scope '{scope}' only exists in \"{after}\""));
        }
    }

    let before_data = store.load_app_data(device, bundle, before)?;
    let after_data = store.load_app_data(device, bundle, after)?;
    let app_data = compare_app_data(&before_data, &before_dir, &after_data, &after_dir)?;

    Ok(SnapshotDiff {
        before: before_meta,
        after: after_meta,
        warnings,
        scopes,
        app_data,
    })
}

fn warn(warnings: &mut Vec<String>, message: String) {
    tracing::warn!("{message}");
    warnings.push(message);
}

type ScopeComparison = (Option<(DiffResult, PathBuf, PathBuf)>, Vec<String>);

/// Extract one scope on both sides and classify. Problems with either side
/// become warnings and skip the scope.
fn compare_scope(before_dir: &Path, after_dir: &Path, scope: &str) -> ScopeComparison {
    let mut warnings = Vec::new();

    let before = prepare(before_dir, scope, &mut warnings);
    let after = prepare(after_dir, scope, &mut warnings);
    let (Some(before), Some(after)) = (before, after) else {
        return (None, warnings);
    };

    match tree::compare_trees(&before, &after) {
        Ok(result) => (Some((result, before, after)), warnings),
        Err(e) => {
            warnings.push(format!("scope '{scope}': comparison failed: {e}"));
            (None, warnings)
        }
    }
}

fn prepare(snapshot_dir: &Path, scope: &str, warnings: &mut Vec<String>) -> Option<PathBuf> {
    let archive = snapshot_dir.join(format!("{scope}.zip"));
    if !archive.is_file() {
        warnings.push(format!("archive {} not found", archive.display()));
        return None;
    }

    let target = extract::extracted_dir(snapshot_dir, scope);
    match extract::extract_archive(&archive, &target) {
        Ok(_) => Some(target),
        Err(e) => {
            warnings.push(format!("failed to extract {}: {e}", archive.display()));
            None
        }
    }
}

fn compare_app_data(
    before: &StoredAppData,
    before_dir: &Path,
    after: &StoredAppData,
    after_dir: &Path,
) -> Result<AppDataComparison> {
    if let (StoredAppData::Structured(b), StoredAppData::Structured(a)) = (before, after) {
        return Ok(AppDataComparison::Structured(diff_app_data(b, a)));
    }

    let order: Vec<&str> = Category::ALL.iter().map(|c| c.text_file()).collect();
    Ok(AppDataComparison::Text(app_data::compare_artifacts(
        &order,
        &text_artifacts(before, before_dir)?,
        &text_artifacts(after, after_dir)?,
    )))
}

/// Flattened text view of stored app data, whatever its encoding.
fn text_artifacts(data: &StoredAppData, dir: &Path) -> Result<BTreeMap<String, String>> {
    Ok(match data {
        StoredAppData::Structured(app_data) => format::encode_text(app_data)
            .into_iter()
            .map(|(name, contents)| (name.to_string(), contents))
            .collect(),
        StoredAppData::Text(names) => names
            .iter()
            .map(|name| Ok((name.clone(), fs::read_to_string(dir.join(name))?)))
            .collect::<Result<_>>()?,
        StoredAppData::Absent => BTreeMap::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::archive::zip_directory;
    use crate::capture::AppData;
    use crate::config::DiffTool;
    use crate::platform::Platform;
    use crate::store::OutputFormat;
    use serde_json::json;

    const DEVICE: &str = "emulator-5554";
    const BUNDLE: &str = "com.example.app";

    fn options() -> ToolOptions {
        ToolOptions {
            tool: DiffTool::None,
            unified: 3,
            color: false,
        }
    }

    /// Commit a snapshot whose scopes each hold the given `(path, contents)`.
    fn commit(
        store: &SnapshotStore,
        label: &str,
        scopes: &[(&str, &[(&str, &str)])],
        app_data: &AppData,
        format: OutputFormat,
    ) {
        let dir = store.create(DEVICE, BUNDLE, label).unwrap();
        let work = tempfile::tempdir().unwrap();
        for (scope, files) in scopes {
            let root = work.path().join(scope);
            fs::create_dir_all(&root).unwrap();
            for (path, contents) in *files {
                let file = root.join(path);
                fs::create_dir_all(file.parent().unwrap()).unwrap();
                fs::write(file, contents).unwrap();
            }
            zip_directory(&root, &dir.join(format!("{scope}.zip"))).unwrap();
        }
        store.write_app_data(DEVICE, BUNDLE, label, app_data, format).unwrap();

        let names: Vec<String> = scopes.iter().map(|(s, _)| s.to_string()).collect();
        store
            .write_metadata(&SnapshotMetadata {
                platform: Platform::Android,
                device: DEVICE.to_string(),
                bundle: BUNDLE.to_string(),
                label: label.to_string(),
                timestamp: "2024-05-01T10:00:00.000Z".to_string(),
                scopes: names.clone(),
                captured_scopes: Some(names),
                total_files: 0,
                total_size: 0,
                format: Some(format),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn scope_missing_from_after_warns_and_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());
        let data = AppData::default();

        commit(
            &store,
            "before",
            &[("files", &[("a.txt", "1")]), ("cache", &[("c.bin", "x")])],
            &data,
            OutputFormat::Json,
        );
        commit(&store, "after", &[("files", &[("a.txt", "2")])], &data, OutputFormat::Json);

        let diff = diff_snapshots(&store, DEVICE, BUNDLE, "before", "after", &options()).await.unwrap();

        assert_eq!(diff.warnings.len(), 1);
        assert!(diff.warnings[0].contains("cache"));
        assert_eq!(diff.scopes.len(), 1);
        assert_eq!(diff.scopes[0].scope, "files");
        assert_eq!(diff.scopes[0].files.modified[0].path, "a.txt");
    }

    #[tokio::test]
    async fn structured_app_data_is_diffed_per_record() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());
        let prefs = |v: serde_json::Value| AppData {
            user_defaults: v.as_object().cloned(),
            ..Default::default()
        };

        commit(&store, "before", &[], &prefs(json!({"a": 1, "b": 2})), OutputFormat::Json);
        commit(&store, "after", &[], &prefs(json!({"a": 1, "c": 3})), OutputFormat::Yaml);

        let diff = diff_snapshots(&store, DEVICE, BUNDLE, "before", "after", &options()).await.unwrap();
        let AppDataComparison::Structured(changes) = diff.app_data else {
            panic!("expected structured comparison");
        };
        let statuses: Vec<DiffStatus> = changes.user_defaults.unwrap().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![DiffStatus::Unchanged, DiffStatus::Deleted, DiffStatus::Added]);
    }

    #[tokio::test]
    async fn mixed_encodings_fall_back_to_text_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());
        let before = AppData {
            databases: Some(vec!["a.db".into()]),
            pasteboard: Some(vec![]),
            ..Default::default()
        };
        let after = AppData {
            databases: Some(vec!["a.db".into()]),
            cookies: Some(vec![]),
            ..Default::default()
        };

        commit(&store, "before", &[], &before, OutputFormat::Json);
        commit(&store, "after", &[], &after, OutputFormat::Text);

        let diff = diff_snapshots(&store, DEVICE, BUNDLE, "before", "after", &options()).await.unwrap();
        let AppDataComparison::Text(changes) = diff.app_data else {
            panic!("expected text comparison");
        };
        let statuses: Vec<(&str, &ArtifactStatus)> = changes.iter().map(|c| (c.name.as_str(), &c.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("cookies.txt", &ArtifactStatus::Added),
                ("pasteboard.txt", &ArtifactStatus::Removed),
                ("databases.txt", &ArtifactStatus::Same),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_label_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(root.path());
        commit(&store, "before", &[], &AppData::default(), OutputFormat::Json);

        let err = diff_snapshots(&store, DEVICE, BUNDLE, "before", "nope", &options()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { ref label } if label == "nope"));
    }
}
