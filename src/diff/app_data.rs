//! App data comparison.
//!
//! Structured snapshots (json/yaml) are compared record by record. Each
//! category is turned into an ordered list of `(key, value)` pairs and the
//! two lists are reconciled by key. Equality is structural, so maps that
//! differ only in key order are unchanged.
//!
//! When either side only has the flattened text encoding the comparison
//! falls back to per-file line diffs.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::capture::app_data::{Cookie, KeychainEntry, PasteboardItem};
use crate::capture::{AppData, Category};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Added,
    Deleted,
    Modified,
    Unchanged,
}

impl DiffStatus {
    pub fn inverse(self) -> DiffStatus {
        match self {
            DiffStatus::Added => DiffStatus::Deleted,
            DiffStatus::Deleted => DiffStatus::Added,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffEntry {
    pub key: String,
    pub status: DiffStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
}

/// Mirrors `AppData` with every record replaced by its diff entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppDataChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_defaults: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_preferences: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keychain: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pasteboard: Option<Vec<DiffEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub databases: Option<Vec<DiffEntry>>,
}

impl AppDataChanges {
    pub fn get(&self, category: Category) -> Option<&[DiffEntry]> {
        let entries = match category {
            Category::UserDefaults => &self.user_defaults,
            Category::SharedPreferences => &self.shared_preferences,
            Category::Cookies => &self.cookies,
            Category::Keychain => &self.keychain,
            Category::Pasteboard => &self.pasteboard,
            Category::Databases => &self.databases,
        };
        entries.as_deref()
    }

    fn slot(&mut self, category: Category) -> &mut Option<Vec<DiffEntry>> {
        match category {
            Category::UserDefaults => &mut self.user_defaults,
            Category::SharedPreferences => &mut self.shared_preferences,
            Category::Cookies => &mut self.cookies,
            Category::Keychain => &mut self.keychain,
            Category::Pasteboard => &mut self.pasteboard,
            Category::Databases => &mut self.databases,
        }
    }

    /// Compared categories in schema order.
    pub fn categories(&self) -> Vec<(Category, &[DiffEntry])> {
        Category::ALL
            .into_iter()
            .filter_map(|c| self.get(c).map(|entries| (c, entries)))
            .collect()
    }
}

/// Compare every category present on either side.
pub fn diff_app_data(before: &AppData, after: &AppData) -> AppDataChanges {
    let mut changes = AppDataChanges::default();
    for category in Category::ALL {
        if !before.has(category) && !after.has(category) {
            continue;
        }
        let entries = diff_records(records(before, category), records(after, category));
        *changes.slot(category) = Some(entries);
    }
    changes
}

/// Reconcile two keyed record lists. Output follows the before order, with
/// after-only keys appended in their own order.
pub fn diff_records(before: Vec<(String, Value)>, after: Vec<(String, Value)>) -> Vec<DiffEntry> {
    let mut after: Map<String, Value> = unique_keys(after).into_iter().collect();
    let mut entries = Vec::new();

    for (key, old) in unique_keys(before) {
        // shift_remove keeps the remaining after-only keys in their order
        match after.shift_remove(&key) {
            Some(new) if new == old => entries.push(DiffEntry {
                key,
                status: DiffStatus::Unchanged,
                before: Some(old),
                after: Some(new),
            }),
            Some(new) => entries.push(DiffEntry {
                key,
                status: DiffStatus::Modified,
                before: Some(old),
                after: Some(new),
            }),
            None => entries.push(DiffEntry {
                key,
                status: DiffStatus::Deleted,
                before: Some(old),
                after: None,
            }),
        }
    }

    for (key, new) in after {
        entries.push(DiffEntry {
            key,
            status: DiffStatus::Added,
            before: None,
            after: Some(new),
        });
    }

    entries
}

/// Suffix repeated keys with `#2`, `#3`, ... in order of appearance. A
/// suffix never reuses a key that occurs literally in the list.
fn unique_keys(records: Vec<(String, Value)>) -> Vec<(String, Value)> {
    let literal: HashSet<String> = records.iter().map(|(key, _)| key.clone()).collect();
    let mut taken: HashSet<String> = HashSet::with_capacity(records.len());
    let mut next_suffix: HashMap<String, usize> = HashMap::new();

    records
        .into_iter()
        .map(|(key, value)| {
            if taken.insert(key.clone()) {
                return (key, value);
            }
            let suffix = next_suffix.entry(key.clone()).or_insert(1);
            loop {
                *suffix += 1;
                let candidate = format!("{key}#{suffix}");
                if !literal.contains(&candidate) && taken.insert(candidate.clone()) {
                    return (candidate, value);
                }
            }
        })
        .collect()
}

/// Keyed records of one category; empty when the category is absent.
pub fn records(data: &AppData, category: Category) -> Vec<(String, Value)> {
    match category {
        Category::UserDefaults => data
            .user_defaults
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        Category::SharedPreferences => data.shared_preferences.iter().flatten().flat_map(preference_file).collect(),
        Category::Cookies => data.cookies.iter().flatten().map(cookie_record).collect(),
        Category::Keychain => data
            .keychain
            .iter()
            .flatten()
            .enumerate()
            .map(|(i, entry)| keychain_record(i, entry))
            .collect(),
        Category::Pasteboard => data.pasteboard.iter().flatten().map(pasteboard_record).collect(),
        Category::Databases => data
            .databases
            .iter()
            .flatten()
            .map(|name| (name.clone(), Value::String(name.clone())))
            .collect(),
    }
}

fn preference_file((file, prefs): (&String, &Value)) -> Vec<(String, Value)> {
    match prefs {
        Value::Object(map) => map.iter().map(|(k, v)| (format!("{file}/{k}"), v.clone())).collect(),
        other => vec![(file.clone(), other.clone())],
    }
}

fn cookie_record(cookie: &Cookie) -> (String, Value) {
    let key = format!("{}@{}{}", cookie.name, cookie.domain, cookie.path);
    (key, serde_json::to_value(cookie).unwrap_or(Value::Null))
}

fn keychain_record(index: usize, entry: &KeychainEntry) -> (String, Value) {
    let key = match (&entry.service, &entry.account, &entry.label) {
        (None, None, Some(label)) => format!("{}:{label}", entry.kind),
        (None, None, None) => format!("{}:[{index}]", entry.kind),
        (service, account, _) => format!(
            "{}:{}/{}",
            entry.kind,
            service.as_deref().unwrap_or(""),
            account.as_deref().unwrap_or("")
        ),
    };
    (key, serde_json::to_value(entry).unwrap_or(Value::Null))
}

fn pasteboard_record(item: &PasteboardItem) -> (String, Value) {
    (item.kind.clone(), Value::String(item.content.clone()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "diff", rename_all = "lowercase")]
pub enum ArtifactStatus {
    Added,
    Removed,
    Same,
    Changed(String),
}

/// One flattened app data file compared across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactChange {
    pub name: String,
    #[serde(flatten)]
    pub status: ArtifactStatus,
}

/// Compare two sets of named text artifacts, in `order`. Names missing on
/// both sides are skipped; missing on one side are added or removed.
pub fn compare_artifacts(
    order: &[&str],
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> Vec<ArtifactChange> {
    order
        .iter()
        .filter_map(|name| {
            let status = match (before.get(*name), after.get(*name)) {
                (None, None) => return None,
                (None, Some(_)) => ArtifactStatus::Added,
                (Some(_), None) => ArtifactStatus::Removed,
                (Some(old), Some(new)) if old == new => ArtifactStatus::Same,
                (Some(old), Some(new)) => ArtifactStatus::Changed(line_diff(old, new)),
            };
            Some(ArtifactChange {
                name: name.to_string(),
                status,
            })
        })
        .collect()
}

/// Minimal line diff: common lines prefixed with a space, removed with
/// `-`, added with `+`.
pub fn line_diff(before: &str, after: &str) -> String {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();

    // lcs[i][j] = longest common subsequence of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; new.len() + 1]; old.len() + 1];
    for i in (0..old.len()).rev() {
        for j in (0..new.len()).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut out = String::new();
    let (mut i, mut j) = (0, 0);
    while i < old.len() || j < new.len() {
        if i < old.len() && j < new.len() && old[i] == new[j] {
            out.push_str(&format!(" {}\n", old[i]));
            i += 1;
            j += 1;
        } else if j < new.len() && (i == old.len() || lcs[i][j + 1] >= lcs[i + 1][j]) {
            out.push_str(&format!("+{}\n", new[j]));
            j += 1;
        } else {
            out.push_str(&format!("-{}\n", old[i]));
            i += 1;
        }
    }
    out
}
