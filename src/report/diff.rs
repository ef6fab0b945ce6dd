//! Human-readable rendering of a snapshot diff.
//!
//! Unchanged records are counted, not listed.

use serde_json::Value;

use crate::diff::{AppDataComparison, ArtifactStatus, DiffEntry, DiffResult, DiffStatus, SnapshotDiff};
use crate::util::{format_bytes, format_timestamp};

pub fn render(diff: &SnapshotDiff) -> String {
    let mut output = String::new();

    output.push_str("Comparing snapshots:\n");
    output.push_str(&format!(
        "  Before: {} ({})\n",
        diff.before.label,
        format_timestamp(&diff.before.timestamp)
    ));
    output.push_str(&format!(
        "  After:  {} ({})\n",
        diff.after.label,
        format_timestamp(&diff.after.timestamp)
    ));

    for warning in &diff.warnings {
        output.push_str(&format!("warning: {warning}\n"));
    }

    for scope in &diff.scopes {
        output.push_str(&format!("\n=== {} ===\n", scope.scope));
        render_files(&mut output, &scope.files);
        if let Some(text) = &scope.tool_output {
            output.push('\n');
            output.push_str(text);
            if !text.ends_with('\n') {
                output.push('\n');
            }
        }
    }

    output.push_str("\n=== App Data ===\n");
    match &diff.app_data {
        AppDataComparison::Structured(changes) => {
            let categories = changes.categories();
            if categories.is_empty() {
                output.push_str("No app data captured.\n");
            }
            for (category, entries) in categories {
                output.push_str(&format!("\n--- {category} ---\n"));
                render_entries(&mut output, entries);
            }
        }
        AppDataComparison::Text(artifacts) => {
            if artifacts.is_empty() {
                output.push_str("No app data captured.\n");
            }
            for artifact in artifacts {
                output.push_str(&format!("\n--- {} ---\n", artifact.name));
                match &artifact.status {
                    ArtifactStatus::Added => output.push_str("(file added in after snapshot)\n"),
                    ArtifactStatus::Removed => output.push_str("(file removed in after snapshot)\n"),
                    ArtifactStatus::Same => output.push_str("No differences\n"),
                    ArtifactStatus::Changed(text) => output.push_str(text),
                }
            }
        }
    }

    output
}

fn render_files(output: &mut String, files: &DiffResult) {
    if !files.has_changes() {
        output.push_str(&format!("No differences ({} entries)\n", files.unchanged.len()));
        return;
    }

    for entry in &files.added {
        output.push_str(&format!("  [+] {}{}\n", entry.path, size_suffix(entry.is_directory, entry.size)));
    }
    for entry in &files.deleted {
        output.push_str(&format!("  [-] {}{}\n", entry.path, size_suffix(entry.is_directory, entry.size)));
    }
    for entry in &files.modified {
        output.push_str(&format!("  [~] {}{}\n", entry.path, size_suffix(entry.is_directory, entry.size)));
    }
    output.push_str(&format!(
        "{} added, {} deleted, {} modified, {} unchanged\n",
        files.added.len(),
        files.deleted.len(),
        files.modified.len(),
        files.unchanged.len()
    ));
}

fn size_suffix(is_directory: bool, size: u64) -> String {
    if is_directory {
        "/".to_string()
    } else {
        format!(" ({})", format_bytes(size))
    }
}

fn render_entries(output: &mut String, entries: &[DiffEntry]) {
    let mut unchanged = 0;
    for entry in entries {
        match entry.status {
            DiffStatus::Added => output.push_str(&format!("  [+] {} = {}\n", entry.key, show(&entry.after))),
            DiffStatus::Deleted => output.push_str(&format!("  [-] {} = {}\n", entry.key, show(&entry.before))),
            DiffStatus::Modified => output.push_str(&format!(
                "  [~] {}: {} -> {}\n",
                entry.key,
                show(&entry.before),
                show(&entry.after)
            )),
            DiffStatus::Unchanged => unchanged += 1,
        }
    }
    if unchanged == entries.len() {
        output.push_str("No differences\n");
    } else if unchanged > 0 {
        output.push_str(&format!("  ({unchanged} unchanged)\n"));
    }
}

fn show(value: &Option<Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "<absent>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::app_data::diff_records;
    use crate::diff::{AppDataChanges, ScopeDiff};
    use crate::platform::Platform;
    use crate::store::SnapshotMetadata;
    use serde_json::json;

    fn meta(label: &str) -> SnapshotMetadata {
        SnapshotMetadata {
            platform: Platform::Android,
            device: "d".into(),
            bundle: "b".into(),
            label: label.into(),
            timestamp: "t".into(),
            scopes: vec![],
            captured_scopes: None,
            total_files: 0,
            total_size: 0,
            format: None,
        }
    }

    #[test]
    fn renders_scopes_warnings_and_records() {
        let diff = SnapshotDiff {
            before: meta("before"),
            after: meta("after"),
            warnings: vec!["scope 'cache' is missing from \"after\", skipped".into()],
            scopes: vec![ScopeDiff {
                scope: "files".into(),
                files: DiffResult::default(),
                tool_output: None,
            }],
            app_data: AppDataComparison::Structured(AppDataChanges {
                user_defaults: Some(diff_records(
                    vec![("a".into(), json!(1)), ("b".into(), json!(2))],
                    vec![("a".into(), json!(1)), ("c".into(), json!("x"))],
                )),
                ..Default::default()
            }),
        };

        let out = render(&diff);
        assert!(out.contains("warning: scope 'cache'"));
        assert!(out.contains("=== files ===\nNo differences (0 entries)\n"));
        assert!(out.contains("--- userDefaults ---\n  [-] b = 2\n  [+] c = \"x\"\n  (1 unchanged)\n"));
    }
}
