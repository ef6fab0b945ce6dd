pub mod diff;
pub mod json;
pub mod table;

use crate::progress::ProgressEvent;
use crate::snapshot::SnapshotOutcome;
use crate::util::format_bytes;

/// Summary printed after a snapshot is committed.
pub fn render_outcome(outcome: &SnapshotOutcome, verbose: bool) -> String {
    let metadata = &outcome.metadata;
    let mut output = String::new();

    output.push_str(&format!("Snapshot \"{}\" saved to {}\n", metadata.label, outcome.path.display()));
    output.push_str(&format!("  platform: {}\n", metadata.platform));
    output.push_str(&format!("  scopes:   {}\n", metadata.materialized_scopes().join(", ")));
    output.push_str(&format!(
        "  files:    {} ({})\n",
        metadata.total_files,
        format_bytes(metadata.total_size)
    ));

    if !outcome.omitted_scopes.is_empty() {
        output.push_str(&format!("  omitted:  {}\n", outcome.omitted_scopes.join(", ")));
    }

    if !outcome.diagnostics.is_empty() {
        output.push('\n');
        if verbose {
            output.push_str("Diagnostics:\n");
            output.push_str(&"-".repeat(40));
            output.push('\n');
            for diagnostic in &outcome.diagnostics {
                output.push_str(&format!("  {diagnostic}\n"));
            }
        } else {
            for diagnostic in &outcome.diagnostics {
                output.push_str(&format!("[diagnostic] {diagnostic}\n"));
            }
        }
    }

    output
}

/// One status line per progress event.
pub fn progress_line(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::Progress { message, .. } => format!("[*] {message}"),
        ProgressEvent::Complete { message } => format!("[+] {message}"),
        ProgressEvent::Error { message } => format!("[!] {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use crate::progress::Stage;
    use crate::store::SnapshotMetadata;
    use crate::transfer::StrategyKind;

    #[test]
    fn outcome_lists_omitted_scopes_and_diagnostics() {
        let outcome = SnapshotOutcome {
            metadata: SnapshotMetadata {
                platform: Platform::Ios,
                device: "d".into(),
                bundle: "b".into(),
                label: "l".into(),
                timestamp: "2024-05-01T10:00:00.000Z".into(),
                scopes: vec!["Documents".into(), "tmp".into()],
                captured_scopes: Some(vec!["Documents".into()]),
                total_files: 2,
                total_size: 10,
                format: None,
            },
            path: "/snapshots/d/b/l".into(),
            strategy: StrategyKind::DirectStream,
            omitted_scopes: vec!["tmp".into()],
            diagnostics: vec!["keychain: access denied".into()],
        };

        let out = render_outcome(&outcome, false);
        assert!(out.contains("scopes:   Documents\n"));
        assert!(out.contains("omitted:  tmp\n"));
        assert!(out.contains("[diagnostic] keychain: access denied\n"));
    }

    #[test]
    fn progress_lines_by_event_type() {
        assert_eq!(progress_line(&ProgressEvent::progress(Stage::Connect, "hi")), "[*] hi");
        assert_eq!(
            progress_line(&ProgressEvent::Error { message: "boom".into() }),
            "[!] boom"
        );
    }
}
