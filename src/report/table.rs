//! Terminal tables for snapshot and device listings.

use crate::bridge::DeviceProfile;
use crate::store::SnapshotMetadata;
use crate::util::{format_bytes, format_timestamp};

pub fn render_snapshots(snapshots: &[SnapshotMetadata]) -> String {
    if snapshots.is_empty() {
        return String::from("No snapshots found.\n");
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<20} {:<8} {:<20} {:<30} {:>7} {:>10}\n",
        "Label", "Platform", "Created", "Scopes", "Files", "Size"
    ));
    output.push_str(&"-".repeat(100));
    output.push('\n');

    for snapshot in snapshots {
        output.push_str(&format!(
            "{:<20} {:<8} {:<20} {:<30} {:>7} {:>10}\n",
            truncate(&snapshot.label, 20),
            snapshot.platform,
            format_timestamp(&snapshot.timestamp),
            truncate(&snapshot.materialized_scopes().join(","), 30),
            snapshot.total_files,
            format_bytes(snapshot.total_size)
        ));
    }

    output
}

pub fn render_devices(devices: &[DeviceProfile]) -> String {
    if devices.is_empty() {
        return String::from("No devices found.\n");
    }

    let mut output = String::new();
    output.push_str(&format!("{:<40} {:<30} {:<8} {:<8}\n", "ID", "Name", "Type", "Platform"));
    output.push_str(&"-".repeat(90));
    output.push('\n');

    for profile in devices {
        let platform = if profile.elevated {
            format!("{} (root)", profile.platform)
        } else {
            profile.platform.to_string()
        };
        output.push_str(&format!(
            "{:<40} {:<30} {:<8} {}\n",
            truncate(&profile.device.id, 40),
            truncate(&profile.device.name, 30),
            profile.device.kind,
            platform
        ));
    }

    output
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{truncated}...")
    }
}
