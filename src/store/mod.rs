//! On-disk snapshot store.
//!
//! Sole reader and writer of persisted snapshots:
//!
//! ```text
//! <root>/<device>/<bundle>/<label>/
//!     metadata.json
//!     appdata.json | appdata.yaml | <category>.txt ...
//!     <scope>.zip ...
//! ```
//!
//! `metadata.json` is written last and acts as the commit marker: a
//! directory without a readable metadata file is not a snapshot.
//! Creation is check-then-act and not atomic against other processes; the
//! in-process reservation set only serializes creators inside one process.

pub mod format;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::capture::{AppData, Category};
use crate::error::{Error, Result};
use crate::platform::Platform;
pub use format::OutputFormat;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub platform: Platform,
    pub device: String,
    pub bundle: String,
    pub label: String,
    pub timestamp: String,
    /// Scopes requested at capture time.
    pub scopes: Vec<String>,
    /// Scopes actually materialized as archives. Older snapshots lack it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub captured_scopes: Option<Vec<String>>,
    #[serde(default)]
    pub total_files: u64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

impl SnapshotMetadata {
    pub fn materialized_scopes(&self) -> &[String] {
        self.captured_scopes.as_deref().unwrap_or(&self.scopes)
    }
}

/// App data as found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredAppData {
    Structured(AppData),
    /// Flattened text encoding; holds the category files present.
    Text(Vec<String>),
    Absent,
}

pub struct SnapshotStore {
    root: PathBuf,
    reserved: Mutex<HashSet<PathBuf>>,
}

/// Holds a snapshot key for the lifetime of one creating operation.
pub struct Reservation<'a> {
    store: &'a SnapshotStore,
    dir: PathBuf,
}

impl Reservation<'_> {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.store.reserved.lock().remove(&self.dir);
    }
}

/// Device, bundle, label and scope names become path components.
pub fn validate_name(what: &'static str, name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(Error::InvalidName {
            what,
            name: name.to_string(),
        });
    }
    Ok(())
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SnapshotStore {
            root: root.into(),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn app_dir(&self, device: &str, bundle: &str) -> Result<PathBuf> {
        validate_name("device", device)?;
        validate_name("bundle", bundle)?;
        Ok(self.root.join(device).join(bundle))
    }

    pub fn snapshot_dir(&self, device: &str, bundle: &str, label: &str) -> Result<PathBuf> {
        validate_name("label", label)?;
        Ok(self.app_dir(device, bundle)?.join(label))
    }

    /// True iff the directory holds a parsable metadata record.
    pub fn exists(&self, device: &str, bundle: &str, label: &str) -> bool {
        match self.snapshot_dir(device, bundle, label) {
            Ok(dir) => read_metadata(&dir).is_ok(),
            Err(_) => false,
        }
    }

    /// Claim a key for an operation that is about to create it.
    ///
    /// Fails with `AlreadyExists` when the snapshot is already committed or
    /// another operation in this process holds the key. Touches nothing on
    /// disk.
    pub fn reserve(&self, device: &str, bundle: &str, label: &str) -> Result<Reservation<'_>> {
        let dir = self.snapshot_dir(device, bundle, label)?;
        let mut reserved = self.reserved.lock();

        if reserved.contains(&dir) || read_metadata(&dir).is_ok() {
            return Err(Error::AlreadyExists {
                label: label.to_string(),
            });
        }
        reserved.insert(dir.clone());

        Ok(Reservation { store: self, dir })
    }

    /// Create the snapshot directory. No filesystem mutation happens when
    /// the snapshot already exists.
    pub fn create(&self, device: &str, bundle: &str, label: &str) -> Result<PathBuf> {
        let dir = self.snapshot_dir(device, bundle, label)?;
        if read_metadata(&dir).is_ok() {
            return Err(Error::AlreadyExists {
                label: label.to_string(),
            });
        }
        fs::create_dir_all(&dir)?;
        tracing::debug!(dir = %dir.display(), "snapshot directory created");
        Ok(dir)
    }

    /// Write `metadata.json` through a temp file so readers never see a
    /// half-written record.
    pub fn write_metadata(&self, metadata: &SnapshotMetadata) -> Result<()> {
        let dir = self.snapshot_dir(&metadata.device, &metadata.bundle, &metadata.label)?;
        let tmp = dir.join(format!("{METADATA_FILE}.tmp"));
        fs::write(&tmp, serde_json::to_string_pretty(metadata)?)?;
        fs::rename(&tmp, dir.join(METADATA_FILE))?;
        Ok(())
    }

    pub fn write_app_data(
        &self,
        device: &str,
        bundle: &str,
        label: &str,
        app_data: &AppData,
        format: OutputFormat,
    ) -> Result<Vec<PathBuf>> {
        let dir = self.snapshot_dir(device, bundle, label)?;
        let mut written = Vec::new();
        for (name, contents) in format::encode(app_data, format)? {
            let path = dir.join(name);
            fs::write(&path, contents)?;
            written.push(path);
        }
        Ok(written)
    }

    pub fn load(&self, device: &str, bundle: &str, label: &str) -> Result<SnapshotMetadata> {
        let dir = self.snapshot_dir(device, bundle, label)?;
        read_metadata(&dir).map_err(|e| {
            tracing::debug!(dir = %dir.display(), error = %e, "metadata unreadable");
            Error::NotFound {
                label: label.to_string(),
            }
        })
    }

    /// Every committed snapshot for the app, oldest first. Directories
    /// without readable metadata are skipped.
    pub fn list(&self, device: &str, bundle: &str) -> Result<Vec<SnapshotMetadata>> {
        let app_dir = self.app_dir(device, bundle)?;
        let entries = match fs::read_dir(&app_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            match read_metadata(&entry.path()) {
                Ok(metadata) => snapshots.push(metadata),
                Err(e) => tracing::debug!(dir = %entry.path().display(), error = %e, "skipping directory"),
            }
        }

        snapshots.sort_by(|a, b| {
            let ta = DateTime::parse_from_rfc3339(&a.timestamp).ok();
            let tb = DateTime::parse_from_rfc3339(&b.timestamp).ok();
            ta.cmp(&tb).then_with(|| a.label.cmp(&b.label))
        });
        Ok(snapshots)
    }

    /// Remove the whole snapshot directory; absent snapshots are a no-op.
    pub fn delete(&self, device: &str, bundle: &str, label: &str) -> Result<()> {
        let dir = self.snapshot_dir(device, bundle, label)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::info!(dir = %dir.display(), "snapshot deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_app_data(&self, device: &str, bundle: &str, label: &str) -> Result<StoredAppData> {
        let dir = self.snapshot_dir(device, bundle, label)?;

        for encoding in [OutputFormat::Json, OutputFormat::Yaml] {
            let Some(path) = encoding.structured_file().map(|name| dir.join(name)) else {
                continue;
            };
            if path.is_file() {
                let raw = fs::read_to_string(path)?;
                let data = match encoding {
                    OutputFormat::Yaml => format::decode_yaml(&raw)?,
                    _ => format::decode_json(&raw)?,
                };
                return Ok(StoredAppData::Structured(data));
            }
        }

        let artifacts: Vec<String> = Category::ALL
            .iter()
            .map(|c| c.text_file())
            .filter(|name| dir.join(name).is_file())
            .map(String::from)
            .collect();
        if artifacts.is_empty() {
            Ok(StoredAppData::Absent)
        } else {
            Ok(StoredAppData::Text(artifacts))
        }
    }
}

fn read_metadata(dir: &Path) -> Result<SnapshotMetadata> {
    let raw = fs::read_to_string(dir.join(METADATA_FILE))?;
    Ok(serde_json::from_str(&raw)?)
}
