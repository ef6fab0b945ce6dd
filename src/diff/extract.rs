use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::capture::archive::{entry_modified, ArchiveSummary};
use crate::error::Result;

pub const EXTRACTED_DIR: &str = "extracted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Target already present; nothing was done.
    Skipped,
    Extracted(ArchiveSummary),
}

/// Where a scope archive of a snapshot is unpacked.
pub fn extracted_dir(snapshot_dir: &Path, scope: &str) -> PathBuf {
    snapshot_dir.join(EXTRACTED_DIR).join(scope)
}

/// Unpack `archive` into `target` once.
///
/// An existing target is taken as a previous successful extraction. On
/// failure the partial target is removed so the next run starts clean.
pub fn extract_archive(archive: &Path, target: &Path) -> Result<Extraction> {
    if target.exists() {
        return Ok(Extraction::Skipped);
    }

    match unpack(archive, target) {
        Ok(summary) => {
            for name in &summary.rejected {
                tracing::warn!(archive = %archive.display(), entry = %name, "entry escapes extraction root, skipped");
            }
            Ok(Extraction::Extracted(summary))
        }
        Err(e) => {
            let _ = fs::remove_dir_all(target);
            Err(e)
        }
    }
}

fn unpack(archive: &Path, target: &Path) -> Result<ArchiveSummary> {
    let mut zip = zip::ZipArchive::new(File::open(archive)?)?;
    let mut summary = ArchiveSummary::default();
    fs::create_dir_all(target)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            summary.rejected.push(entry.name().to_string());
            continue;
        };
        let out = target.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        summary.bytes += io::copy(&mut entry, &mut file)?;
        summary.files += 1;

        if let Some(modified) = entry_modified(entry.last_modified()) {
            if let Err(e) = file.set_modified(modified) {
                tracing::debug!(file = %out.display(), error = %e, "could not restore modification time");
            }
        }
    }

    Ok(summary)
}
