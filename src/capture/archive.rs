//! Scope archive format.
//!
//! One standard zip container per scope. Entry names are POSIX-style paths
//! relative to the scope root and identify each file uniquely; directories
//! are implied by file paths and never stored as entries.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};
use walkdir::WalkDir;
use zip::write::FileOptions;

use crate::error::Result;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: u64,
    pub bytes: u64,
    /// Entry names that would escape the extraction root.
    pub rejected: Vec<String>,
}

/// Archive every regular file under `root` into a new zip at `dest`.
pub fn zip_directory(root: &Path, dest: &Path) -> Result<ArchiveSummary> {
    let out = File::create(dest)?;
    let mut zip = zip::ZipWriter::new(out);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut summary = ArchiveSummary::default();

    for entry in WalkDir::new(root).sort_by_file_name().follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }
        // the archive may live inside the tree it archives
        if entry.path() == dest {
            continue;
        }
        let Some(name) = entry_name(root, entry.path()) else {
            continue;
        };

        let modified = entry.metadata().ok().and_then(|m| m.modified().ok()).and_then(entry_time);
        zip.start_file(name, modified.map_or(options, |time| options.last_modified_time(time)))?;
        let mut file = File::open(entry.path())?;
        summary.bytes += io::copy(&mut file, &mut zip)?;
        summary.files += 1;
    }

    zip.finish()?;
    Ok(summary)
}

/// Zip timestamp of a modification time, read as UTC. `None` before 1980,
/// which the format cannot represent.
pub fn entry_time(modified: SystemTime) -> Option<zip::DateTime> {
    let t = DateTime::<Utc>::from(modified);
    zip::DateTime::from_date_and_time(
        u16::try_from(t.year()).ok()?,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    )
    .ok()
}

/// Modification time recorded in a zip entry.
pub fn entry_modified(time: zip::DateTime) -> Option<SystemTime> {
    let naive = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?;
    Some(Utc.from_utc_datetime(&naive).into())
}

/// POSIX-style name of `path` relative to `root`.
pub fn entry_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Count files and uncompressed bytes without extracting.
pub fn summarize_archive(path: &Path) -> Result<ArchiveSummary> {
    let mut archive = zip::ZipArchive::new(File::open(path)?)?;
    let mut summary = ArchiveSummary::default();

    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if entry.enclosed_name().is_none() {
            summary.rejected.push(entry.name().to_string());
            continue;
        }
        summary.files += 1;
        summary.bytes += entry.size();
    }

    Ok(summary)
}
