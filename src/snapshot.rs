//! Snapshot orchestration.
//!
//! One `create_snapshot` call runs the whole pipeline for a single
//! (device, bundle, label) key:
//!
//! ```text
//! reserve key -> profile device -> connect -> capture -> create dir
//!   -> transfer archives -> clean device -> app data -> metadata.json
//! ```
//!
//! Stage transitions are broadcast on the progress registry. The session is
//! closed on every path out of the pipeline. Once the snapshot directory
//! exists, any failure deletes it again, so a snapshot is either fully
//! committed or not there at all.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use crate::bridge::{self, Bridge, Connection, DeviceProfile};
use crate::capture::{self, archive, CaptureResult};
use crate::config::Config;
use crate::error::Result;
use crate::platform::Platform;
use crate::progress::{ProgressEvent, ProgressRegistry, Stage};
use crate::store::{validate_name, OutputFormat, SnapshotMetadata, SnapshotStore};
use crate::transfer::{self, DirectStream, RetryPolicy, SecureCopy, StrategyKind, TransferStrategy};

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub device: String,
    pub bundle: String,
    pub label: String,
    /// `None` uses the platform's default scopes.
    pub scopes: Option<Vec<String>>,
    pub format: OutputFormat,
    pub force_ssh: bool,
}

#[derive(Debug, Clone)]
pub struct SnapshotOutcome {
    pub metadata: SnapshotMetadata,
    pub path: PathBuf,
    pub strategy: StrategyKind,
    pub omitted_scopes: Vec<String>,
    pub diagnostics: Vec<String>,
}

pub async fn create_snapshot(
    bridge: Arc<dyn Bridge>,
    store: &SnapshotStore,
    config: &Config,
    request: &SnapshotRequest,
    progress: &ProgressRegistry,
) -> Result<SnapshotOutcome> {
    match run(bridge, store, config, request, progress).await {
        Ok(outcome) => {
            progress.broadcast(ProgressEvent::Complete {
                message: format!("Snapshot \"{}\" created at {}", request.label, outcome.path.display()),
            });
            Ok(outcome)
        }
        Err(e) => {
            progress.broadcast(ProgressEvent::Error { message: e.to_string() });
            Err(e)
        }
    }
}

async fn run(
    bridge: Arc<dyn Bridge>,
    store: &SnapshotStore,
    config: &Config,
    request: &SnapshotRequest,
    progress: &ProgressRegistry,
) -> Result<SnapshotOutcome> {
    let _reservation = store.reserve(&request.device, &request.bundle, &request.label)?;

    progress.broadcast(ProgressEvent::progress(
        Stage::Connect,
        format!("Connecting to device {}", request.device),
    ));
    let profile = bridge::profile_device(bridge.as_ref(), &request.device).await?;
    progress.broadcast(ProgressEvent::progress(
        Stage::Platform,
        format!(
            "Detected platform: {}{}",
            profile.platform,
            if profile.elevated { " (elevated access)" } else { "" }
        ),
    ));

    let scopes = match &request.scopes {
        Some(scopes) => capture::normalize_scopes(scopes),
        None => profile.platform.default_scopes(),
    };
    for scope in &scopes {
        validate_name("scope", scope)?;
    }

    progress.broadcast(ProgressEvent::progress(
        Stage::Attach,
        format!("Attaching to {}", request.bundle),
    ));
    let conn = bridge::connect(bridge, &request.device, &request.bundle, profile.platform).await?;
    progress.broadcast(ProgressEvent::progress(Stage::Load, "Agent loaded"));

    let result = capture_and_persist(&conn, store, config, request, &profile, &scopes, progress).await;
    conn.close().await;
    result
}

async fn capture_and_persist(
    conn: &Connection,
    store: &SnapshotStore,
    config: &Config,
    request: &SnapshotRequest,
    profile: &DeviceProfile,
    scopes: &[String],
    progress: &ProgressRegistry,
) -> Result<SnapshotOutcome> {
    progress.broadcast(ProgressEvent::progress(
        Stage::Snapshot,
        format!("Capturing scopes: {}", scopes.join(", ")),
    ));
    let capture = capture::capture(conn, scopes).await?;

    let path = store.create(&request.device, &request.bundle, &request.label)?;

    let kind = transfer::select_strategy(profile.platform, profile.elevated, request.force_ssh);
    let strategy: Box<dyn TransferStrategy + '_> = match kind {
        StrategyKind::DirectStream => Box::new(DirectStream::new(conn, config.transfer.chunk_size)),
        StrategyKind::SecureCopy => Box::new(SecureCopy::for_device(&config.ssh, &request.device)),
    };
    tracing::info!(strategy = strategy.name(), archives = capture.archives.len(), "transferring");

    let transferred = transfer::transfer_all(
        &capture.archives,
        &path,
        strategy.as_ref(),
        RetryPolicy::from(&config.transfer),
        |scope, current, total| {
            progress.broadcast(ProgressEvent::progress(
                Stage::Transfer,
                format!("Transferring {scope}.zip ({current}/{total})"),
            ))
        },
    )
    .await;

    let transferred = match transferred {
        Ok(paths) => paths,
        Err(e) => {
            roll_back(store, request);
            return Err(e);
        }
    };

    remove_device_archives(conn, &capture).await;

    progress.broadcast(ProgressEvent::progress(Stage::Persist, "Saving snapshot"));
    match persist(store, request, profile.platform, scopes, capture, &transferred) {
        Ok((metadata, omitted_scopes, diagnostics)) => Ok(SnapshotOutcome {
            metadata,
            path,
            strategy: kind,
            omitted_scopes,
            diagnostics,
        }),
        Err(e) => {
            roll_back(store, request);
            Err(e)
        }
    }
}

type Persisted = (SnapshotMetadata, Vec<String>, Vec<String>);

fn persist(
    store: &SnapshotStore,
    request: &SnapshotRequest,
    platform: Platform,
    scopes: &[String],
    capture: CaptureResult,
    transferred: &[PathBuf],
) -> Result<Persisted> {
    let mut diagnostics = capture.diagnostics.clone();
    let (mut total_files, mut total_size) = (0, 0);

    for path in transferred {
        match archive::summarize_archive(path) {
            Ok(summary) => {
                total_files += summary.files;
                total_size += summary.bytes;
                for name in summary.rejected {
                    diagnostics.push(format!("{}: entry {name:?} escapes the scope root", path.display()));
                }
            }
            Err(e) => {
                tracing::warn!(archive = %path.display(), error = %e, "archive unreadable, totals incomplete");
                diagnostics.push(format!("{}: {e}", path.display()));
            }
        }
    }

    store.write_app_data(
        &request.device,
        &request.bundle,
        &request.label,
        &capture.app_data,
        request.format,
    )?;

    let metadata = SnapshotMetadata {
        platform,
        device: request.device.clone(),
        bundle: request.bundle.clone(),
        label: request.label.clone(),
        timestamp: capture.timestamp.clone(),
        scopes: scopes.to_vec(),
        captured_scopes: Some(capture.captured_scopes()),
        total_files,
        total_size,
        format: Some(request.format),
    };
    store.write_metadata(&metadata)?;

    Ok((metadata, capture.omitted_scopes, diagnostics))
}

/// Device temp archives are the orchestrator's to clean; leftovers are
/// only a hygiene problem.
async fn remove_device_archives(conn: &Connection, capture: &CaptureResult) {
    for archive in &capture.archives {
        if let Err(e) = conn.call(capture::REMOVE_FILE, vec![json!(archive.device_path)]).await {
            tracing::debug!(path = %archive.device_path, error = %e, "device cleanup failed");
        }
    }
}

fn roll_back(store: &SnapshotStore, request: &SnapshotRequest) {
    tracing::warn!(label = %request.label, "rolling back partial snapshot");
    if let Err(e) = store.delete(&request.device, &request.bundle, &request.label) {
        tracing::warn!(label = %request.label, error = %e, "rollback failed");
    }
}
