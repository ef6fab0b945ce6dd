//! Transfer manager.
//!
//! Moves each captured scope archive off the device into the snapshot
//! directory as `<scope>.zip`. Transfers run strictly one after another:
//! archives can be large and a single instrumentation session is not safe
//! for concurrent streams.
//!
//! Two interchangeable strategies:
//! - `DirectStream`: chunked reads through the bridge session (default)
//! - `SecureCopy`: `scp` from a device exposing a root shell over SSH
//!
//! The strategy is chosen once per snapshot operation.

pub mod scp;
pub mod stream;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::capture::ScopeArchive;
use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::platform::Platform;

pub use scp::SecureCopy;
pub use stream::DirectStream;

#[async_trait]
pub trait TransferStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Copy one device file to `local`. Implementations must not leave a
    /// file at `local` when they fail.
    async fn fetch(&self, remote: &str, local: &Path) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    DirectStream,
    SecureCopy,
}

/// `--ssh` forces secure copy; otherwise only a jailbroken iOS device uses it.
pub fn select_strategy(platform: Platform, elevated: bool, force_ssh: bool) -> StrategyKind {
    if force_ssh || (platform == Platform::Ios && elevated) {
        StrategyKind::SecureCopy
    } else {
        StrategyKind::DirectStream
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl From<&TransferConfig> for RetryPolicy {
    fn from(config: &TransferConfig) -> Self {
        RetryPolicy {
            attempts: config.attempts.max(1),
            delay: config.retry_delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Local destination for a scope archive.
pub fn archive_path(target_dir: &Path, scope: &str) -> PathBuf {
    target_dir.join(format!("{scope}.zip"))
}

/// Transfer every archive in order, reporting `(scope, current, total)`
/// before each one. Stops at the first archive that still fails after the
/// retry policy is exhausted.
pub async fn transfer_all<F>(
    archives: &[ScopeArchive],
    target_dir: &Path,
    strategy: &dyn TransferStrategy,
    retry: RetryPolicy,
    mut on_progress: F,
) -> Result<Vec<PathBuf>>
where
    F: FnMut(&str, usize, usize) + Send,
{
    let total = archives.len();
    let mut transferred = Vec::with_capacity(total);

    for (i, archive) in archives.iter().enumerate() {
        on_progress(&archive.scope, i + 1, total);

        let local = archive_path(target_dir, &archive.scope);
        fetch_with_retry(strategy, &archive.device_path, &local, retry)
            .await
            .map_err(|e| Error::transfer(&archive.scope, e))?;

        tracing::info!(scope = %archive.scope, strategy = strategy.name(), "archive transferred");
        transferred.push(local);
    }

    Ok(transferred)
}

async fn fetch_with_retry(strategy: &dyn TransferStrategy, remote: &str, local: &Path, retry: RetryPolicy) -> Result<()> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;

    loop {
        match strategy.fetch(remote, local).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                tracing::warn!(remote, attempt, error = %e, "transfer attempt failed, retrying");
                tokio::time::sleep(retry.delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
