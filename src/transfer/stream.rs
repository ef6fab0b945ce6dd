use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::TransferStrategy;
use crate::bridge::Connection;
use crate::error::Result;

/// Pulls a device file through the open bridge session in fixed-size chunks.
///
/// Data lands in `<local>.part` and is renamed into place once the final
/// (empty) chunk arrives, so a reader never sees a truncated archive under
/// its real name.
pub struct DirectStream<'a> {
    conn: &'a Connection,
    chunk_size: usize,
}

impl<'a> DirectStream<'a> {
    pub fn new(conn: &'a Connection, chunk_size: usize) -> Self {
        DirectStream {
            conn,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn stream_to(&self, remote: &str, part: &Path) -> Result<u64> {
        let mut file = tokio::fs::File::create(part).await?;
        let mut offset = 0u64;

        loop {
            let chunk = self.conn.read_chunk(remote, offset, self.chunk_size).await?;
            if chunk.is_empty() {
                break;
            }
            file.write_all(&chunk).await?;
            offset += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(offset)
    }
}

#[async_trait]
impl TransferStrategy for DirectStream<'_> {
    fn name(&self) -> &'static str {
        "direct-stream"
    }

    async fn fetch(&self, remote: &str, local: &Path) -> Result<()> {
        let part = part_path(local);

        match self.stream_to(remote, &part).await {
            Ok(bytes) => {
                tokio::fs::rename(&part, local).await?;
                tracing::debug!(remote, bytes, "streamed");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

pub(crate) fn part_path(local: &Path) -> PathBuf {
    let mut name: OsString = local.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    local.with_file_name(name)
}
