//! Download execution: materializing one selected stream into a
//! session-scoped scratch file under a size cap.
//!
//! Paths are derived from the session id and a role tag, never a fixed
//! global filename, so concurrent sessions cannot collide on storage.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::cleanup::CleanupManager;
use crate::error::{Error, Result};
use crate::media::{MediaProvider, StreamDescriptor};
use crate::session::UserId;

/// Transfer copy buffer size.
const CHUNK_BYTES: usize = 64 * 1024;

/// Role tag for the downloaded container artifact.
pub const ROLE_RAW: &str = "raw";

/// Role tag for the extracted audio artifact.
pub const ROLE_AUDIO: &str = "audio";

/// Materializes streams into scratch files, enforcing the artifact size cap.
#[derive(Debug, Clone)]
pub struct DownloadExecutor {
    scratch_dir: PathBuf,
    max_bytes: u64,
}

impl DownloadExecutor {
    /// Create an executor writing into `scratch_dir` with the given cap.
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_bytes,
        }
    }

    /// The scratch path for a session artifact: `{session}-{role}.{ext}`.
    #[must_use]
    pub fn artifact_path(&self, session: UserId, role: &str, ext: &str) -> PathBuf {
        self.scratch_dir.join(format!("{session}-{role}.{ext}"))
    }

    /// Download one stream into the session's `raw` artifact.
    ///
    /// The artifact path is registered with the cleanup manager before any
    /// byte is written, so even a fetch cancelled at its deadline leaves
    /// its partial file covered by the session's `release_all`. The running
    /// total is checked against the cap as bytes arrive; on overflow the
    /// transfer is aborted, the partial file removed, and
    /// [`Error::SizeExceeded`] returned. Any transport failure likewise
    /// removes the partial file before returning.
    ///
    /// # Errors
    ///
    /// Returns `SizeExceeded` or `Download` as described above.
    pub async fn fetch<P>(
        &self,
        provider: &P,
        stream: &StreamDescriptor,
        session: UserId,
        cleanup: &CleanupManager,
    ) -> Result<PathBuf>
    where
        P: MediaProvider + ?Sized,
    {
        let path = self.artifact_path(session, ROLE_RAW, stream.container.extension());
        debug!(
            session = %session,
            path = %path.display(),
            declared = ?stream.approx_bytes,
            "starting download"
        );

        // Registered up front: a future dropped mid-transfer cannot run
        // its own removal, so the path must already be release_all's to
        // reclaim.
        cleanup.register(session, &path).await;

        let mut source = provider.open(stream).await?;
        let mut file = File::create(&path)
            .await
            .map_err(|e| Error::Download(format!("cannot create scratch file: {e}")))?;

        let mut total: u64 = 0;
        let mut buf = vec![0u8; CHUNK_BYTES];
        loop {
            let n = match source.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    drop(file);
                    remove_partial(&path).await;
                    return Err(Error::Download(format!("stream read failed: {e}")));
                }
            };

            total += n as u64;
            if total > self.max_bytes {
                warn!(
                    session = %session,
                    received = total,
                    cap = self.max_bytes,
                    "aborting oversize download"
                );
                drop(file);
                remove_partial(&path).await;
                return Err(Error::SizeExceeded {
                    received: total,
                    cap: self.max_bytes,
                });
            }

            if let Err(e) = file.write_all(&buf[..n]).await {
                drop(file);
                remove_partial(&path).await;
                return Err(Error::Download(format!("scratch write failed: {e}")));
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            remove_partial(&path).await;
            return Err(Error::Download(format!("scratch flush failed: {e}")));
        }

        info!(session = %session, bytes = total, path = %path.display(), "download complete");
        Ok(path)
    }
}

/// Best-effort removal of a partial file after a failed transfer.
async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial file");
        }
    }
}
