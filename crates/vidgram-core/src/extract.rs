//! Audio extraction from a downloaded container artifact.
//!
//! The container-to-audio transform itself is external, behind
//! [`AudioTranscoder`]; this module owns the session-scoped output path,
//! failure cleanup of partial output, and cleanup registration.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cleanup::CleanupManager;
use crate::download::ROLE_AUDIO;
use crate::error::{Error, Result};
use crate::session::UserId;

/// Extension of extracted audio artifacts.
const AUDIO_EXT: &str = "mp3";

/// The external container-to-audio transform, at its interface boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    /// Write an audio-only rendition of `input` to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container has no audio track or the
    /// transform fails; a partial `output` may be left behind and is the
    /// caller's to remove.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Derives a session-scoped audio artifact from a downloaded container.
#[derive(Debug, Clone)]
pub struct AudioExtractor {
    scratch_dir: PathBuf,
}

impl AudioExtractor {
    /// Create an extractor writing into `scratch_dir`.
    #[must_use]
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Extract audio from `container` into the session's `audio` artifact.
    ///
    /// The output path is registered with the cleanup manager before the
    /// transcoder runs, so even a transform cancelled at its deadline
    /// leaves its partial output covered by the session's `release_all`.
    /// On failure, any partially written audio artifact is removed; the
    /// source container is never deleted here; its lifetime belongs to
    /// the cleanup manager at session resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conversion`] if the transform fails.
    pub async fn extract<T>(
        &self,
        transcoder: &T,
        container: &Path,
        session: UserId,
        cleanup: &CleanupManager,
    ) -> Result<PathBuf>
    where
        T: AudioTranscoder + ?Sized,
    {
        let output = self
            .scratch_dir
            .join(format!("{session}-{ROLE_AUDIO}.{AUDIO_EXT}"));
        debug!(
            session = %session,
            input = %container.display(),
            output = %output.display(),
            "extracting audio"
        );

        // Registered up front so a transform abandoned mid-write is still
        // reclaimed by release_all.
        cleanup.register(session, &output).await;

        if let Err(e) = transcoder.transcode(container, &output).await {
            remove_partial(&output).await;
            let err = match e {
                conversion @ Error::Conversion(_) => conversion,
                other => Error::Conversion(other.to_string()),
            };
            return Err(err);
        }

        info!(session = %session, output = %output.display(), "audio extraction complete");
        Ok(output)
    }
}

/// Best-effort removal of a partial audio artifact after a failed transform.
async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial audio artifact");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_extract_registers_audio_artifact() {
        let dir = TempDir::new().expect("tempdir");
        let extractor = AudioExtractor::new(dir.path());
        let cleanup = CleanupManager::new();
        let container = dir.path().join("5-raw.mp4");
        tokio::fs::write(&container, b"container").await.expect("write");

        let mut transcoder = MockAudioTranscoder::new();
        transcoder.expect_transcode().returning(|_, output| {
            std::fs::write(output, b"audio").map_err(Error::Io)?;
            Ok(())
        });

        let path = extractor
            .extract(&transcoder, &container, UserId(5), &cleanup)
            .await
            .expect("extract");

        assert_eq!(path, dir.path().join("5-audio.mp3"));
        assert!(path.exists());
        assert_eq!(cleanup.registered(UserId(5)).await, vec![path]);
    }

    #[tokio::test]
    async fn test_failed_transform_removes_partial_output() {
        let dir = TempDir::new().expect("tempdir");
        let extractor = AudioExtractor::new(dir.path());
        let cleanup = CleanupManager::new();
        let container = dir.path().join("5-raw.mp4");
        tokio::fs::write(&container, b"container").await.expect("write");

        let mut transcoder = MockAudioTranscoder::new();
        transcoder.expect_transcode().returning(|_, output| {
            // Simulate a transform that dies mid-write.
            std::fs::write(output, b"trunc").map_err(Error::Io)?;
            Err(Error::Conversion("no audio track".to_string()))
        });

        let err = extractor
            .extract(&transcoder, &container, UserId(5), &cleanup)
            .await
            .expect_err("must fail");

        assert!(matches!(err, Error::Conversion(_)));
        assert!(!dir.path().join("5-audio.mp3").exists());
        // The path stays registered until the session resolves.
        assert_eq!(
            cleanup.registered(UserId(5)).await,
            vec![dir.path().join("5-audio.mp3")]
        );
    }

    #[tokio::test]
    async fn test_source_container_is_never_deleted_here() {
        let dir = TempDir::new().expect("tempdir");
        let extractor = AudioExtractor::new(dir.path());
        let cleanup = CleanupManager::new();
        let container = dir.path().join("5-raw.mp4");
        tokio::fs::write(&container, b"container").await.expect("write");

        let mut transcoder = MockAudioTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_, _| Err(Error::Conversion("boom".to_string())));

        let _ = extractor
            .extract(&transcoder, &container, UserId(5), &cleanup)
            .await;
        assert!(container.exists());
    }

    #[tokio::test]
    async fn test_uncategorized_transform_failure_maps_to_conversion() {
        let dir = TempDir::new().expect("tempdir");
        let extractor = AudioExtractor::new(dir.path());
        let cleanup = CleanupManager::new();
        let container = dir.path().join("5-raw.mp4");
        tokio::fs::write(&container, b"container").await.expect("write");

        let mut transcoder = MockAudioTranscoder::new();
        transcoder
            .expect_transcode()
            .returning(|_, _| Err(Error::Unexpected("codec crashed".to_string())));

        let err = extractor
            .extract(&transcoder, &container, UserId(5), &cleanup)
            .await
            .expect_err("must fail");
        assert!(matches!(err, Error::Conversion(_)));
    }
}
