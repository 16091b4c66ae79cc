//! Delivery handoff to the external chat transport.
//!
//! The transport (message framing, buttons, upload mechanics) is opaque
//! behind [`ChatTransport`]. This module owns the metadata truncation
//! policy: fields are cut to the transport's known limits, never rejected.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::media::VideoMeta;
use crate::session::UserId;

/// Maximum length for title-like fields (audio title, performer).
pub const MAX_TITLE_CHARS: usize = 60;

/// Maximum length for captions.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// What kind of artifact is being delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryKind {
    /// Audio-only artifact.
    Audio,
    /// Video artifact.
    Video,
}

/// Chat-activity hint shown to the user while the core works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    /// Generic "typing" hint.
    Typing,
    /// "Uploading audio" hint.
    UploadAudio,
    /// "Uploading video" hint.
    UploadVideo,
}

/// Metadata attached to an audio delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioMetadata {
    /// Track title.
    pub title: String,
    /// Performer/channel name.
    pub performer: String,
    /// Duration in seconds.
    pub duration_secs: u64,
}

/// Metadata attached to a video delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    /// Caption shown with the video.
    pub caption: String,
}

/// The external chat transport, at its interface boundary.
///
/// All operations are opaque calls; the core knows nothing about framing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a plain text message.
    async fn send_text(&self, user: UserId, text: &str) -> Result<()>;

    /// Send a photo by URL with a caption.
    async fn send_photo(&self, user: UserId, photo_url: &str, caption: &str) -> Result<()>;

    /// Send an audio file with metadata.
    async fn send_audio(&self, user: UserId, path: &Path, meta: &AudioMetadata) -> Result<()>;

    /// Send a video file with a caption.
    async fn send_video(&self, user: UserId, path: &Path, meta: &VideoMetadata) -> Result<()>;

    /// Show a chat-activity hint.
    async fn send_chat_action(&self, user: UserId, action: ChatAction) -> Result<()>;
}

/// Hands finished artifacts to the chat transport with truncated metadata.
#[derive(Debug)]
pub struct DeliveryAdapter<C: ?Sized> {
    transport: Arc<C>,
}

impl<C> DeliveryAdapter<C>
where
    C: ChatTransport + ?Sized,
{
    /// Create an adapter over a transport.
    pub fn new(transport: Arc<C>) -> Self {
        Self { transport }
    }

    /// Deliver a finished artifact with its descriptive metadata.
    ///
    /// Metadata fields are truncated to the transport's limits; delivery
    /// failure does not imply the artifact is corrupt, but it is terminal
    /// for the current attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Delivery`] if the transport rejects the payload.
    pub async fn deliver(
        &self,
        user: UserId,
        artifact: &Path,
        kind: DeliveryKind,
        meta: &VideoMeta,
    ) -> Result<()> {
        debug!(user = %user, kind = ?kind, path = %artifact.display(), "delivering artifact");
        let result = match kind {
            DeliveryKind::Audio => {
                let audio_meta = AudioMetadata {
                    title: truncate_chars(&meta.title, MAX_TITLE_CHARS),
                    performer: truncate_chars(&meta.author, MAX_TITLE_CHARS),
                    duration_secs: meta.duration_secs,
                };
                self.transport.send_audio(user, artifact, &audio_meta).await
            }
            DeliveryKind::Video => {
                let video_meta = VideoMetadata {
                    caption: truncate_chars(&meta.title, MAX_CAPTION_CHARS),
                };
                self.transport.send_video(user, artifact, &video_meta).await
            }
        };

        match result {
            Ok(()) => {
                info!(user = %user, kind = ?kind, "artifact delivered");
                Ok(())
            }
            Err(e) => Err(match e {
                delivery @ Error::Delivery(_) => delivery,
                other => Error::Delivery(other.to_string()),
            }),
        }
    }
}

/// Truncate to at most `max` characters, on a char boundary.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
