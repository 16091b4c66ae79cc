//! Media resolution types, the provider boundary, and stream selection.
//!
//! The media-source library itself is a black box behind [`MediaProvider`]:
//! the core only sees descriptive metadata plus a list of candidate stream
//! descriptors, and opens exactly one of them per download attempt.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::{Error, Result};
use crate::url::ValidatedUrl;

/// Descriptive metadata for a resolved media source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMeta {
    /// Title of the source.
    pub title: String,
    /// Channel/uploader name.
    pub author: String,
    /// Duration in seconds.
    pub duration_secs: u64,
    /// Thumbnail URL, when the provider exposes one.
    pub thumbnail_url: Option<String>,
}

/// Container format of a candidate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    /// MP4 container.
    Mp4,
    /// WebM container.
    Webm,
    /// 3GP container.
    ThreeGp,
}

impl Container {
    /// Filename extension for artifacts in this container.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::ThreeGp => "3gp",
        }
    }
}

impl std::fmt::Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// Output format the user can request for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Audio-only delivery (MP3, extracted from the downloaded container).
    Audio,
    /// Video delivery (the downloaded container as-is).
    Video,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// A provider-reported candidate encoding of the source media.
///
/// Immutable value; the `handle` is resolvable to a byte source exactly once
/// per download attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// Container format.
    pub container: Container,
    /// Vertical resolution class, when known.
    pub height: Option<u32>,
    /// Bitrate class in kbps, when known.
    pub bitrate_kbps: Option<u32>,
    /// Declared byte size; may be absent or approximate.
    pub approx_bytes: Option<u64>,
    /// Whether the stream carries an audio track.
    pub has_audio: bool,
    /// Whether the stream carries a video track.
    pub has_video: bool,
    /// Opaque provider handle used to open the byte source.
    pub handle: String,
}

impl StreamDescriptor {
    /// Whether the stream is self-contained: audio and video in one
    /// container, no muxing required.
    #[must_use]
    pub const fn is_progressive(&self) -> bool {
        self.has_audio && self.has_video
    }
}

/// Resolution result: metadata plus every stream the provider exposes.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    /// Descriptive metadata.
    pub meta: VideoMeta,
    /// Candidate streams, unfiltered.
    pub streams: Vec<StreamDescriptor>,
}

/// Byte source for one stream download attempt.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

/// The external media-source provider, at its interface boundary.
///
/// Implementations are expected to report unavailable sources (private,
/// deleted, geo-blocked) as [`Error::SourceUnavailable`] and missing
/// required metadata as [`Error::MetadataIncomplete`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Resolve a validated link into metadata and candidate streams.
    ///
    /// # Errors
    ///
    /// Returns `SourceUnavailable` or `MetadataIncomplete` as described
    /// above, or any other resolution failure the provider reports.
    async fn resolve(&self, url: &ValidatedUrl) -> Result<ResolvedMedia>;

    /// Open the byte source for one stream. Valid exactly once per
    /// download attempt.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider cannot open the stream.
    async fn open(&self, stream: &StreamDescriptor) -> Result<ByteSource>;
}

/// Stream selection policy: among self-contained streams whose container
/// matches the target delivery container, pick the highest resolution.
///
/// Deliberately conservative: adaptive streams (separate audio/video
/// tracks) are ignored even when they offer higher quality, because this
/// core never attempts to mux.
///
/// # Errors
///
/// Returns [`Error::NoSuitableStream`] when no candidate qualifies.
pub fn select_stream(streams: &[StreamDescriptor], target: Container) -> Result<&StreamDescriptor> {
    let selected = streams
        .iter()
        .filter(|s| s.is_progressive() && s.container == target)
        .max_by_key(|s| s.height.unwrap_or(0));

    match selected {
        Some(stream) => {
            debug!(
                container = %stream.container,
                height = ?stream.height,
                "selected stream"
            );
            Ok(stream)
        }
        None => Err(Error::NoSuitableStream {
            candidates: streams.len(),
        }),
    }
}
