//! Vidgram Core Library
//!
//! This crate provides the core of a chat-driven media downloader:
//! - Per-user acquisition sessions with an explicit state graph and TTL
//! - Link-shape validation and media resolution through a provider trait
//! - Size-bounded downloads into session-namespaced scratch files
//! - Audio extraction and delivery handoff to an external chat transport
//! - Guaranteed cleanup of every artifact a session produced
//!
//! The chat transport, the media-source library, and the transcoder are
//! external collaborators consumed through the [`ChatTransport`],
//! [`MediaProvider`], and [`AudioTranscoder`] traits.

pub mod cleanup;
pub mod config;
pub mod delivery;
pub mod download;
pub mod error;
pub mod extract;
pub mod media;
pub mod pipeline;
pub mod session;
pub mod url;

pub use cleanup::CleanupManager;
pub use config::{AppConfig, ConfigManager};
pub use delivery::{
    AudioMetadata, ChatAction, ChatTransport, DeliveryAdapter, DeliveryKind, VideoMetadata,
};
pub use download::DownloadExecutor;
pub use error::{Error, ErrorClass, Result};
pub use extract::{AudioExtractor, AudioTranscoder};
pub use media::{
    ByteSource, Container, MediaProvider, OutputFormat, ResolvedMedia, StreamDescriptor, VideoMeta,
    select_stream,
};
pub use pipeline::SessionPipeline;
pub use session::{Session, SessionState, SessionStore, UserId};
pub use url::{UrlShape, ValidatedUrl, validate_url};
