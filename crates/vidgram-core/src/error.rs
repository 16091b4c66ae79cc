//! Error types for Vidgram core operations.

use thiserror::Error;

use crate::session::{SessionEventKind, SessionState};

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving an acquisition session.
#[derive(Debug, Error)]
pub enum Error {
    /// The submitted text does not match any supported link shape.
    #[error("Invalid media URL: {0}")]
    InvalidUrl(String),

    /// The provider reports the resource as private, deleted, or geo-blocked.
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    /// Required metadata fields (title, author, duration) could not be obtained.
    #[error("Incomplete metadata: missing {0}")]
    MetadataIncomplete(String),

    /// No candidate stream carries both audio and video in the target container.
    #[error("No suitable stream among {candidates} candidates")]
    NoSuitableStream {
        /// Number of candidate streams that were considered.
        candidates: usize,
    },

    /// The download exceeded the configured artifact size cap.
    #[error("Download exceeded size cap: {received} bytes received, cap is {cap}")]
    SizeExceeded {
        /// Bytes received before the transfer was aborted.
        received: u64,
        /// Configured maximum artifact size in bytes.
        cap: u64,
    },

    /// Transport or provider failure while materializing a stream.
    #[error("Download failed: {0}")]
    Download(String),

    /// Audio extraction from the downloaded container failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// The chat transport rejected the finished artifact.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// The session idled past its timeout window.
    #[error("Session expired for user {0}")]
    SessionExpired(i64),

    /// An event arrived that does not match the session's current state.
    #[error("Invalid transition: {event} while {state}")]
    InvalidTransition {
        /// State the session was in when the event arrived.
        state: SessionState,
        /// The rejected event, by name.
        event: SessionEventKind,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any uncategorized failure. Logged with full context, surfaced generically.
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Recovery routing for an error, as seen by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Recoverable locally: the session returns to awaiting a URL and the
    /// user may retry without restarting the flow.
    Validation,
    /// Terminal for the current attempt: cleanup runs and the session resets
    /// to idle. No automatic retry.
    Execution,
    /// Session desynchronization: always routes to idle with a restart prompt.
    Desync,
    /// Uncategorized internal failure: cleanup still runs, generic message.
    Internal,
}

impl Error {
    /// Classify this error for recovery routing.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidUrl(_)
            | Self::SourceUnavailable(_)
            | Self::MetadataIncomplete(_)
            | Self::NoSuitableStream { .. } => ErrorClass::Validation,
            Self::SizeExceeded { .. }
            | Self::Download(_)
            | Self::Conversion(_)
            | Self::Delivery(_) => ErrorClass::Execution,
            Self::SessionExpired(_) | Self::InvalidTransition { .. } => ErrorClass::Desync,
            Self::Configuration(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Unexpected(_) => ErrorClass::Internal,
        }
    }

    /// Short category label safe to show to the user. Internal detail is
    /// never exposed beyond this label.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid link",
            Self::SourceUnavailable(_) => "source unavailable",
            Self::MetadataIncomplete(_) => "metadata incomplete",
            Self::NoSuitableStream { .. } => "no suitable stream",
            Self::SizeExceeded { .. } => "file too large",
            Self::Download(_) => "download failed",
            Self::Conversion(_) => "conversion failed",
            Self::Delivery(_) => "delivery failed",
            Self::SessionExpired(_) => "session expired",
            Self::InvalidTransition { .. } => "session out of sync",
            Self::Configuration(_) | Self::Io(_) | Self::Serialization(_) | Self::Unexpected(_) => {
                "internal error"
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidUrl("ftp://nope".to_string());
        assert_eq!(err.to_string(), "Invalid media URL: ftp://nope");
    }

    #[test]
    fn test_size_exceeded_display() {
        let err = Error::SizeExceeded {
            received: 60_000_000,
            cap: 50_000_000,
        };
        assert!(err.to_string().contains("60000000"));
        assert!(err.to_string().contains("50000000"));
    }

    #[test]
    fn test_validation_class() {
        assert_eq!(
            Error::InvalidUrl(String::new()).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            Error::NoSuitableStream { candidates: 3 }.class(),
            ErrorClass::Validation
        );
    }

    #[test]
    fn test_execution_class() {
        assert_eq!(
            Error::Download("timeout".to_string()).class(),
            ErrorClass::Execution
        );
        assert_eq!(
            Error::SizeExceeded {
                received: 1,
                cap: 1
            }
            .class(),
            ErrorClass::Execution
        );
    }

    #[test]
    fn test_desync_class() {
        assert_eq!(Error::SessionExpired(7).class(), ErrorClass::Desync);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.class(), ErrorClass::Internal);
    }

    #[test]
    fn test_category_never_leaks_detail() {
        let err = Error::Download("token=secret123".to_string());
        assert!(!err.category().contains("secret123"));
    }
}
