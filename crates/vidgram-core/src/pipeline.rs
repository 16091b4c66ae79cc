//! The session pipeline: orchestrates one acquisition flow per user.
//!
//! Drives validate → resolve → await format choice → download (+ extract
//! when audio was requested) → deliver → cleanup → reset to idle. On any
//! component failure the pipeline classifies the error, sends a single
//! user-facing notification, releases the session's artifacts, and routes
//! the session per the recovery policy. It never leaves a session stuck
//! in `Processing`.

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::cleanup::CleanupManager;
use crate::config::AppConfig;
use crate::delivery::{ChatAction, ChatTransport, DeliveryAdapter, DeliveryKind};
use crate::download::DownloadExecutor;
use crate::error::{Error, ErrorClass, Result};
use crate::extract::{AudioExtractor, AudioTranscoder};
use crate::media::{
    Container, MediaProvider, OutputFormat, StreamDescriptor, VideoMeta, select_stream,
};
use crate::session::{SessionEvent, SessionEventKind, SessionState, SessionStore, UserId};
use crate::url::validate_url;

/// Container the delivery targets; the selection policy only considers
/// self-contained streams in this container.
const TARGET_CONTAINER: Container = Container::Mp4;

const MSG_SEND_LINK: &str = "Send the link of the video you want to download.";
const MSG_DOWNLOADING: &str = "Downloading, this can take a while...";
const MSG_BUSY: &str = "Still working on your previous request, hang on.";
const MSG_RESTART: &str = "Your session expired or got out of sync. Please start over.";
const MSG_INTERNAL: &str = "Something went wrong on our side. Please try again later.";

/// Orchestrates per-user acquisition sessions.
///
/// Many sessions run concurrently; within one session, operations are
/// strictly sequential, and a second event for a user whose session is in
/// `Processing` is rejected as busy rather than queued.
pub struct SessionPipeline<P, T, C>
where
    P: MediaProvider,
    T: AudioTranscoder,
    C: ChatTransport,
{
    config: AppConfig,
    store: SessionStore,
    cleanup: CleanupManager,
    downloader: DownloadExecutor,
    extractor: AudioExtractor,
    delivery: DeliveryAdapter<C>,
    provider: Arc<P>,
    transcoder: Arc<T>,
    transport: Arc<C>,
}

impl<P, T, C> SessionPipeline<P, T, C>
where
    P: MediaProvider,
    T: AudioTranscoder,
    C: ChatTransport,
{
    /// Create a pipeline, validating the configuration and ensuring the
    /// scratch directory exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be created.
    pub fn new(
        mut config: AppConfig,
        provider: Arc<P>,
        transcoder: Arc<T>,
        transport: Arc<C>,
    ) -> Result<Self> {
        config.validate();
        std::fs::create_dir_all(&config.scratch_dir).map_err(|e| {
            Error::Configuration(format!(
                "cannot create scratch directory {}: {e}",
                config.scratch_dir.display()
            ))
        })?;

        let store = SessionStore::new(config.session_timeout(), config.processing_grace());
        let downloader = DownloadExecutor::new(&config.scratch_dir, config.max_artifact_bytes);
        let extractor = AudioExtractor::new(&config.scratch_dir);
        let delivery = DeliveryAdapter::new(Arc::clone(&transport));
        info!(scratch = %config.scratch_dir.display(), "pipeline ready");

        Ok(Self {
            config,
            store,
            cleanup: CleanupManager::new(),
            downloader,
            extractor,
            delivery,
            provider,
            transcoder,
            transport,
        })
    }

    /// The session store, for inspection.
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The cleanup manager, for inspection.
    pub const fn cleanup(&self) -> &CleanupManager {
        &self.cleanup
    }

    /// The active configuration.
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The user declared download intent: move `Idle` → `AwaitingUrl` and
    /// prompt for a link.
    ///
    /// # Errors
    ///
    /// Returns the classified error after it has been reported and routed.
    pub async fn handle_download_intent(&self, user: UserId) -> Result<()> {
        match self.store.advance(user, SessionEvent::DownloadIntent).await {
            Ok(_) => {
                self.notify(user, MSG_SEND_LINK).await;
                Ok(())
            }
            Err(e) => Err(self.fail(user, e).await),
        }
    }

    /// A text message arrived while a link was expected: validate it,
    /// resolve it, cache the result, and prompt for a format choice.
    ///
    /// # Errors
    ///
    /// Returns the classified error after it has been reported and routed.
    /// Validation-class failures leave the session in `AwaitingUrl` so the
    /// user can retry with another link.
    pub async fn handle_url(&self, user: UserId, text: &str) -> Result<()> {
        let state = self.store.get(user).await.state;
        if state != SessionState::AwaitingUrl {
            let err = Error::InvalidTransition {
                state,
                event: SessionEventKind::UrlResolved,
            };
            return Err(self.fail(user, err).await);
        }

        match self.resolve_and_prompt(user, text).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(user, e).await),
        }
    }

    async fn resolve_and_prompt(&self, user: UserId, text: &str) -> Result<()> {
        let validated = validate_url(text)?;
        debug!(user = %user, video_id = %validated.video_id, shape = %validated.shape, "link validated");

        let resolved = self.provider.resolve(&validated).await?;
        let meta = resolved.meta.clone();
        require_complete(&meta)?;

        self.store
            .advance(
                user,
                SessionEvent::UrlResolved {
                    url: validated.raw,
                    meta: meta.clone(),
                    streams: resolved.streams,
                },
            )
            .await?;

        let caption = format!(
            "{}\n{} \u{b7} {}\nChoose a format: audio or video.",
            meta.title,
            meta.author,
            format_duration(meta.duration_secs)
        );
        match &meta.thumbnail_url {
            Some(thumb) => {
                if let Err(e) = self.transport.send_photo(user, thumb, &caption).await {
                    warn!(user = %user, error = %e, "format prompt photo failed, falling back to text");
                    self.notify(user, &caption).await;
                }
            }
            None => self.notify(user, &caption).await,
        }
        Ok(())
    }

    /// The user chose a format: select a stream, enter `Processing`, run
    /// the attempt, and resolve the session. Artifacts are released and
    /// the session leaves `Processing` on every path through here.
    ///
    /// # Errors
    ///
    /// Returns the classified error after it has been reported and routed.
    pub async fn handle_format(&self, user: UserId, format: OutputFormat) -> Result<()> {
        let session = self.store.get(user).await;
        if session.state != SessionState::AwaitingFormat {
            let err = Error::InvalidTransition {
                state: session.state,
                event: SessionEventKind::FormatChosen,
            };
            return Err(self.fail(user, err).await);
        }

        // Selection policy is applied here, not in the resolver, so it
        // stays swappable.
        let stream = match select_stream(&session.candidate_streams, TARGET_CONTAINER) {
            Ok(stream) => stream.clone(),
            Err(e) => return Err(self.fail(user, e).await),
        };
        let Some(meta) = session.metadata else {
            let err = Error::Unexpected(format!("no cached metadata for user {user}"));
            return Err(self.fail(user, err).await);
        };

        if let Err(e) = self
            .store
            .advance(
                user,
                SessionEvent::FormatChosen {
                    format,
                    stream: stream.clone(),
                },
            )
            .await
        {
            return Err(self.fail(user, e).await);
        }

        info!(user = %user, format = %format, "processing attempt started");
        let outcome = self.run_processing(user, format, &stream, &meta).await;

        // Terminal for this attempt, whatever happened above.
        self.cleanup.release_all(user).await;
        if self
            .store
            .advance(user, SessionEvent::Finished)
            .await
            .is_err()
        {
            self.store.reset(user).await;
        }

        match outcome {
            Ok(()) => {
                info!(user = %user, format = %format, "processing attempt delivered");
                self.notify(user, &format!("Done! Delivered as {format}.")).await;
                Ok(())
            }
            Err(e) => {
                error!(user = %user, error = %e, "processing attempt failed");
                self.notify(user, &failure_message(&e)).await;
                Err(e)
            }
        }
    }

    /// One download/extract/deliver attempt, each stage under its deadline.
    async fn run_processing(
        &self,
        user: UserId,
        format: OutputFormat,
        stream: &StreamDescriptor,
        meta: &VideoMeta,
    ) -> Result<()> {
        let action = match format {
            OutputFormat::Audio => ChatAction::UploadAudio,
            OutputFormat::Video => ChatAction::UploadVideo,
        };
        if let Err(e) = self.transport.send_chat_action(user, action).await {
            debug!(user = %user, error = %e, "chat action hint failed");
        }
        self.notify(user, MSG_DOWNLOADING).await;

        let raw = timeout(
            self.config.download_timeout(),
            self.downloader
                .fetch(self.provider.as_ref(), stream, user, &self.cleanup),
        )
        .await
        .map_err(|_| Error::Download("download deadline exceeded".to_string()))??;

        let (artifact, kind) = match format {
            OutputFormat::Video => (raw, DeliveryKind::Video),
            OutputFormat::Audio => {
                let audio = timeout(
                    self.config.convert_timeout(),
                    self.extractor
                        .extract(self.transcoder.as_ref(), &raw, user, &self.cleanup),
                )
                .await
                .map_err(|_| Error::Conversion("conversion deadline exceeded".to_string()))??;
                (audio, DeliveryKind::Audio)
            }
        };

        timeout(
            self.config.deliver_timeout(),
            self.delivery.deliver(user, &artifact, kind, meta),
        )
        .await
        .map_err(|_| Error::Delivery("delivery deadline exceeded".to_string()))??;

        Ok(())
    }

    /// Sweep sessions idle past the TTL, releasing any artifacts an
    /// orphaned `Processing` session still held. Returns the swept users.
    pub async fn sweep_expired(&self) -> Vec<UserId> {
        let swept = self.store.sweep_expired().await;
        for user in &swept {
            self.cleanup.release_all(*user).await;
        }
        swept
    }

    /// Report a pre-processing failure once and route the session.
    async fn fail(&self, user: UserId, err: Error) -> Error {
        match err.class() {
            ErrorClass::Validation => {
                warn!(user = %user, error = %err, "recoverable failure");
                self.store.rewind_to_awaiting_url(user).await;
            }
            ErrorClass::Desync if is_busy(&err) => {
                // The in-flight attempt owns the session and its
                // artifacts; reject the newcomer and touch nothing.
                debug!(user = %user, "busy rejection");
                self.notify(user, MSG_BUSY).await;
                return err;
            }
            ErrorClass::Desync => {
                warn!(user = %user, error = %err, "session desynced");
                self.cleanup.release_all(user).await;
                self.store.reset(user).await;
            }
            ErrorClass::Execution | ErrorClass::Internal => {
                error!(user = %user, error = %err, "attempt failed");
                self.cleanup.release_all(user).await;
                self.store.reset(user).await;
            }
        }
        self.notify(user, &failure_message(&err)).await;
        err
    }

    /// Best-effort text send; a lost notification must not fail the flow.
    async fn notify(&self, user: UserId, text: &str) {
        if let Err(e) = self.transport.send_text(user, text).await {
            warn!(user = %user, error = %e, "notification failed");
        }
    }
}

/// Whether an error is the busy-rejection case: an event that arrived
/// while the session was `Processing`.
const fn is_busy(err: &Error) -> bool {
    matches!(
        err,
        Error::InvalidTransition {
            state: SessionState::Processing,
            ..
        }
    )
}

/// The one user-facing line for a failed attempt. Internal detail never
/// goes past the category label.
fn failure_message(err: &Error) -> String {
    match err.class() {
        ErrorClass::Validation => {
            format!("That link didn't work ({}). Send another one.", err.category())
        }
        ErrorClass::Execution => format!(
            "The attempt failed ({}). Start over to retry.",
            err.category()
        ),
        ErrorClass::Desync => MSG_RESTART.to_string(),
        ErrorClass::Internal => MSG_INTERNAL.to_string(),
    }
}

/// Format a duration in seconds as `m:ss` / `h:mm:ss`.
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}

/// Reject resolutions that are missing required descriptive fields.
fn require_complete(meta: &VideoMeta) -> Result<()> {
    if meta.title.trim().is_empty() {
        return Err(Error::MetadataIncomplete("title".to_string()));
    }
    if meta.author.trim().is_empty() {
        return Err(Error::MetadataIncomplete("author".to_string()));
    }
    if meta.duration_secs == 0 {
        return Err(Error::MetadataIncomplete("duration".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(125), "2:05");
        assert_eq!(format_duration(59), "0:59");
        assert_eq!(format_duration(3700), "1:01:40");
    }

    #[test]
    fn test_busy_detection() {
        assert!(is_busy(&Error::InvalidTransition {
            state: SessionState::Processing,
            event: SessionEventKind::DownloadIntent,
        }));
        assert!(!is_busy(&Error::InvalidTransition {
            state: SessionState::Idle,
            event: SessionEventKind::Finished,
        }));
        assert!(!is_busy(&Error::SessionExpired(1)));
    }

    #[test]
    fn test_failure_message_shows_category_only() {
        let msg = failure_message(&Error::Download("http 500 from edge-cache-7".to_string()));
        assert!(msg.contains("download failed"));
        assert!(!msg.contains("edge-cache-7"));
    }
}
