//! Per-user acquisition sessions and the keyed session store.
//!
//! A session tracks one download flow from link submission to delivery or
//! failure. The store owns the transition rules: every state change goes
//! through [`SessionStore::advance`] under a single write lock, so two
//! interleaved events for the same user can never double-advance a session.
//!
//! State graph (initial = `Idle`, terminal reachable = `Idle`):
//!
//! ```text
//! Idle --(download intent)--> AwaitingUrl
//! AwaitingUrl --(validated url + resolved metadata)--> AwaitingFormat
//! AwaitingFormat --(format chosen)--> Processing
//! Processing --(pipeline finished)--> Idle
//! any state --(timeout elapsed)--> Idle
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::media::{OutputFormat, StreamDescriptor, VideoMeta};

/// Opaque stable identifier for a chat user. Chat platforms hand out 64-bit
/// integer identities, so that is what we key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a user's acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No flow in progress.
    #[default]
    Idle,
    /// The user declared download intent; waiting for a link.
    AwaitingUrl,
    /// Link validated and resolved; waiting for a format choice.
    AwaitingFormat,
    /// Download/extract/deliver attempt in flight. Further events are
    /// rejected as busy until the attempt resolves.
    Processing,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::AwaitingUrl => write!(f, "awaiting-url"),
            Self::AwaitingFormat => write!(f, "awaiting-format"),
            Self::Processing => write!(f, "processing"),
        }
    }
}

/// An event that may advance a session along the state graph.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The user asked to start a download flow.
    DownloadIntent,
    /// A submitted link was validated and resolved.
    UrlResolved {
        /// The validated source URL, as submitted.
        url: String,
        /// Descriptive metadata from the resolver.
        meta: VideoMeta,
        /// Every candidate stream the provider exposed.
        streams: Vec<StreamDescriptor>,
    },
    /// The user chose an output format; the pipeline selected a stream.
    FormatChosen {
        /// Requested output format.
        format: OutputFormat,
        /// The stream the selection policy picked.
        stream: StreamDescriptor,
    },
    /// The Processing attempt resolved (success or failure).
    Finished,
}

impl SessionEvent {
    /// The payload-free name of this event, for diagnostics.
    #[must_use]
    pub const fn kind(&self) -> SessionEventKind {
        match self {
            Self::DownloadIntent => SessionEventKind::DownloadIntent,
            Self::UrlResolved { .. } => SessionEventKind::UrlResolved,
            Self::FormatChosen { .. } => SessionEventKind::FormatChosen,
            Self::Finished => SessionEventKind::Finished,
        }
    }
}

/// Payload-free event name, carried in [`Error::InvalidTransition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// See [`SessionEvent::DownloadIntent`].
    DownloadIntent,
    /// See [`SessionEvent::UrlResolved`].
    UrlResolved,
    /// See [`SessionEvent::FormatChosen`].
    FormatChosen,
    /// See [`SessionEvent::Finished`].
    Finished,
}

impl std::fmt::Display for SessionEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DownloadIntent => write!(f, "download-intent"),
            Self::UrlResolved => write!(f, "url-resolved"),
            Self::FormatChosen => write!(f, "format-chosen"),
            Self::Finished => write!(f, "finished"),
        }
    }
}

/// One user's acquisition session.
///
/// The per-session artifact set lives in
/// [`CleanupManager`](crate::cleanup::CleanupManager), keyed by this
/// session's user id; the session itself is plain value state and never
/// touches the filesystem.
#[derive(Debug, Clone)]
pub struct Session {
    /// Owning user identity.
    pub user_id: UserId,
    /// Current state in the graph.
    pub state: SessionState,
    /// Validated source URL, set at `AwaitingFormat`.
    pub source_url: Option<String>,
    /// Resolved metadata, cached so Processing never re-resolves.
    pub metadata: Option<VideoMeta>,
    /// Candidate streams from resolution, consumed by format choice.
    pub candidate_streams: Vec<StreamDescriptor>,
    /// The stream picked by the selection policy. Only read in `Processing`.
    pub selected_stream: Option<StreamDescriptor>,
    /// The output format the user asked for. Only read in `Processing`.
    pub requested_format: Option<OutputFormat>,
    /// When this session entry was created.
    pub created_at: Instant,
    /// Last successful advance or reset; drives TTL expiry.
    pub last_activity_at: Instant,
}

impl Session {
    fn new(user_id: UserId) -> Self {
        let now = Instant::now();
        Self {
            user_id,
            state: SessionState::Idle,
            source_url: None,
            metadata: None,
            candidate_streams: Vec::new(),
            selected_stream: None,
            requested_format: None,
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Apply an event, mutating the session, or reject it without touching
    /// any state.
    fn apply(&mut self, event: SessionEvent) -> Result<()> {
        match (self.state, event) {
            (SessionState::Idle, SessionEvent::DownloadIntent) => {
                self.state = SessionState::AwaitingUrl;
                Ok(())
            }
            (SessionState::AwaitingUrl, SessionEvent::UrlResolved { url, meta, streams }) => {
                self.source_url = Some(url);
                self.metadata = Some(meta);
                self.candidate_streams = streams;
                self.state = SessionState::AwaitingFormat;
                Ok(())
            }
            (SessionState::AwaitingFormat, SessionEvent::FormatChosen { format, stream }) => {
                self.requested_format = Some(format);
                self.selected_stream = Some(stream);
                self.candidate_streams.clear();
                self.state = SessionState::Processing;
                Ok(())
            }
            (SessionState::Processing, SessionEvent::Finished) => {
                self.clear();
                Ok(())
            }
            (state, event) => Err(Error::InvalidTransition {
                state,
                event: event.kind(),
            }),
        }
    }

    /// Reset to `Idle`, clearing all cached flow state.
    fn clear(&mut self) {
        self.state = SessionState::Idle;
        self.source_url = None;
        self.metadata = None;
        self.candidate_streams.clear();
        self.selected_stream = None;
        self.requested_format = None;
    }

    /// Whether the session has idled past the timeout window.
    #[must_use]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_activity_at) > timeout
    }
}

/// Keyed mapping from user identity to session state.
///
/// At most one session exists per user. The get-then-advance sequence is
/// atomic per user id: `advance` resolves the entry and applies the event
/// under one write lock.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<UserId, Session>>,
    timeout: Duration,
    processing_grace: Duration,
}

impl SessionStore {
    /// Create a store with the given session TTL.
    ///
    /// `processing_grace` extends the TTL for `Processing` sessions. It
    /// must cover the worst-case attempt duration (the sum of the stage
    /// deadlines), so the sweep only ever reclaims attempts whose task is
    /// long gone, never one that is still running. `last_activity_at` is
    /// set when the attempt starts and not refreshed while it runs, which
    /// is why the plain TTL is not enough for `Processing`.
    #[must_use]
    pub fn new(timeout: Duration, processing_grace: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            processing_grace,
        }
    }

    /// Snapshot the session for a user, creating an `Idle` one if absent.
    pub async fn get(&self, user_id: UserId) -> Session {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id))
            .clone()
    }

    /// Apply an event to a user's session atomically.
    ///
    /// A session that idled past its TTL in `AwaitingUrl`/`AwaitingFormat`
    /// is reset on the spot and the event is rejected with
    /// [`Error::SessionExpired`]. An event that does not match the current
    /// state is rejected with [`Error::InvalidTransition`] and leaves the
    /// session untouched; for a `Processing` session this is the
    /// busy-rejection path.
    ///
    /// # Errors
    ///
    /// Returns `SessionExpired` or `InvalidTransition` as described above.
    pub async fn advance(&self, user_id: UserId, event: SessionEvent) -> Result<Session> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(user_id)
            .or_insert_with(|| Session::new(user_id));

        let now = Instant::now();
        if matches!(
            session.state,
            SessionState::AwaitingUrl | SessionState::AwaitingFormat
        ) && session.is_expired(now, self.timeout)
        {
            warn!(user = %user_id, state = %session.state, "session expired at event time");
            session.clear();
            session.last_activity_at = now;
            return Err(Error::SessionExpired(user_id.0));
        }

        let kind = event.kind();
        session.apply(event)?;
        session.last_activity_at = now;
        debug!(user = %user_id, event = %kind, state = %session.state, "session advanced");
        Ok(session.clone())
    }

    /// Reset a user's session to `Idle`, clearing cached flow state.
    pub async fn reset(&self, user_id: UserId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&user_id) {
            session.clear();
            session.last_activity_at = Instant::now();
            debug!(user = %user_id, "session reset to idle");
        }
    }

    /// Rewind a session to `AwaitingUrl` after a locally recoverable
    /// failure, clearing any partially cached resolution state so the user
    /// can submit another link without restarting the flow.
    pub async fn rewind_to_awaiting_url(&self, user_id: UserId) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&user_id) {
            session.clear();
            session.state = SessionState::AwaitingUrl;
            session.last_activity_at = Instant::now();
            debug!(user = %user_id, "session rewound to awaiting-url");
        }
    }

    /// Reset every session whose last activity is older than the TTL and
    /// return the swept user ids. `Processing` sessions get the extra
    /// grace window on top of the TTL, so an attempt still inside its
    /// stage deadlines is never reset underneath its own pipeline; only
    /// orphaned attempts are reclaimed.
    ///
    /// The caller is responsible for releasing any artifacts the swept
    /// sessions still own.
    pub async fn sweep_expired(&self) -> Vec<UserId> {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let mut swept = Vec::new();
        for (user_id, session) in sessions.iter_mut() {
            let allowed = if session.state == SessionState::Processing {
                self.timeout + self.processing_grace
            } else {
                self.timeout
            };
            if session.state != SessionState::Idle && session.is_expired(now, allowed) {
                info!(user = %user_id, state = %session.state, "sweeping expired session");
                session.clear();
                session.last_activity_at = now;
                swept.push(*user_id);
            }
        }
        swept
    }

    /// Number of sessions currently held, any state.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether the store holds no sessions at all.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::Container;

    fn meta() -> VideoMeta {
        VideoMeta {
            title: "Test".to_string(),
            author: "Ch".to_string(),
            duration_secs: 125,
            thumbnail_url: None,
        }
    }

    fn stream() -> StreamDescriptor {
        StreamDescriptor {
            container: Container::Mp4,
            height: Some(720),
            bitrate_kbps: None,
            approx_bytes: Some(1024),
            has_audio: true,
            has_video: true,
            handle: "itag-22".to_string(),
        }
    }

    fn resolved_event() -> SessionEvent {
        SessionEvent::UrlResolved {
            url: "https://youtu.be/abc123".to_string(),
            meta: meta(),
            streams: vec![stream()],
        }
    }

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(300), Duration::from_secs(300))
    }

    async fn walk_to_processing(store: &SessionStore, user: UserId) {
        store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        store.advance(user, resolved_event()).await.expect("url");
        store
            .advance(
                user,
                SessionEvent::FormatChosen {
                    format: OutputFormat::Audio,
                    stream: stream(),
                },
            )
            .await
            .expect("format");
    }

    #[tokio::test]
    async fn test_get_creates_idle_session() {
        let store = store();
        let session = store.get(UserId(1)).await;
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_full_forward_walk() {
        let store = store();
        let user = UserId(1);

        let s = store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        assert_eq!(s.state, SessionState::AwaitingUrl);

        let s = store.advance(user, resolved_event()).await.expect("url");
        assert_eq!(s.state, SessionState::AwaitingFormat);
        assert_eq!(s.metadata.as_ref().map(|m| m.duration_secs), Some(125));
        assert_eq!(s.candidate_streams.len(), 1);

        let s = store
            .advance(
                user,
                SessionEvent::FormatChosen {
                    format: OutputFormat::Audio,
                    stream: stream(),
                },
            )
            .await
            .expect("format");
        assert_eq!(s.state, SessionState::Processing);
        assert!(s.selected_stream.is_some());
        assert!(s.candidate_streams.is_empty());

        let s = store
            .advance(user, SessionEvent::Finished)
            .await
            .expect("finish");
        assert_eq!(s.state, SessionState::Idle);
        assert!(s.metadata.is_none());
        assert!(s.selected_stream.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_event_is_rejected_without_mutation() {
        let store = store();
        let user = UserId(1);

        let err = store
            .advance(user, SessionEvent::Finished)
            .await
            .expect_err("finish from idle must be rejected");
        assert!(matches!(
            err,
            Error::InvalidTransition {
                state: SessionState::Idle,
                event: SessionEventKind::Finished,
            }
        ));
        assert_eq!(store.get(user).await.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_event_while_processing_is_busy_rejected() {
        let store = store();
        let user = UserId(1);
        store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        store.advance(user, resolved_event()).await.expect("url");
        store
            .advance(
                user,
                SessionEvent::FormatChosen {
                    format: OutputFormat::Video,
                    stream: stream(),
                },
            )
            .await
            .expect("format");

        let err = store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect_err("second flow while processing must be rejected");
        assert!(matches!(
            err,
            Error::InvalidTransition {
                state: SessionState::Processing,
                ..
            }
        ));
        // The in-flight attempt is untouched.
        assert_eq!(store.get(user).await.state, SessionState::Processing);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated_per_user() {
        let store = store();
        store
            .advance(UserId(1), SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        assert_eq!(store.get(UserId(1)).await.state, SessionState::AwaitingUrl);
        assert_eq!(store.get(UserId(2)).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_rejects_event_and_resets() {
        let store = store();
        let user = UserId(1);
        store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");

        tokio::time::advance(Duration::from_secs(600)).await;

        let err = store
            .advance(user, resolved_event())
            .await
            .expect_err("expired session must reject the event");
        assert!(matches!(err, Error::SessionExpired(1)));
        assert_eq!(store.get(user).await.state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_resets_stale_sessions_regardless_of_state() {
        let store = store();
        store
            .advance(UserId(1), SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        store
            .advance(UserId(2), SessionEvent::DownloadIntent)
            .await
            .expect("intent");

        tokio::time::advance(Duration::from_secs(200)).await;
        // User 2 stays active; user 1 goes stale.
        store.advance(UserId(2), resolved_event()).await.expect("url");
        tokio::time::advance(Duration::from_secs(200)).await;

        let swept = store.sweep_expired().await;
        assert_eq!(swept, vec![UserId(1)]);
        assert_eq!(store.get(UserId(1)).await.state, SessionState::Idle);
        assert_eq!(
            store.get(UserId(2)).await.state,
            SessionState::AwaitingFormat
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_clears_stale_cached_metadata() {
        let store = store();
        let user = UserId(9);
        store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        store.advance(user, resolved_event()).await.expect("url");

        tokio::time::advance(Duration::from_secs(600)).await;
        let swept = store.sweep_expired().await;
        assert_eq!(swept, vec![user]);

        let session = store.get(user).await;
        assert!(session.metadata.is_none());
        assert!(session.candidate_streams.is_empty());
        assert!(session.source_url.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_spares_processing_within_grace() {
        let store = store();
        let user = UserId(3);
        walk_to_processing(&store, user).await;

        // Past the plain TTL but inside the grace window: the attempt may
        // still be running, so the sweep must leave it alone.
        tokio::time::advance(Duration::from_secs(400)).await;
        assert!(store.sweep_expired().await.is_empty());
        assert_eq!(store.get(user).await.state, SessionState::Processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reclaims_orphaned_processing_after_grace() {
        let store = store();
        let user = UserId(3);
        walk_to_processing(&store, user).await;

        tokio::time::advance(Duration::from_secs(700)).await;
        let swept = store.sweep_expired().await;
        assert_eq!(swept, vec![user]);
        assert_eq!(store.get(user).await.state, SessionState::Idle);
    }

    #[tokio::test]
    async fn test_rewind_keeps_flow_alive() {
        let store = store();
        let user = UserId(1);
        store
            .advance(user, SessionEvent::DownloadIntent)
            .await
            .expect("intent");
        store.advance(user, resolved_event()).await.expect("url");

        store.rewind_to_awaiting_url(user).await;
        let session = store.get(user).await;
        assert_eq!(session.state, SessionState::AwaitingUrl);
        assert!(session.metadata.is_none());

        // A fresh URL submission is accepted straight away.
        store
            .advance(user, resolved_event())
            .await
            .expect("retry accepted");
    }
}
