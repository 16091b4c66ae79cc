//! Per-session artifact tracking and guaranteed removal.
//!
//! Every component that writes a session-scoped file registers it here.
//! When the pipeline reaches a terminal outcome for a Processing attempt
//! (success, any error, or a sweep), [`CleanupManager::release_all`] removes
//! everything the session produced. No code path through Processing may
//! leave temporary artifacts behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::session::UserId;

/// Tracks every artifact created for each session and removes them once
/// the session resolves.
#[derive(Debug, Default)]
pub struct CleanupManager {
    artifacts: Mutex<HashMap<UserId, Vec<PathBuf>>>,
}

impl CleanupManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an artifact path as owned by a session.
    pub async fn register(&self, session: UserId, path: impl Into<PathBuf>) {
        let path = path.into();
        debug!(session = %session, path = %path.display(), "registered artifact");
        self.artifacts
            .lock()
            .await
            .entry(session)
            .or_default()
            .push(path);
    }

    /// Remove every artifact registered for a session, tolerating files
    /// that are already gone. Returns the number of paths that were
    /// registered.
    pub async fn release_all(&self, session: UserId) -> usize {
        let paths = self
            .artifacts
            .lock()
            .await
            .remove(&session)
            .unwrap_or_default();

        for path in &paths {
            remove_tolerant(session, path).await;
        }
        if !paths.is_empty() {
            debug!(session = %session, count = paths.len(), "released session artifacts");
        }
        paths.len()
    }

    /// Snapshot of the paths currently registered for a session.
    pub async fn registered(&self, session: UserId) -> Vec<PathBuf> {
        self.artifacts
            .lock()
            .await
            .get(&session)
            .cloned()
            .unwrap_or_default()
    }
}

/// Delete one artifact, logging but not failing on errors. A missing file
/// is the expected case when a producer already removed its own partial.
async fn remove_tolerant(session: UserId, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(session = %session, path = %path.display(), "removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(session = %session, path = %path.display(), "artifact already gone");
        }
        Err(e) => {
            warn!(
                session = %session,
                path = %path.display(),
                error = %e,
                "failed to remove artifact"
            );
        }
    }
}
