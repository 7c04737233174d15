//! In-memory registry of interview sessions.
//!
//! Finished sessions are kept so their transcript and analysis can still be
//! inspected after the WebSocket has closed. Only the most recent
//! `max_finished` of them are retained; running sessions are never evicted.

use crate::models::{SessionStatus, SessionSummary};
use chrono::{DateTime, Utc};
use intake_core::state::AnalysisState;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

struct SessionEntry {
    status: SessionStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    state: Arc<AnalysisState>,
}

impl SessionEntry {
    fn summary(&self, id: Uuid) -> SessionSummary {
        SessionSummary {
            id,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            turns: self.state.turn_count(),
        }
    }
}

/// How many finished sessions are retained by default.
pub const DEFAULT_MAX_FINISHED: usize = 100;

#[derive(Default)]
struct Sessions {
    entries: HashMap<Uuid, SessionEntry>,
    /// Finished session ids, oldest first.
    finished: VecDeque<Uuid>,
}

pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    max_finished: usize,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_retention(DEFAULT_MAX_FINISHED)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry that keeps at most `max_finished` finished sessions.
    pub fn with_retention(max_finished: usize) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            max_finished,
        }
    }

    /// Registers a running session over `state` and returns its id.
    pub async fn register(&self, state: Arc<AnalysisState>) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions.write().await.entries.insert(
            id,
            SessionEntry {
                status: SessionStatus::Running,
                started_at: Utc::now(),
                ended_at: None,
                state,
            },
        );
        info!(session_id = %id, "Session registered");
        id
    }

    /// Marks a session as ended with `status`, evicting the oldest finished
    /// sessions beyond the retention limit.
    pub async fn finish(&self, id: Uuid, status: SessionStatus) {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.entries.get_mut(&id) else {
            warn!(session_id = %id, "Tried to finish an unknown session");
            return;
        };
        let already_finished = entry.ended_at.is_some();
        entry.status = status;
        entry.ended_at = Some(Utc::now());
        info!(session_id = %id, %status, "Session finished");

        if !already_finished {
            sessions.finished.push_back(id);
        }
        while sessions.finished.len() > self.max_finished {
            if let Some(evicted) = sessions.finished.pop_front() {
                sessions.entries.remove(&evicted);
                info!(session_id = %evicted, "Evicted finished session");
            }
        }
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<_> = sessions
            .entries
            .iter()
            .map(|(id, entry)| entry.summary(*id))
            .collect();
        summaries.sort_by_key(|s| s.started_at);
        summaries
    }

    pub async fn get(&self, id: Uuid) -> Option<(SessionSummary, Arc<AnalysisState>)> {
        self.sessions
            .read()
            .await
            .entries
            .get(&id)
            .map(|entry| (entry.summary(id), entry.state.clone()))
    }
}
