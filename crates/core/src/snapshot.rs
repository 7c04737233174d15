//! Published Analysis Snapshot
//!
//! The analysis worker hands its results to the dialogue orchestrator through
//! a `watch` channel rather than shared fields. Each publish replaces the
//! whole snapshot at once, so a reader only ever sees a complete cycle's
//! output. The channel's "changed" marker plays the role of the dirty flag:
//! [`SnapshotSubscriber::take_if_dirty`] reads the snapshot and clears it.

use crate::diagnosis::RankedDiagnosis;
use crate::question::QuestionRecord;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisSnapshot {
    /// Number of completed analysis cycles when this was published.
    pub cycle: u64,
    /// Active questions in rank order.
    pub ranked_questions: Vec<QuestionRecord>,
    /// Consolidated candidates with rank and severity.
    pub diagnosis_data: Vec<RankedDiagnosis>,
}

/// Write half, owned by the analysis worker.
#[derive(Debug)]
pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<AnalysisSnapshot>>,
}

/// Read half, owned by the dialogue orchestrator.
#[derive(Debug, Clone)]
pub struct SnapshotSubscriber {
    rx: watch::Receiver<Arc<AnalysisSnapshot>>,
    /// Cycle of the last snapshot handed out by `take_if_dirty`.
    seen_cycle: u64,
}

/// Creates a channel holding an empty, clean snapshot.
pub fn channel() -> (SnapshotPublisher, SnapshotSubscriber) {
    let (tx, rx) = watch::channel(Arc::new(AnalysisSnapshot::default()));
    (
        SnapshotPublisher { tx },
        SnapshotSubscriber { rx, seen_cycle: 0 },
    )
}

impl SnapshotPublisher {
    /// Replaces the published snapshot and marks it dirty for the reader.
    pub fn publish(&self, snapshot: AnalysisSnapshot) {
        // Sending only fails once every subscriber is gone; the session is over then.
        let _ = self.tx.send(Arc::new(snapshot));
    }
}

impl SnapshotSubscriber {
    /// Returns the snapshot if it changed since the last call, clearing the flag.
    pub fn take_if_dirty(&mut self) -> Option<Arc<AnalysisSnapshot>> {
        let snapshot = match self.rx.has_changed() {
            Ok(true) => self.rx.borrow_and_update().clone(),
            Ok(false) => return None,
            // The publisher is gone; its last value is still unread if its cycle is new.
            Err(_) => {
                let latest = self.rx.borrow_and_update().clone();
                if latest.cycle <= self.seen_cycle {
                    return None;
                }
                latest
            }
        };
        self.seen_cycle = snapshot.cycle;
        Some(snapshot)
    }

    /// The latest snapshot, without touching the dirty flag.
    pub fn latest(&self) -> Arc<AnalysisSnapshot> {
        self.rx.borrow().clone()
    }
}
