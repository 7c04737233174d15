//! Follow-up Question Pool
//!
//! Candidate questions for the interviewer, proposed by the diagnosis
//! collaborator and prioritised by the ranking collaborator. Records are
//! never removed; deletion is a status, so [`QuestionPool::all`] is a
//! complete audit log of every question the session has considered.
//!
//! Lifecycle of a record:
//!
//! ```text
//!            apply_ranking (absent)
//!   Active ───────────────────────────▶ Deleted
//!     ▲  ◀─────────────────────────────   │
//!     │        ingest (same content)      │
//!     │                                   │
//!     └── mark_status(Asked) ──▶ Asked    │
//! ```
//!
//! `Asked` and `Deleted` are never re-scored by [`QuestionPool::apply_ranking`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rank given to records the ranking collaborator has not placed yet.
pub const UNRANKED: u32 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Active,
    Asked,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub qid: String,
    pub content: String,
    pub role: String,
    pub status: QuestionStatus,
    /// Lower is more urgent.
    pub rank: u32,
    pub score: u32,
}

/// One entry of a ranking decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedQuestion {
    pub qid: String,
    pub rank: u32,
}

/// The projection of an active question offered to collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedQuestion {
    pub role: String,
    pub content: String,
    pub qid: String,
}

/// Scoring parameters for [`QuestionPool::apply_ranking`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPoolConfig {
    /// Score ceiling used while no active record has been scored yet.
    pub default_max_score: u32,
    pub decay_step: u32,
    /// Floor no ranked score drops below.
    pub min_score: u32,
    /// Role recorded on newly created questions.
    pub default_role: String,
}

impl Default for QuestionPoolConfig {
    fn default() -> Self {
        Self {
            default_max_score: 10,
            decay_step: 1,
            min_score: 1,
            default_role: "interviewer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionPool {
    records: Vec<QuestionRecord>,
    config: QuestionPoolConfig,
}

fn normalize(content: &str) -> String {
    content.trim().to_lowercase()
}

fn new_qid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl QuestionPool {
    pub fn new(config: QuestionPoolConfig) -> Self {
        Self {
            records: Vec::new(),
            config,
        }
    }

    /// Adds question texts to the pool and returns the records that became
    /// actionable: newly created ones and resurrected deleted ones.
    ///
    /// Matching is case-insensitive on trimmed content against every record,
    /// whatever its status. A match on an active or asked record is a no-op.
    pub fn ingest<I, S>(&mut self, texts: I) -> Vec<QuestionRecord>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut actionable = Vec::new();
        for text in texts {
            let content = text.as_ref().trim();
            if content.is_empty() {
                continue;
            }
            let key = normalize(content);

            if let Some(existing) = self.records.iter_mut().find(|q| normalize(&q.content) == key) {
                if existing.status == QuestionStatus::Deleted {
                    existing.status = QuestionStatus::Active;
                    existing.rank = UNRANKED;
                    existing.score = 0;
                    tracing::debug!(qid = %existing.qid, "Resurrected deleted question");
                    actionable.push(existing.clone());
                }
                continue;
            }

            let record = QuestionRecord {
                qid: new_qid(),
                content: content.to_string(),
                role: self.config.default_role.clone(),
                status: QuestionStatus::Active,
                rank: UNRANKED,
                score: 0,
            };
            self.records.push(record.clone());
            actionable.push(record);
        }
        actionable
    }

    /// Applies a ranking decision over the active records.
    ///
    /// Ranked records receive `max(min_score, ceiling - index * decay_step)`
    /// where `index` is the position in the rank-sorted input and `ceiling`
    /// is the highest current active score (or `default_max_score` while all
    /// are unscored). Active records missing from the input are deleted.
    pub fn apply_ranking(&mut self, ranking: &[RankedQuestion]) {
        let ceiling = self
            .records
            .iter()
            .filter(|q| q.status == QuestionStatus::Active)
            .map(|q| q.score)
            .max()
            .filter(|&max| max > 0)
            .unwrap_or(self.config.default_max_score);

        let mut sorted: Vec<&RankedQuestion> = ranking.iter().collect();
        sorted.sort_by_key(|r| r.rank);

        let mut ranked_ids = std::collections::HashSet::new();
        for (index, entry) in sorted.iter().enumerate() {
            ranked_ids.insert(entry.qid.as_str());
            let Some(record) = self
                .records
                .iter_mut()
                .find(|q| q.qid == entry.qid && q.status == QuestionStatus::Active)
            else {
                continue;
            };
            let decay = (index as u32).saturating_mul(self.config.decay_step);
            record.score = ceiling.saturating_sub(decay).max(self.config.min_score);
            record.rank = entry.rank;
        }

        for record in self
            .records
            .iter_mut()
            .filter(|q| q.status == QuestionStatus::Active)
        {
            if !ranked_ids.contains(record.qid.as_str()) {
                record.status = QuestionStatus::Deleted;
                record.rank = UNRANKED;
            }
        }
    }

    /// Active records in rank order, full records.
    pub fn ranked_active(&self) -> Vec<QuestionRecord> {
        let mut active: Vec<QuestionRecord> = self
            .records
            .iter()
            .filter(|q| q.status == QuestionStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|q| q.rank);
        active
    }

    /// Active records in rank order, projected for collaborators.
    pub fn active_queue(&self) -> Vec<QueuedQuestion> {
        self.ranked_active()
            .into_iter()
            .map(|q| QueuedQuestion {
                role: q.role,
                content: q.content,
                qid: q.qid,
            })
            .collect()
    }

    /// Every record ever created, in creation order.
    pub fn all(&self) -> &[QuestionRecord] {
        &self.records
    }

    pub fn get(&self, qid: &str) -> Option<&QuestionRecord> {
        self.records.iter().find(|q| q.qid == qid)
    }

    /// Sets the status of one record. Returns `false` if `qid` is unknown.
    pub fn mark_status(&mut self, qid: &str, status: QuestionStatus) -> bool {
        match self.records.iter_mut().find(|q| q.qid == qid) {
            Some(record) => {
                record.status = status;
                true
            }
            None => false,
        }
    }
}
