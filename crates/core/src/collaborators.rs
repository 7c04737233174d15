//! Collaborator Contracts
//!
//! Every decision that needs language understanding is delegated to one of
//! these traits. The core only depends on the contracts; concrete
//! implementations live in [`crate::analysts`], [`crate::chat_role`] and the
//! API service's voice provider. Any call may fail, and callers in the core
//! decide the fallback.
//!
//! `mockall` generates `Mock*` doubles for each trait in test builds.

use crate::diagnosis::{BasicDiagnosis, DiagnosisRecord, RankedDiagnosis};
use crate::events::{EventSender, Highlight};
use crate::question::{QueuedQuestion, RankedQuestion};
use crate::transcript::{Speaker, Utterance};
use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether the transcript holds new diagnosable information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDecision {
    pub should_run: bool,
    #[serde(default)]
    pub reason: String,
}

/// Output of the diagnosis collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisUpdate {
    #[serde(default)]
    pub diagnosis_list: Vec<DiagnosisRecord>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

/// The advisor's steer for the interviewer's next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advice {
    #[serde(alias = "question")]
    pub next_instruction: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default, alias = "end_conversation")]
    pub end_flag: bool,
    #[serde(default)]
    pub qid: Option<String>,
}

/// A conversational role that turns an input text into a spoken reply.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechRole: Send + Sync {
    fn speaker(&self) -> Speaker;

    /// Speaks in response to `text`, streaming interim audio/text to `events`.
    /// Resolves to the final text of the turn, or `None` if nothing was said.
    async fn speak(&self, text: &str, events: &EventSender) -> Result<Option<String>>;

    /// Releases the role's connection. Called exactly once per acquired role.
    async fn close(&self) -> Result<()>;
}

/// Establishes role connections for a session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RoleConnector: Send + Sync {
    async fn connect(&self, speaker: Speaker) -> Result<Box<dyn SpeechRole>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiagnosisTrigger: Send + Sync {
    async fn check(&self, transcript: &[Utterance]) -> Result<TriggerDecision>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Diagnoser: Send + Sync {
    async fn diagnose(
        &self,
        transcript: &[Utterance],
        current: &[BasicDiagnosis],
    ) -> Result<DiagnosisUpdate>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DiagnosisEvaluator: Send + Sync {
    /// Merges `pool` with `candidates` into one consolidated list.
    async fn evaluate(
        &self,
        pool: &[BasicDiagnosis],
        candidates: &[DiagnosisRecord],
        transcript: &[Utterance],
    ) -> Result<Vec<DiagnosisRecord>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait QuestionRanker: Send + Sync {
    async fn rank(
        &self,
        transcript: &[Utterance],
        diagnoses: &[RankedDiagnosis],
        queue: &[QueuedQuestion],
    ) -> Result<Vec<RankedQuestion>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(&self, transcript: &[Utterance], queue: &[QueuedQuestion]) -> Result<Advice>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Highlighter: Send + Sync {
    async fn highlight(&self, answer: &str, diagnoses: &[RankedDiagnosis])
    -> Result<Vec<Highlight>>;
}

/// The collaborators the analysis worker drives each cycle.
#[derive(Clone)]
pub struct Analysts {
    pub trigger: Arc<dyn DiagnosisTrigger>,
    pub diagnoser: Arc<dyn Diagnoser>,
    pub evaluator: Arc<dyn DiagnosisEvaluator>,
    pub ranker: Arc<dyn QuestionRanker>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advice_accepts_legacy_field_names() {
        let json = r#"{"question": "Ask about fever.", "reasoning": "r", "end_conversation": true, "qid": null}"#;
        let advice: Advice = serde_json::from_str(json).unwrap();
        assert_eq!(advice.next_instruction, "Ask about fever.");
        assert!(advice.end_flag);
        assert_eq!(advice.qid, None);
    }

    #[test]
    fn test_diagnosis_update_defaults_missing_lists() {
        let update: DiagnosisUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(update, DiagnosisUpdate::default());
    }
}
