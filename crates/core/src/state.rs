//! Session State Shared by the Worker and the Orchestrator
//!
//! Each store sits behind its own async `RwLock`. Writers hold a guard only
//! for the duration of a single pool operation and never across an await on
//! a collaborator, so every mutation lands as one unit.

use crate::diagnosis::{DiagnosisCandidate, DiagnosisPool, RankedDiagnosis};
use crate::question::{QuestionPool, QuestionPoolConfig, QuestionRecord};
use crate::transcript::{Speaker, TranscriptStore, Utterance};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct AnalysisState {
    transcript: RwLock<TranscriptStore>,
    diagnoses: RwLock<DiagnosisPool>,
    questions: RwLock<QuestionPool>,
    /// Completed interviewer/subject exchanges, published by the orchestrator.
    turns: AtomicU64,
}

/// Point-in-time view of a whole session, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub turns: u64,
    pub transcript: Vec<Utterance>,
    pub questions: Vec<QuestionRecord>,
    pub consolidated_diagnoses: Vec<RankedDiagnosis>,
    pub working_diagnoses: Vec<DiagnosisCandidate>,
}

impl AnalysisState {
    pub fn new(question_config: QuestionPoolConfig) -> Self {
        Self {
            transcript: RwLock::new(TranscriptStore::new()),
            diagnoses: RwLock::new(DiagnosisPool::new()),
            questions: RwLock::new(QuestionPool::new(question_config)),
            turns: AtomicU64::new(0),
        }
    }

    pub fn transcript(&self) -> &RwLock<TranscriptStore> {
        &self.transcript
    }

    pub fn diagnoses(&self) -> &RwLock<DiagnosisPool> {
        &self.diagnoses
    }

    pub fn questions(&self) -> &RwLock<QuestionPool> {
        &self.questions
    }

    pub async fn record_utterance(&self, speaker: Speaker, text: &str) -> Utterance {
        self.transcript.write().await.append(speaker, text)
    }

    pub async fn transcript_snapshot(&self) -> Vec<Utterance> {
        self.transcript.read().await.snapshot()
    }

    /// Marks one more exchange as complete and returns the new count.
    pub fn complete_turn(&self) -> u64 {
        self.turns.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn turn_count(&self) -> u64 {
        self.turns.load(Ordering::Acquire)
    }

    pub async fn report(&self) -> SessionReport {
        let transcript = self.transcript_snapshot().await;
        let questions = self.questions.read().await.all().to_vec();
        let (consolidated_diagnoses, working_diagnoses) = {
            let pool = self.diagnoses.read().await;
            (
                pool.list_consolidated_with_severity(),
                pool.working().sorted(),
            )
        };
        SessionReport {
            turns: self.turn_count(),
            transcript,
            questions,
            consolidated_diagnoses,
            working_diagnoses,
        }
    }
}
