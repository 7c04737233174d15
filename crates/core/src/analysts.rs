//! LLM-backed collaborators.
//!
//! Each analyst renders its inputs into a single user message, asks the model
//! for JSON under its own system instruction and parses the reply. None of
//! them recover from failure themselves; the worker and orchestrator own the
//! fallbacks.

use crate::collaborators::{
    Advice, Advisor, Diagnoser, DiagnosisEvaluator, DiagnosisTrigger, DiagnosisUpdate,
    Highlighter, QuestionRanker, TriggerDecision,
};
use crate::diagnosis::{BasicDiagnosis, DiagnosisRecord, RankedDiagnosis};
use crate::events::Highlight;
use crate::llm_client::{CompletionClient, parse_json, parse_json_list};
use crate::question::{QueuedQuestion, RankedQuestion};
use crate::transcript::Utterance;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;

/// Renders a transcript as one `SPEAKER: text` line per utterance.
pub fn render_transcript(transcript: &[Utterance]) -> String {
    transcript
        .iter()
        .map(|u| format!("{}: {}", u.speaker, u.text))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// A system instruction bound to a client and a sampling temperature.
#[derive(Clone)]
pub struct JsonCall {
    client: Arc<dyn CompletionClient>,
    instruction: String,
    temperature: f32,
}

impl JsonCall {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        instruction: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            client,
            instruction: instruction.into(),
            temperature,
        }
    }

    async fn raw(&self, user: &str) -> Result<String> {
        let raw = self
            .client
            .complete_json(&self.instruction, user, self.temperature)
            .await?;
        debug!(chars = raw.len(), "LLM replied");
        Ok(raw)
    }

    async fn ask<T: DeserializeOwned>(&self, user: &str) -> Result<T> {
        parse_json(&self.raw(user).await?)
    }

    async fn ask_list<T: DeserializeOwned>(&self, user: &str, key: &str) -> Result<Vec<T>> {
        parse_json_list(&self.raw(user).await?, key)
    }
}

pub struct LlmTrigger {
    call: JsonCall,
}

impl LlmTrigger {
    pub fn new(call: JsonCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl DiagnosisTrigger for LlmTrigger {
    async fn check(&self, transcript: &[Utterance]) -> Result<TriggerDecision> {
        if transcript.is_empty() {
            return Ok(TriggerDecision {
                should_run: false,
                reason: "empty".to_string(),
            });
        }
        let user = format!("History:\n{}", render_transcript(transcript));
        self.call.ask(&user).await
    }
}

pub struct LlmDiagnoser {
    call: JsonCall,
    profile: String,
}

impl LlmDiagnoser {
    pub fn new(call: JsonCall, profile: impl Into<String>) -> Self {
        Self {
            call,
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl Diagnoser for LlmDiagnoser {
    async fn diagnose(
        &self,
        transcript: &[Utterance],
        current: &[BasicDiagnosis],
    ) -> Result<DiagnosisUpdate> {
        let user = format!(
            "Patient:\n{}\n\nTranscript:\n{}\n\nState:\n{}",
            self.profile,
            render_transcript(transcript),
            to_json(current)?
        );
        self.call.ask(&user).await
    }
}

pub struct LlmEvaluator {
    call: JsonCall,
}

impl LlmEvaluator {
    pub fn new(call: JsonCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl DiagnosisEvaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        pool: &[BasicDiagnosis],
        candidates: &[DiagnosisRecord],
        transcript: &[Utterance],
    ) -> Result<Vec<DiagnosisRecord>> {
        let user = format!(
            "Context:\n{}\n\nMaster Pool:\n{}\n\nNew Candidates:\n{}",
            render_transcript(transcript),
            to_json(pool)?,
            to_json(candidates)?
        );
        self.call.ask_list(&user, "diagnoses").await
    }
}

pub struct LlmRanker {
    call: JsonCall,
    profile: String,
}

impl LlmRanker {
    pub fn new(call: JsonCall, profile: impl Into<String>) -> Self {
        Self {
            call,
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl QuestionRanker for LlmRanker {
    async fn rank(
        &self,
        transcript: &[Utterance],
        diagnoses: &[RankedDiagnosis],
        queue: &[QueuedQuestion],
    ) -> Result<Vec<RankedQuestion>> {
        let user = format!(
            "Patient Profile:\n{}\n\nHistory:\n{}\n\nDiagnosis:\n{}\n\nQuestions:\n{}",
            self.profile,
            render_transcript(transcript),
            to_json(diagnoses)?,
            to_json(queue)?
        );
        self.call.ask_list(&user, "ranking").await
    }
}

pub struct LlmAdvisor {
    call: JsonCall,
    profile: String,
}

impl LlmAdvisor {
    pub fn new(call: JsonCall, profile: impl Into<String>) -> Self {
        Self {
            call,
            profile: profile.into(),
        }
    }
}

#[async_trait]
impl Advisor for LlmAdvisor {
    async fn advise(&self, transcript: &[Utterance], queue: &[QueuedQuestion]) -> Result<Advice> {
        let user = format!(
            "Context:\n{}\n\nHistory:\n{}\n\nQuestions:\n{}",
            self.profile,
            render_transcript(transcript),
            to_json(queue)?
        );
        self.call.ask(&user).await
    }
}

pub struct LlmHighlighter {
    call: JsonCall,
}

impl LlmHighlighter {
    pub fn new(call: JsonCall) -> Self {
        Self { call }
    }
}

#[async_trait]
impl Highlighter for LlmHighlighter {
    async fn highlight(
        &self,
        answer: &str,
        diagnoses: &[RankedDiagnosis],
    ) -> Result<Vec<Highlight>> {
        if answer.trim().chars().count() < 3 {
            return Ok(Vec::new());
        }
        let user = format!(
            "Context:\n{}\n\nAnswer:\n\"{}\"",
            to_json(diagnoses)?,
            answer
        );
        self.call.ask_list(&user, "highlights").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HighlightLevel;
    use crate::llm_client::MockCompletionClient;
    use crate::transcript::{Speaker, TranscriptStore};
    use anyhow::anyhow;
    use mockall::predicate::eq;

    fn transcript() -> Vec<Utterance> {
        let mut store = TranscriptStore::new();
        store.append(Speaker::Interviewer, "Where is the pain?");
        store.append(Speaker::Subject, "Upper right side.");
        store.snapshot()
    }

    fn replying(reply: &'static str) -> Arc<dyn CompletionClient> {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete_json()
            .returning(move |_, _, _| Ok(reply.to_string()));
        Arc::new(client)
    }

    #[test]
    fn test_render_transcript_labels_speakers() {
        assert_eq!(
            render_transcript(&transcript()),
            "INTERVIEWER: Where is the pain?\nSUBJECT: Upper right side."
        );
    }

    #[tokio::test]
    async fn test_trigger_skips_call_on_empty_transcript() {
        let mut client = MockCompletionClient::new();
        client.expect_complete_json().never();
        let trigger = LlmTrigger::new(JsonCall::new(Arc::new(client), "trigger", 0.0));

        let decision = trigger.check(&[]).await.unwrap();

        assert!(!decision.should_run);
        assert_eq!(decision.reason, "empty");
    }

    #[tokio::test]
    async fn test_trigger_sends_instruction_and_history() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete_json()
            .with(
                eq("Detect new info."),
                mockall::predicate::function(|user: &str| user.contains("SUBJECT: Upper right side.")),
                eq(0.0_f32),
            )
            .times(1)
            .returning(|_, _, _| Ok(r#"{"should_run": true, "reason": "location given"}"#.to_string()));
        let trigger = LlmTrigger::new(JsonCall::new(Arc::new(client), "Detect new info.", 0.0));

        let decision = trigger.check(&transcript()).await.unwrap();

        assert!(decision.should_run);
        assert_eq!(decision.reason, "location given");
    }

    #[tokio::test]
    async fn test_diagnoser_reads_legacy_field_names() {
        let diagnoser = LlmDiagnoser::new(
            JsonCall::new(
                replying(
                    r#"{"diagnosis_list": [{"did": "D1", "diagnosis": "Cholecystitis", "indicators_point": ["RUQ pain"]}],
                        "follow_up_questions": ["Any fever?"]}"#,
                ),
                "diagnose",
                0.2,
            ),
            "45-year-old patient",
        );

        let update = diagnoser.diagnose(&transcript(), &[]).await.unwrap();

        assert_eq!(
            update.diagnosis_list,
            vec![DiagnosisRecord::new("D1", "Cholecystitis", ["RUQ pain"])]
        );
        assert_eq!(update.follow_up_questions, vec!["Any fever?"]);
    }

    #[tokio::test]
    async fn test_ranker_accepts_wrapped_list() {
        let ranker = LlmRanker::new(
            JsonCall::new(
                replying(r#"{"ranking": [{"qid": "q1", "rank": 2}, {"qid": "q2", "rank": 1}]}"#),
                "rank",
                0.1,
            ),
            "",
        );

        let ranking = ranker.rank(&transcript(), &[], &[]).await.unwrap();

        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[1].qid, "q2");
    }

    #[tokio::test]
    async fn test_evaluator_propagates_malformed_reply() {
        let evaluator = LlmEvaluator::new(JsonCall::new(replying("not json"), "merge", 0.1));

        let result = evaluator.evaluate(&[], &[], &transcript()).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_advisor_propagates_client_failure() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete_json()
            .returning(|_, _, _| Err(anyhow!("503 Service Unavailable")));
        let advisor = LlmAdvisor::new(JsonCall::new(Arc::new(client), "advise", 0.2), "");

        let err = advisor.advise(&transcript(), &[]).await.unwrap_err();

        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_advisor_parses_steer() {
        let advisor = LlmAdvisor::new(
            JsonCall::new(
                replying(
                    r#"{"question": "Ask about fever.", "qid": "ab12cd34", "end_conversation": false, "reasoning": "infection risk"}"#,
                ),
                "advise",
                0.2,
            ),
            "",
        );

        let advice = advisor.advise(&transcript(), &[]).await.unwrap();

        assert_eq!(advice.next_instruction, "Ask about fever.");
        assert_eq!(advice.qid.as_deref(), Some("ab12cd34"));
        assert!(!advice.end_flag);
    }

    #[tokio::test]
    async fn test_highlighter_skips_short_answers() {
        let mut client = MockCompletionClient::new();
        client.expect_complete_json().never();
        let highlighter = LlmHighlighter::new(JsonCall::new(Arc::new(client), "highlight", 0.0));

        assert!(highlighter.highlight("ok", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_highlighter_parses_levels() {
        let highlighter = LlmHighlighter::new(JsonCall::new(
            replying(r#"[{"level": "danger", "text": "chest pain"}, {"level": "warning", "text": "dizzy"}]"#),
            "highlight",
            0.0,
        ));

        let highlights = highlighter
            .highlight("I get chest pain and feel dizzy.", &[])
            .await
            .unwrap();

        assert_eq!(highlights[0].level, HighlightLevel::Danger);
        assert_eq!(highlights[1].text, "dizzy");
    }
}
