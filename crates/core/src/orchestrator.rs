//! Dialogue Orchestrator
//!
//! Drives the interview turn by turn: the interviewer speaks, the subject
//! answers, then the orchestrator syncs with the latest analysis and asks the
//! advisor how to steer the next interviewer turn.
//!
//! ```text
//! Init -> Connecting -> (InterviewerTurn <-> SubjectTurn -> AnalysisSync) -> Terminated
//! ```
//!
//! Collaborator failures inside a turn never abort the session. The advisor
//! falls back to a generic instruction, the highlighter to no highlights, and
//! a silent subject is replaced by a fixed filler.

use crate::collaborators::{Advice, Advisor, Highlighter, SpeechRole};
use crate::events::{EventSender, SessionEvent};
use crate::question::QuestionStatus;
use crate::snapshot::SnapshotSubscriber;
use crate::state::AnalysisState;
use crate::transcript::Speaker;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recorded in place of an empty subject answer.
pub const NO_RESPONSE: &str = "no response";

/// Answers shorter than this are not worth highlighting.
const MIN_HIGHLIGHT_CHARS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogueState {
    Init,
    Connecting,
    InterviewerTurn,
    SubjectTurn,
    AnalysisSync,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A closing instruction was followed by a closing utterance.
    ClosingExchange,
    /// The advisor asked to end and the interviewer had its final turn.
    AdvisorEnded,
    /// The interviewer reached the configured turn cap.
    TurnLimit,
    /// The client went away.
    TransportClosed,
    /// The interviewer produced nothing for too many attempts in a row.
    InterviewerSilent,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Pause between the subject's answer and the next interviewer turn.
    pub pacing: Duration,
    /// Instruction for the very first interviewer turn.
    pub opening_instruction: String,
    /// Instruction used whenever the advisor has nothing usable to say.
    pub generic_instruction: String,
    /// Phrases marking an instruction as a request to wrap up (case-insensitive).
    pub instruction_closing_cues: Vec<String>,
    /// Phrases marking an interviewer utterance as a sign-off (case-insensitive).
    pub utterance_closing_cues: Vec<String>,
    /// Maximum number of interviewer turns, if any.
    pub max_turns: Option<u32>,
    /// Consecutive empty interviewer turns tolerated before giving up.
    pub max_empty_turns: u32,
    /// Wait before retrying after an empty interviewer turn.
    pub empty_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(500),
            opening_instruction:
                "[SYSTEM: Introduce yourself and ask the patient for their name and date of birth.]"
                    .to_string(),
            generic_instruction: "Continue.".to_string(),
            instruction_closing_cues: [
                "end the interview",
                "close the interview",
                "conclude the interview",
                "wrap up",
                "say goodbye",
            ]
            .map(String::from)
            .to_vec(),
            utterance_closing_cues: ["goodbye", "take care", "the doctor will see you"]
                .map(String::from)
                .to_vec(),
            max_turns: Some(40),
            max_empty_turns: 3,
            empty_backoff: Duration::from_secs(1),
        }
    }
}

/// Builds the interviewer's input from the subject's last answer and the
/// current steering instruction.
pub fn compose_interviewer_prompt(last_subject: Option<&str>, instruction: &str) -> String {
    match last_subject {
        Some(answer) => format!("Patient said: \"{answer}\"\n\n[ADVISOR INSTRUCTION: {instruction}]"),
        None => instruction.to_string(),
    }
}

fn contains_any(text: &str, cues: &[String]) -> bool {
    let text = text.to_lowercase();
    cues.iter()
        .any(|cue| !cue.is_empty() && text.contains(&cue.to_lowercase()))
}

pub struct DialogueOrchestrator {
    state: Arc<AnalysisState>,
    snapshots: SnapshotSubscriber,
    advisor: Arc<dyn Advisor>,
    highlighter: Option<Arc<dyn Highlighter>>,
    events: EventSender,
    config: OrchestratorConfig,
    current: DialogueState,
    transport_closed: bool,
}

impl DialogueOrchestrator {
    pub fn new(
        state: Arc<AnalysisState>,
        snapshots: SnapshotSubscriber,
        advisor: Arc<dyn Advisor>,
        highlighter: Option<Arc<dyn Highlighter>>,
        events: EventSender,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            snapshots,
            advisor,
            highlighter,
            events,
            config,
            current: DialogueState::Init,
            transport_closed: false,
        }
    }

    pub fn state(&self) -> DialogueState {
        self.current
    }

    pub fn enter(&mut self, next: DialogueState) {
        if self.current != next {
            debug!(from = ?self.current, to = ?next, "Dialogue state transition");
            self.current = next;
        }
    }

    /// Runs the interview until one of the termination conditions is met.
    pub async fn run(
        &mut self,
        interviewer: &dyn SpeechRole,
        subject: &dyn SpeechRole,
    ) -> TerminationReason {
        let mut instruction = self.config.opening_instruction.clone();
        let mut last_subject: Option<String> = None;
        let mut interviewer_turns: u32 = 0;
        let mut empty_streak: u32 = 0;
        let mut closing = false;

        loop {
            if self.transport_gone() {
                return self.terminate(TerminationReason::TransportClosed);
            }

            // --- Interviewer turn ---
            self.enter(DialogueState::InterviewerTurn);
            if self
                .config
                .max_turns
                .is_some_and(|max| interviewer_turns >= max)
            {
                return self.terminate(TerminationReason::TurnLimit);
            }
            let prompt = compose_interviewer_prompt(last_subject.as_deref(), &instruction);
            let Some(utterance) = self.take_turn(interviewer, &prompt).await else {
                empty_streak += 1;
                if empty_streak > self.config.max_empty_turns {
                    return self.terminate(TerminationReason::InterviewerSilent);
                }
                warn!(attempt = empty_streak, "Interviewer produced no output, retrying");
                tokio::time::sleep(self.config.empty_backoff).await;
                continue;
            };
            empty_streak = 0;
            interviewer_turns += 1;

            if closing {
                return self.terminate(TerminationReason::AdvisorEnded);
            }
            if contains_any(&instruction, &self.config.instruction_closing_cues)
                && contains_any(&utterance, &self.config.utterance_closing_cues)
            {
                return self.terminate(TerminationReason::ClosingExchange);
            }
            if self.transport_gone() {
                return self.terminate(TerminationReason::TransportClosed);
            }

            // --- Subject turn ---
            self.enter(DialogueState::SubjectTurn);
            let answer = match self.take_turn(subject, &utterance).await {
                Some(answer) => {
                    self.highlight(&answer).await;
                    answer
                }
                None => {
                    info!("Subject produced no output, recording filler");
                    self.record(Speaker::Subject, NO_RESPONSE).await;
                    NO_RESPONSE.to_string()
                }
            };
            let turn = self.state.complete_turn();
            debug!(turn, "Exchange complete");
            if self.transport_gone() {
                return self.terminate(TerminationReason::TransportClosed);
            }
            tokio::time::sleep(self.config.pacing).await;

            // --- Analysis sync ---
            self.enter(DialogueState::AnalysisSync);
            self.surface_snapshot().await;
            let advice = self.advise().await;
            if let Some(qid) = advice.qid.as_deref().filter(|qid| !qid.is_empty()) {
                let marked = self
                    .state
                    .questions()
                    .write()
                    .await
                    .mark_status(qid, QuestionStatus::Asked);
                if !marked {
                    debug!(qid, "Advisor chose an unknown question");
                }
            }
            info!(end = advice.end_flag, reasoning = %advice.reasoning, "Advisor steer received");
            instruction = if advice.next_instruction.trim().is_empty() {
                self.config.generic_instruction.clone()
            } else {
                advice.next_instruction
            };
            closing = advice.end_flag;
            last_subject = Some(answer);
        }
    }

    /// Lets `role` speak and records what it said. `None` if it said nothing.
    async fn take_turn(&mut self, role: &dyn SpeechRole, input: &str) -> Option<String> {
        let speaker = role.speaker();
        let text = match role.speak(input, &self.events).await {
            Ok(Some(text)) => text.trim().to_string(),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(%speaker, error = ?e, "Role failed to speak");
                String::new()
            }
        };
        if text.is_empty() {
            return None;
        }
        info!(%speaker, chars = text.len(), "Turn complete");
        self.record(speaker, &text).await;
        Some(text)
    }

    async fn record(&mut self, speaker: Speaker, text: &str) {
        self.state.record_utterance(speaker, text).await;
        self.emit(SessionEvent::Transcript {
            speaker,
            text: text.to_string(),
        })
        .await;
    }

    async fn highlight(&mut self, answer: &str) {
        let Some(highlighter) = self.highlighter.clone() else {
            return;
        };
        if answer.chars().count() < MIN_HIGHLIGHT_CHARS {
            return;
        }
        let diagnoses = self
            .state
            .diagnoses()
            .read()
            .await
            .list_consolidated_with_severity();
        if diagnoses.is_empty() {
            return;
        }
        let data = match highlighter.highlight(answer, &diagnoses).await {
            Ok(data) => data,
            Err(e) => {
                warn!(step = "highlight", error = ?e, "Highlighting failed");
                Vec::new()
            }
        };
        self.emit(SessionEvent::Highlights {
            speaker: Speaker::Subject,
            text: answer.to_string(),
            data,
        })
        .await;
    }

    async fn surface_snapshot(&mut self) {
        let Some(snapshot) = self.snapshots.take_if_dirty() else {
            return;
        };
        debug!(cycle = snapshot.cycle, "Surfacing analysis snapshot");
        self.emit(SessionEvent::Diagnosis {
            data: snapshot.diagnosis_data.clone(),
        })
        .await;
        self.emit(SessionEvent::Questions {
            data: snapshot.ranked_questions.clone(),
        })
        .await;
    }

    async fn advise(&self) -> Advice {
        let transcript = self.state.transcript_snapshot().await;
        let queue = self.state.questions().read().await.active_queue();
        match self.advisor.advise(&transcript, &queue).await {
            Ok(advice) => advice,
            Err(e) => {
                warn!(step = "advise", error = ?e, "Falling back to generic instruction");
                Advice {
                    next_instruction: self.config.generic_instruction.clone(),
                    reasoning: "Error".to_string(),
                    end_flag: false,
                    qid: None,
                }
            }
        }
    }

    async fn emit(&mut self, event: SessionEvent) {
        if self.transport_closed {
            return;
        }
        if self.events.send(event).await.is_err() {
            info!("Client transport closed");
            self.transport_closed = true;
        }
    }

    fn transport_gone(&mut self) -> bool {
        if self.events.is_closed() {
            self.transport_closed = true;
        }
        self.transport_closed
    }

    fn terminate(&mut self, reason: TerminationReason) -> TerminationReason {
        self.enter(DialogueState::Terminated);
        info!(?reason, turns = self.state.turn_count(), "Dialogue terminated");
        reason
    }
}
