//! Events emitted towards the client-facing transport.
//!
//! The core only decides *what* happened; the transport owns the wire format.
//! A closed channel is how the core learns the client has gone away.

use crate::diagnosis::RankedDiagnosis;
use crate::question::QuestionRecord;
use crate::transcript::Speaker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightLevel {
    Danger,
    Warning,
}

/// A fragment of a subject answer flagged as clinically notable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub level: HighlightLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Session lifecycle notice or user-visible error.
    System { message: String },
    /// A completed utterance.
    Transcript { speaker: Speaker, text: String },
    /// Consolidated diagnoses from the latest analysis cycle.
    Diagnosis { data: Vec<RankedDiagnosis> },
    /// Ranked active questions from the latest analysis cycle.
    Questions { data: Vec<QuestionRecord> },
    /// Notable fragments of a subject answer.
    Highlights {
        speaker: Speaker,
        text: String,
        data: Vec<Highlight>,
    },
    /// Base64 audio streamed while a role is speaking.
    Audio {
        turn_id: Uuid,
        speaker: Speaker,
        data: String,
    },
    /// Interim text streamed while a role is speaking.
    TextDelta {
        turn_id: Uuid,
        speaker: Speaker,
        text: String,
    },
    TurnComplete { turn_id: Uuid, speaker: Speaker },
}

pub type EventSender = mpsc::Sender<SessionEvent>;
pub type EventReceiver = mpsc::Receiver<SessionEvent>;

impl SessionEvent {
    pub fn system(message: impl Into<String>) -> Self {
        SessionEvent::System {
            message: message.into(),
        }
    }
}
