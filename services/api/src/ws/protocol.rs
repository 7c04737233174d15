//! Defines the WebSocket message protocol between the browser client and the API server.

use intake_core::diagnosis::RankedDiagnosis;
use intake_core::events::{Highlight, SessionEvent};
use intake_core::question::QuestionRecord;
use intake_core::transcript::Speaker;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Starts the simulated interview. This must be the first message.
    Start,
}

impl ClientMessage {
    /// Parses a text frame. A bare `start` is accepted as well as the JSON form.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("start") {
            return Some(ClientMessage::Start);
        }
        serde_json::from_str(text).ok()
    }
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session lifecycle notice or error.
    System { message: String },
    /// A finished utterance.
    Transcript { speaker: Speaker, text: String },
    Diagnosis { data: Vec<RankedDiagnosis> },
    Questions { data: Vec<QuestionRecord> },
    Highlights {
        speaker: Speaker,
        text: String,
        data: Vec<Highlight>,
    },
    /// Base64 PCM16 audio of the turn `id`.
    Audio {
        id: Uuid,
        speaker: Speaker,
        data: String,
    },
    TextDelta {
        id: Uuid,
        speaker: Speaker,
        text: String,
    },
    TurnComplete { id: Uuid, speaker: Speaker },
}

impl From<SessionEvent> for ServerMessage {
    fn from(event: SessionEvent) -> Self {
        match event {
            SessionEvent::System { message } => ServerMessage::System { message },
            SessionEvent::Transcript { speaker, text } => {
                ServerMessage::Transcript { speaker, text }
            }
            SessionEvent::Diagnosis { data } => ServerMessage::Diagnosis { data },
            SessionEvent::Questions { data } => ServerMessage::Questions { data },
            SessionEvent::Highlights {
                speaker,
                text,
                data,
            } => ServerMessage::Highlights {
                speaker,
                text,
                data,
            },
            SessionEvent::Audio {
                turn_id,
                speaker,
                data,
            } => ServerMessage::Audio {
                id: turn_id,
                speaker,
                data,
            },
            SessionEvent::TextDelta {
                turn_id,
                speaker,
                text,
            } => ServerMessage::TextDelta {
                id: turn_id,
                speaker,
                text,
            },
            SessionEvent::TurnComplete { turn_id, speaker } => ServerMessage::TurnComplete {
                id: turn_id,
                speaker,
            },
        }
    }
}
