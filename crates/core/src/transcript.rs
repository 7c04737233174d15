//! Interview Transcript
//!
//! The append-only record of everything either role has said during a
//! session. Entries are immutable once stored; consumers on other tasks or
//! threads work from an owned copy obtained through [`TranscriptStore::snapshot`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two scripted roles taking part in an interview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Speaker {
    Interviewer,
    Subject,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Interviewer => write!(f, "INTERVIEWER"),
            Speaker::Subject => write!(f, "SUBJECT"),
        }
    }
}

/// A single stored utterance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Position in the transcript, starting at 0.
    pub sequence: u64,
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    entries: Vec<Utterance>,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an utterance stamped with the current wall-clock time and
    /// returns a copy of the stored entry.
    pub fn append(&mut self, speaker: Speaker, text: impl Into<String>) -> Utterance {
        let entry = Utterance {
            sequence: self.entries.len() as u64,
            speaker,
            text: text.into(),
            timestamp: Utc::now(),
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Returns an independent copy of the transcript.
    pub fn snapshot(&self) -> Vec<Utterance> {
        self.entries.clone()
    }

    /// The most recent utterance by `speaker`, if any.
    pub fn last_from(&self, speaker: Speaker) -> Option<&Utterance> {
        self.entries.iter().rev().find(|u| u.speaker == speaker)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_sequence_in_order() {
        let mut store = TranscriptStore::new();
        let first = store.append(Speaker::Interviewer, "Hello, I'm the nurse.");
        let second = store.append(Speaker::Subject, "Hi, I'm Arthur.");

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert!(second.timestamp >= first.timestamp);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_snapshot_is_detached_from_store() {
        let mut store = TranscriptStore::new();
        store.append(Speaker::Interviewer, "How long has it hurt?");

        let mut copy = store.snapshot();
        copy.push(Utterance {
            sequence: 99,
            speaker: Speaker::Subject,
            text: "injected".to_string(),
            timestamp: Utc::now(),
        });
        store.append(Speaker::Subject, "Three days.");

        assert_eq!(store.len(), 2);
        assert_eq!(store.snapshot()[1].text, "Three days.");
        assert_eq!(copy.len(), 2);
        assert_eq!(copy[1].text, "injected");
    }

    #[test]
    fn test_last_from_picks_latest_by_speaker() {
        let mut store = TranscriptStore::new();
        assert!(store.last_from(Speaker::Subject).is_none());

        store.append(Speaker::Subject, "first");
        store.append(Speaker::Interviewer, "question");
        store.append(Speaker::Subject, "second");

        assert_eq!(store.last_from(Speaker::Subject).unwrap().text, "second");
        assert_eq!(
            store.last_from(Speaker::Interviewer).unwrap().text,
            "question"
        );
    }

    #[test]
    fn test_speaker_display_and_serialization() {
        assert_eq!(Speaker::Interviewer.to_string(), "INTERVIEWER");
        assert_eq!(
            serde_json::to_string(&Speaker::Subject).unwrap(),
            "\"SUBJECT\""
        );
    }
}
