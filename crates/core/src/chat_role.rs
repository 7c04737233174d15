//! Text-only conversational roles backed by chat completion.
//!
//! Used when no voice provider is configured. A role keeps its own chat
//! history, so each side of the interview only sees what was said to it and
//! what it said back.

use crate::collaborators::{RoleConnector, SpeechRole};
use crate::events::{EventSender, SessionEvent};
use crate::llm_client::{ChatMessage, CompletionClient};
use crate::transcript::Speaker;
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

const CHAT_TEMPERATURE: f32 = 0.7;

pub struct ChatRole {
    speaker: Speaker,
    client: Arc<dyn CompletionClient>,
    system_prompt: String,
    history: Mutex<Vec<ChatMessage>>,
}

impl ChatRole {
    pub fn new(
        speaker: Speaker,
        client: Arc<dyn CompletionClient>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            speaker,
            client,
            system_prompt: system_prompt.into(),
            history: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechRole for ChatRole {
    fn speaker(&self) -> Speaker {
        self.speaker
    }

    async fn speak(&self, text: &str, events: &EventSender) -> Result<Option<String>> {
        let mut history = self.history.lock().await;
        let mut messages = history.clone();
        messages.push(ChatMessage::User(text.to_string()));

        let mut stream = self
            .client
            .stream_chat(&self.system_prompt, messages, CHAT_TEMPERATURE)
            .await?;

        let turn_id = Uuid::new_v4();
        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            reply.push_str(&chunk);
            let _ = events
                .send(SessionEvent::TextDelta {
                    turn_id,
                    speaker: self.speaker,
                    text: chunk,
                })
                .await;
        }
        let _ = events
            .send(SessionEvent::TurnComplete {
                turn_id,
                speaker: self.speaker,
            })
            .await;

        let reply = reply.trim().to_string();
        debug!(speaker = %self.speaker, chars = reply.len(), "Chat reply finished");
        if reply.is_empty() {
            return Ok(None);
        }
        // Only a completed exchange enters the history.
        history.push(ChatMessage::User(text.to_string()));
        history.push(ChatMessage::Assistant(reply.clone()));
        Ok(Some(reply))
    }

    async fn close(&self) -> Result<()> {
        self.history.lock().await.clear();
        Ok(())
    }
}

/// Hands out [`ChatRole`]s with a fixed system prompt per speaker.
pub struct ChatRoleConnector {
    client: Arc<dyn CompletionClient>,
    interviewer_prompt: String,
    subject_prompt: String,
}

impl ChatRoleConnector {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        interviewer_prompt: impl Into<String>,
        subject_prompt: impl Into<String>,
    ) -> Self {
        Self {
            client,
            interviewer_prompt: interviewer_prompt.into(),
            subject_prompt: subject_prompt.into(),
        }
    }
}

#[async_trait]
impl RoleConnector for ChatRoleConnector {
    async fn connect(&self, speaker: Speaker) -> Result<Box<dyn SpeechRole>> {
        let prompt = match speaker {
            Speaker::Interviewer => &self.interviewer_prompt,
            Speaker::Subject => &self.subject_prompt,
        };
        Ok(Box::new(ChatRole::new(
            speaker,
            self.client.clone(),
            prompt.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{MockCompletionClient, TextStream};
    use anyhow::anyhow;
    use futures::stream;
    use tokio::sync::mpsc;

    fn chunks(parts: &[&str]) -> TextStream {
        let items: Vec<Result<String>> = parts.iter().map(|p| Ok(p.to_string())).collect();
        Box::pin(stream::iter(items))
    }

    #[tokio::test]
    async fn test_speak_streams_deltas_and_returns_full_text() {
        let mut client = MockCompletionClient::new();
        client
            .expect_stream_chat()
            .times(1)
            .returning(|system, history, _| {
                assert_eq!(system, "You are a patient.");
                assert_eq!(history, vec![ChatMessage::User("Hello?".to_string())]);
                Ok(chunks(&["Hi, ", "I'm Arthur."]))
            });
        let role = ChatRole::new(Speaker::Subject, Arc::new(client), "You are a patient.");
        let (tx, mut rx) = mpsc::channel(16);

        let reply = role.speak("Hello?", &tx).await.unwrap();

        assert_eq!(reply.as_deref(), Some("Hi, I'm Arthur."));
        let mut deltas = Vec::new();
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SessionEvent::TextDelta { text, speaker, .. } => {
                    assert_eq!(speaker, Speaker::Subject);
                    deltas.push(text);
                }
                SessionEvent::TurnComplete { .. } => completed = true,
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(deltas, vec!["Hi, ", "I'm Arthur."]);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_history_carries_previous_exchange() {
        let mut client = MockCompletionClient::new();
        client
            .expect_stream_chat()
            .times(2)
            .returning(|_, history, _| Ok(chunks(&[format!("reply {}", history.len()).as_str()])));
        let role = ChatRole::new(Speaker::Interviewer, Arc::new(client), "prompt");
        let (tx, _rx) = mpsc::channel(16);

        assert_eq!(role.speak("first", &tx).await.unwrap().unwrap(), "reply 1");
        assert_eq!(role.speak("second", &tx).await.unwrap().unwrap(), "reply 3");
    }

    #[tokio::test]
    async fn test_empty_reply_is_none_and_not_remembered() {
        let mut client = MockCompletionClient::new();
        client
            .expect_stream_chat()
            .times(2)
            .returning(|_, history, _| {
                assert_eq!(history.len(), 1);
                Ok(chunks(&["  "]))
            });
        let role = ChatRole::new(Speaker::Subject, Arc::new(client), "prompt");
        let (tx, _rx) = mpsc::channel(16);

        assert_eq!(role.speak("one", &tx).await.unwrap(), None);
        assert_eq!(role.speak("two", &tx).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stream_error_fails_the_turn() {
        let mut client = MockCompletionClient::new();
        client.expect_stream_chat().returning(|_, _, _| {
            let items: Vec<Result<String>> = vec![Ok("par".to_string()), Err(anyhow!("reset"))];
            Ok(Box::pin(stream::iter(items)) as TextStream)
        });
        let role = ChatRole::new(Speaker::Subject, Arc::new(client), "prompt");
        let (tx, _rx) = mpsc::channel(16);

        assert!(role.speak("hi", &tx).await.is_err());
    }

    #[tokio::test]
    async fn test_connector_assigns_prompts_by_speaker() {
        let mut client = MockCompletionClient::new();
        client
            .expect_stream_chat()
            .returning(|system, _, _| Ok(chunks(&[system])));
        let connector = ChatRoleConnector::new(Arc::new(client), "nurse", "patient");
        let (tx, _rx) = mpsc::channel(16);

        let subject = connector.connect(Speaker::Subject).await.unwrap();
        assert_eq!(subject.speaker(), Speaker::Subject);
        assert_eq!(subject.speak("hi", &tx).await.unwrap().unwrap(), "patient");
        subject.close().await.unwrap();
    }
}
