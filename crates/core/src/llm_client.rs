use anyhow::{Context, Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse, ResponseFormat,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use std::pin::Pin;

/// A stream of text chunks from the LLM.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One message of a chat history, from the point of view of the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    /// Input the model is responding to.
    User(String),
    /// Something the model said earlier.
    Assistant(String),
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Makes a single call that must answer with a JSON object.
    async fn complete_json(&self, system_prompt: &str, user: &str, temperature: f32)
    -> Result<String>;

    /// Streams a free-text reply to a chat history.
    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<TextStream>;
}

/// An implementation of `CompletionClient` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - The configuration for the OpenAI client, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions (e.g., "gemini-2.5-flash").
    pub fn new(config: OpenAIConfig, model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            model: model.into(),
        }
    }
}

fn system_message(text: &str) -> Result<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestSystemMessageArgs::default()
        .content(text)
        .build()?
        .into())
}

fn history_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
    Ok(match message {
        ChatMessage::User(text) => ChatCompletionRequestUserMessageArgs::default()
            .content(text)
            .build()?
            .into(),
        ChatMessage::Assistant(text) => ChatCompletionRequestAssistantMessageArgs::default()
            .content(text)
            .build()?
            .into(),
    })
}

#[async_trait]
impl CompletionClient for OpenAICompatibleClient {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user: &str,
        temperature: f32,
    ) -> Result<String> {
        let messages = vec![
            system_message(system_prompt)?,
            history_message(ChatMessage::User(user.to_string()))?,
        ];
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(temperature)
            .response_format(ResponseFormat::JsonObject)
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| anyhow!("LLM response had no text content."))
    }

    async fn stream_chat(
        &self,
        system_prompt: &str,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<TextStream> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(system_message(system_prompt)?);
        for message in history {
            messages.push(history_message(message)?);
        }
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(temperature)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response.choices.first()?.delta.content.clone()?;
                    (!content.is_empty()).then_some(Ok(content))
                }
                Err(e) => Some(Err(e.into())),
            }
        })))
    }
}

/// Strips a Markdown code fence some models wrap around JSON output.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = body.strip_prefix("json").unwrap_or(body);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parses a model reply as JSON.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(strip_code_fence(raw))
        .with_context(|| format!("Malformed JSON from LLM: {}", raw.trim()))
}

/// Parses a model reply that should be a list, either bare or wrapped in an
/// object under `key` (JSON mode only allows objects at the top level).
pub fn parse_json_list<T: DeserializeOwned>(raw: &str, key: &str) -> Result<Vec<T>> {
    let value: serde_json::Value = parse_json(raw)?;
    let list = match value {
        serde_json::Value::Array(items) => serde_json::Value::Array(items),
        serde_json::Value::Object(mut map) => map
            .remove(key)
            .ok_or_else(|| anyhow!("LLM reply is missing the '{key}' list"))?,
        other => return Err(anyhow!("Expected a JSON list from LLM, got: {other}")),
    };
    serde_json::from_value(list).context("LLM list has the wrong shape")
}
