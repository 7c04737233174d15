//! Speech roles backed by a Google Gemini Live WebSocket connection.
//!
//! Each role holds its own Live session configured with the role's system
//! instruction and voice. A turn sends the input as a completed client turn
//! and streams the returned audio and its transcription until the server
//! marks the turn complete.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use intake_core::collaborators::{RoleConnector, SpeechRole};
use intake_core::events::{EventSender, SessionEvent};
use intake_core::transcript::Speaker;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
const SETUP_TIMEOUT: Duration = Duration::from_secs(15);
/// Longest silence tolerated between two frames of one turn.
const FRAME_TIMEOUT: Duration = Duration::from_secs(60);

type GeminiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// --- Local Gemini Live Types ---
mod gemini_live_types {
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) enum ClientMessage {
        Setup(BidiGenerateContentSetup),
        ClientContent(BidiGenerateContentClientContent),
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentSetup {
        pub model: String,
        pub generation_config: GenerationConfig,
        pub system_instruction: Content,
        pub output_audio_transcription: AudioTranscriptionConfig,
    }
    #[derive(Serialize, Debug)]
    pub(super) struct AudioTranscriptionConfig {}
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct BidiGenerateContentClientContent {
        pub turns: Vec<Content>,
        pub turn_complete: bool,
    }
    #[derive(Serialize, Debug)]
    pub(super) struct Content {
        #[serde(skip_serializing_if = "Option::is_none")]
        pub role: Option<String>,
        pub parts: Vec<Part>,
    }
    #[derive(Serialize, Debug)]
    pub(super) struct Part {
        pub text: String,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct GenerationConfig {
        pub response_modalities: Vec<ResponseModality>,
        pub speech_config: SpeechConfig,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "UPPERCASE")]
    pub(super) enum ResponseModality {
        Audio,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct SpeechConfig {
        pub voice_config: VoiceConfig,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct VoiceConfig {
        pub prebuilt_voice_config: PrebuiltVoiceConfig,
    }
    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct PrebuiltVoiceConfig {
        pub voice_name: String,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerMessage {
        pub setup_complete: Option<serde_json::Value>,
        pub server_content: Option<LiveServerContent>,
        pub go_away: Option<serde_json::Value>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct LiveServerContent {
        pub model_turn: Option<ServerContentTurn>,
        pub output_transcription: Option<ServerTranscription>,
        pub turn_complete: Option<bool>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerContentTurn {
        #[serde(default)]
        pub parts: Vec<ServerPart>,
    }
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub(super) struct ServerPart {
        pub inline_data: Option<ServerBlob>,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerBlob {
        pub data: String,
    }
    #[derive(Deserialize, Debug)]
    pub(super) struct ServerTranscription {
        pub text: String,
    }
}

use gemini_live_types as live;

/// System instruction and prebuilt voice for one role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    pub instruction: String,
    pub voice_name: String,
}

impl VoiceSettings {
    pub fn interviewer(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            voice_name: "Aoede".to_string(),
        }
    }

    pub fn subject(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            voice_name: "Puck".to_string(),
        }
    }
}

/// Opens one Gemini Live session per role.
pub struct GeminiVoiceConnector {
    url: String,
    model: String,
    interviewer: VoiceSettings,
    subject: VoiceSettings,
}

impl GeminiVoiceConnector {
    pub fn new(
        api_key: &str,
        model: impl Into<String>,
        interviewer: VoiceSettings,
        subject: VoiceSettings,
    ) -> Self {
        Self {
            url: format!("{}?key={}", LIVE_ENDPOINT, api_key),
            model: model.into(),
            interviewer,
            subject,
        }
    }
}

#[async_trait]
impl RoleConnector for GeminiVoiceConnector {
    async fn connect(&self, speaker: Speaker) -> Result<Box<dyn SpeechRole>> {
        let settings = match speaker {
            Speaker::Interviewer => &self.interviewer,
            Speaker::Subject => &self.subject,
        };
        let role = GeminiVoiceRole::connect(&self.url, &self.model, settings, speaker).await?;
        Ok(Box::new(role))
    }
}

pub struct GeminiVoiceRole {
    speaker: Speaker,
    socket: Mutex<GeminiSocket>,
}

impl GeminiVoiceRole {
    /// Connects, sends the setup message and waits for `setupComplete`.
    pub async fn connect(
        url: &str,
        model: &str,
        settings: &VoiceSettings,
        speaker: Speaker,
    ) -> Result<Self> {
        let (mut socket, _) = connect_async(url)
            .await
            .with_context(|| format!("Failed to connect {} to Gemini Live", speaker))?;

        send_json(&mut socket, &setup_message(model, settings)).await?;

        timeout(SETUP_TIMEOUT, async {
            loop {
                let frame = socket
                    .next()
                    .await
                    .ok_or_else(|| anyhow!("Gemini closed the connection during setup"))??;
                if let Some(msg) = decode_frame(frame)? {
                    if msg.setup_complete.is_some() {
                        return Ok::<_, anyhow::Error>(());
                    }
                    warn!(?msg, "Unexpected Gemini message during setup");
                }
            }
        })
        .await
        .map_err(|_| anyhow!("Timed out waiting for Gemini setup to complete"))??;

        info!(%speaker, voice = %settings.voice_name, "Gemini Live session ready.");
        Ok(Self {
            speaker,
            socket: Mutex::new(socket),
        })
    }
}

#[async_trait]
impl SpeechRole for GeminiVoiceRole {
    fn speaker(&self) -> Speaker {
        self.speaker
    }

    async fn speak(&self, text: &str, events: &EventSender) -> Result<Option<String>> {
        let turn_id = Uuid::new_v4();
        let speaker = self.speaker;
        let mut socket = self.socket.lock().await;
        send_json(&mut socket, &user_turn(text)).await?;

        let mut transcript = String::new();
        loop {
            let frame = timeout(FRAME_TIMEOUT, socket.next())
                .await
                .map_err(|_| anyhow!("Timed out waiting for {} to finish speaking", speaker))?
                .ok_or_else(|| anyhow!("Gemini connection ended mid-turn"))??;
            let Some(msg) = decode_frame(frame)? else {
                continue;
            };
            if msg.go_away.is_some() {
                warn!(%speaker, "Gemini announced it will close the connection");
            }

            let chunk = TurnChunk::from(msg);
            // Send failures mean the client is gone; the orchestrator notices on its own.
            for data in chunk.audio {
                let _ = events
                    .send(SessionEvent::Audio {
                        turn_id,
                        speaker,
                        data,
                    })
                    .await;
            }
            if let Some(text) = chunk.transcription {
                transcript.push_str(&text);
                let _ = events
                    .send(SessionEvent::TextDelta {
                        turn_id,
                        speaker,
                        text,
                    })
                    .await;
            }
            if chunk.turn_complete {
                let _ = events
                    .send(SessionEvent::TurnComplete { turn_id, speaker })
                    .await;
                break;
            }
        }

        let transcript = transcript.trim();
        debug!(%speaker, chars = transcript.len(), "Gemini turn complete");
        Ok((!transcript.is_empty()).then(|| transcript.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.socket
            .lock()
            .await
            .close(None)
            .await
            .context("Failed to close Gemini Live connection")
    }
}

/// What one server frame contributes to the current turn.
#[derive(Debug, Default, PartialEq)]
struct TurnChunk {
    audio: Vec<String>,
    transcription: Option<String>,
    turn_complete: bool,
}

impl From<live::ServerMessage> for TurnChunk {
    fn from(msg: live::ServerMessage) -> Self {
        let Some(content) = msg.server_content else {
            return Self::default();
        };
        let audio = content
            .model_turn
            .map(|turn| {
                turn.parts
                    .into_iter()
                    .filter_map(|part| part.inline_data.map(|blob| blob.data))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            audio,
            transcription: content
                .output_transcription
                .map(|t| t.text)
                .filter(|t| !t.is_empty()),
            turn_complete: content.turn_complete == Some(true),
        }
    }
}

fn setup_message(model: &str, settings: &VoiceSettings) -> live::ClientMessage {
    live::ClientMessage::Setup(live::BidiGenerateContentSetup {
        model: model.to_string(),
        generation_config: live::GenerationConfig {
            response_modalities: vec![live::ResponseModality::Audio],
            speech_config: live::SpeechConfig {
                voice_config: live::VoiceConfig {
                    prebuilt_voice_config: live::PrebuiltVoiceConfig {
                        voice_name: settings.voice_name.clone(),
                    },
                },
            },
        },
        system_instruction: live::Content {
            role: None,
            parts: vec![live::Part {
                text: settings.instruction.clone(),
            }],
        },
        output_audio_transcription: live::AudioTranscriptionConfig {},
    })
}

fn user_turn(text: &str) -> live::ClientMessage {
    live::ClientMessage::ClientContent(live::BidiGenerateContentClientContent {
        turns: vec![live::Content {
            role: Some("user".to_string()),
            parts: vec![live::Part {
                text: text.to_string(),
            }],
        }],
        turn_complete: true,
    })
}

async fn send_json(socket: &mut GeminiSocket, msg: &live::ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(msg)?;
    socket.send(WsMessage::Text(payload.into())).await?;
    Ok(())
}

/// Parses a Live frame. Gemini sends JSON as either text or binary frames.
fn decode_frame(frame: WsMessage) -> Result<Option<live::ServerMessage>> {
    let msg = match frame {
        WsMessage::Text(text) => serde_json::from_str(text.as_str())?,
        WsMessage::Binary(bytes) => serde_json::from_slice(&bytes)?,
        WsMessage::Close(close_frame) => bail!("Gemini closed the connection: {:?}", close_frame),
        _ => return Ok(None),
    };
    Ok(Some(msg))
}
