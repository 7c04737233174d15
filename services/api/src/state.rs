//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the session
//! registry and everything needed to start a new interview session.

use crate::config::Config;
use crate::prompts::{self, PromptSet};
use crate::registry::SessionRegistry;
use crate::ws::provider::gemini::{GeminiVoiceConnector, VoiceSettings};
use async_openai::config::OpenAIConfig;
use intake_core::analysts::{
    JsonCall, LlmAdvisor, LlmDiagnoser, LlmEvaluator, LlmHighlighter, LlmRanker, LlmTrigger,
};
use intake_core::chat_role::ChatRoleConnector;
use intake_core::collaborators::{Analysts, Highlighter, RoleConnector};
use intake_core::llm_client::{CompletionClient, OpenAICompatibleClient};
use intake_core::orchestrator::OrchestratorConfig;
use intake_core::question::QuestionPoolConfig;
use intake_core::session::SessionDeps;
use intake_core::worker::WorkerConfig;
use std::sync::Arc;
use tracing::info;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub session_deps: SessionDeps,
    pub question_config: QuestionPoolConfig,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the LLM-backed collaborators for the configured provider.
    pub fn new(config: Config, prompts: &PromptSet) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.api_key())
            .with_api_base(config.provider.api_base());

        let analysis_client: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
            openai_config.clone(),
            config.analysis_model.clone(),
        ));
        let chat_client: Arc<dyn CompletionClient> = Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.chat_model.clone(),
        ));

        let profile = prompts.patient_profile();
        let analysts = Analysts {
            trigger: Arc::new(LlmTrigger::new(JsonCall::new(
                analysis_client.clone(),
                prompts.get(prompts::DIAGNOSIS_TRIGGER),
                0.0,
            ))),
            diagnoser: Arc::new(LlmDiagnoser::new(
                JsonCall::new(analysis_client.clone(), prompts.get(prompts::DIAGNOSER), 0.2),
                profile,
            )),
            evaluator: Arc::new(LlmEvaluator::new(JsonCall::new(
                analysis_client.clone(),
                prompts.get(prompts::DIAGNOSIS_EVAL),
                0.1,
            ))),
            ranker: Arc::new(LlmRanker::new(
                JsonCall::new(analysis_client.clone(), prompts.get(prompts::Q_RANKER), 0.1),
                profile,
            )),
        };
        let advisor = Arc::new(LlmAdvisor::new(
            JsonCall::new(chat_client.clone(), prompts.get(prompts::ADVISOR), 0.2),
            profile,
        ));
        let highlighter: Arc<dyn Highlighter> = Arc::new(LlmHighlighter::new(JsonCall::new(
            analysis_client,
            prompts.get(prompts::HIGHLIGHTER),
            0.0,
        )));

        let connector: Arc<dyn RoleConnector> = if config.uses_voice() {
            info!(model = %config.voice_model, "Roles speak through Gemini Live.");
            Arc::new(GeminiVoiceConnector::new(
                config.api_key(),
                config.voice_model.clone(),
                VoiceSettings::interviewer(prompts.get(prompts::INTERVIEWER)),
                VoiceSettings::subject(prompts.subject_instruction()),
            ))
        } else {
            info!(model = %config.chat_model, "Roles speak through text chat.");
            Arc::new(ChatRoleConnector::new(
                chat_client,
                prompts.get(prompts::INTERVIEWER),
                prompts.subject_instruction(),
            ))
        };

        let session_deps = SessionDeps {
            connector,
            analysts,
            advisor,
            highlighter: Some(highlighter),
            worker: WorkerConfig {
                interval: config.analysis_interval,
                every_n_turns: config.analysis_every_n_turns,
            },
            orchestrator: OrchestratorConfig {
                pacing: config.turn_pacing,
                max_turns: config.max_turns,
                ..OrchestratorConfig::default()
            },
        };

        Self {
            registry: Arc::new(SessionRegistry::with_retention(config.max_finished_sessions)),
            session_deps,
            question_config: QuestionPoolConfig::default(),
            config: Arc::new(config),
        }
    }
}
