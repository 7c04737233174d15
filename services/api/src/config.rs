use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
const OPENAI_API_BASE: &str = "https://api.openai.com/v1/";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported LLM backends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible endpoint.
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => OPENAI_API_BASE,
            Provider::Gemini => GEMINI_API_BASE,
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o",
            Provider::Gemini => "gemini-2.5-flash",
        }
    }

    fn default_analysis_model(&self) -> &'static str {
        match self {
            Provider::OpenAI => "gpt-4o-mini",
            Provider::Gemini => "gemini-2.5-flash-lite",
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Model for the advisor and the text-only roles.
    pub chat_model: String,
    /// Model for trigger, diagnosis, evaluation, ranking and highlighting.
    pub analysis_model: String,
    /// Gemini Live model used when voice is enabled.
    pub voice_model: String,
    pub voice_enabled: bool,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub analysis_interval: Duration,
    pub analysis_every_n_turns: u64,
    pub turn_pacing: Duration,
    /// `None` when `MAX_TURNS` is 0.
    pub max_turns: Option<u32>,
    /// Finished sessions kept in the registry.
    pub max_finished_sessions: usize,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let provider = match var_or("LLM_PROVIDER", "gemini").to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            "openai" => Provider::OpenAI,
            other => {
                return Err(ConfigError::InvalidValue(
                    "LLM_PROVIDER".to_string(),
                    format!("'{}' is not one of 'gemini', 'openai'", other),
                ));
            }
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = var_or("CHAT_MODEL", provider.default_chat_model());
        let analysis_model = var_or("ANALYSIS_MODEL", provider.default_analysis_model());
        let voice_model = var_or("VOICE_MODEL", "models/gemini-2.0-flash-live-001");
        let voice_enabled: bool = parse_var("VOICE_ENABLED", "true")?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let analysis_interval_ms: u64 = parse_var("ANALYSIS_INTERVAL_MS", "2000")?;
        if analysis_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "ANALYSIS_INTERVAL_MS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let analysis_interval = Duration::from_millis(analysis_interval_ms);
        let analysis_every_n_turns: u64 = parse_var("ANALYSIS_EVERY_N_TURNS", "1")?;
        if analysis_every_n_turns == 0 {
            return Err(ConfigError::InvalidValue(
                "ANALYSIS_EVERY_N_TURNS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let turn_pacing = Duration::from_millis(parse_var("TURN_PACING_MS", "500")?);
        let max_turns = match parse_var::<u32>("MAX_TURNS", "40")? {
            0 => None,
            n => Some(n),
        };
        let max_finished_sessions: usize = parse_var("MAX_FINISHED_SESSIONS", "100")?;

        match provider {
            Provider::OpenAI => {
                if openai_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                    ));
                }
            }
            Provider::Gemini => {
                if gemini_api_key.is_none() {
                    return Err(ConfigError::MissingVar(
                        "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                    ));
                }
            }
        }

        Ok(Self {
            bind_address,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            analysis_model,
            voice_model,
            voice_enabled,
            log_level,
            prompts_path,
            analysis_interval,
            analysis_every_n_turns,
            turn_pacing,
            max_turns,
            max_finished_sessions,
        })
    }

    /// The API key of the selected provider.
    pub fn api_key(&self) -> &str {
        let key = match self.provider {
            Provider::OpenAI => &self.openai_api_key,
            Provider::Gemini => &self.gemini_api_key,
        };
        key.as_deref().unwrap_or_default()
    }

    /// Whether sessions speak through Gemini Live rather than text chat.
    pub fn uses_voice(&self) -> bool {
        self.voice_enabled && self.provider == Provider::Gemini
    }
}
