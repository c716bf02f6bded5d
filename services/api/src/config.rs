use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported OpenAI-compatible backends for the chat relay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

impl Provider {
    /// Base URL of the provider's OpenAI-compatible API.
    pub fn api_base(&self) -> &'static str {
        match self {
            Provider::OpenAI => "https://api.openai.com/v1/",
            Provider::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }
}

/// Deployment values returned to the platform when it asks for an assistant.
#[derive(Clone, Debug, PartialEq)]
pub struct AssistantSettings {
    pub name: String,
    /// URL the platform calls back for chat turns (this service's public address).
    pub custom_llm_url: String,
    pub voice_provider: String,
    pub voice_id: String,
    pub voice_speed: f32,
    pub first_message: String,
    pub recording_enabled: bool,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub temperature: f32,
    pub log_level: Level,
    pub prompts_path: PathBuf,
    pub fragment_timeout: Duration,
    pub assistant: AssistantSettings,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var_or(name, default)
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:5000")?;

        let provider = match var_or("LLM_PROVIDER", "openai").to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            _ => Provider::OpenAI,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = var_or("CHAT_MODEL", "gpt-4o");

        let temperature = parse_var::<f32>("CHAT_TEMPERATURE", "0.7")?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "CHAT_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", temperature),
            ));
        }

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

        let fragment_timeout_secs = parse_var::<u64>("FRAGMENT_TIMEOUT_SECS", "30")?;
        if fragment_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FRAGMENT_TIMEOUT_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let custom_llm_url = std::env::var("CUSTOM_LLM_URL")
            .map_err(|_| ConfigError::MissingVar("CUSTOM_LLM_URL".to_string()))?;

        let assistant = AssistantSettings {
            name: var_or("ASSISTANT_NAME", "Andrew"),
            custom_llm_url,
            voice_provider: var_or("VOICE_PROVIDER", "azure"),
            voice_id: var_or("VOICE_ID", "andrew"),
            voice_speed: parse_var::<f32>("VOICE_SPEED", "1.0")?,
            first_message: var_or(
                "FIRST_MESSAGE",
                "Hi, I'm Andrew, your personal AI assistant. How can I help you today?",
            ),
            recording_enabled: parse_var::<bool>("RECORDING_ENABLED", "true")?,
        };

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
            temperature,
            log_level,
            prompts_path,
            fragment_timeout: Duration::from_secs(fragment_timeout_secs),
            assistant,
        })
    }

    /// The API key for the configured provider.
    pub fn api_key(&self) -> Option<&str> {
        match self.provider {
            Provider::OpenAI => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        }
    }
}
