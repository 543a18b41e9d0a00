use std::path::PathBuf;
use tracing::Level;
use voiceops_core::agent::{DEFAULT_VOICE, SUPPORTED_VOICES, is_supported_voice};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Backends reachable through the OpenAI-compatible chat client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub aws_profile: Option<String>,
    pub aws_region: String,
    pub voice_id: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    pub history_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let host = std::env::var("HOST").unwrap_or_else(|_| "localhost".to_string());
        let port_str = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string());
        let port = port_str
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?;

        let aws_profile = std::env::var("AWS_PROFILE").ok().filter(|p| !p.is_empty());
        let aws_region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| "us-east-1".to_string());

        let voice_id = std::env::var("VOICE_ID").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
        validate_voice("VOICE_ID", &voice_id)?;

        let provider_str = std::env::var("MODEL_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            _ => Provider::OpenAI,
        };

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();

        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let history_path = std::env::var("HISTORY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./sessions"));

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
            host,
            port,
            aws_profile,
            aws_region,
            voice_id,
            provider,
            openai_api_key,
            gemini_api_key,
            chat_model,
            log_level,
            history_path,
        })
    }

    /// Replaces the default voice, rejecting voices the model cannot render.
    pub fn set_voice(&mut self, voice_id: &str) -> Result<(), ConfigError> {
        validate_voice("--voice", voice_id)?;
        self.voice_id = voice_id.to_string();
        Ok(())
    }
}

fn validate_voice(source: &str, voice_id: &str) -> Result<(), ConfigError> {
    if is_supported_voice(voice_id) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue(
            source.to_string(),
            format!(
                "'{}' is not one of {}",
                voice_id,
                SUPPORTED_VOICES.join(", ")
            ),
        ))
    }
}
