//! Agent Contracts
//!
//! The conversational engine is an external collaborator. This module fixes the
//! seams the session bridge relies on: the input and output channels an agent
//! is run against, the disposable agent instance itself, and the factory that
//! builds a new instance whenever a connection starts or has to be rebuilt.

use crate::{
    events::{BidiInputEvent, BidiOutputEvent},
    history::{SessionHistory, Turn},
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Voices the speech model can render.
pub const SUPPORTED_VOICES: &[&str] = &["matthew", "tiffany", "amy"];
pub const DEFAULT_VOICE: &str = "matthew";

/// Error code a model reports when a single stream has run for too long.
pub const STREAM_LIMIT_CODE: &str = "StreamLimitExceeded";
/// Fallback marker looked for in error text when no structured code is given.
const STREAM_LIMIT_MARKER: &str = "stream length exceeded";

pub fn is_supported_voice(voice_id: &str) -> bool {
    SUPPORTED_VOICES.contains(&voice_id)
}

/// Model parameters shared by every agent instance of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model_id: String,
    pub region: String,
    pub profile: Option<String>,
    pub voice_id: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub audio_format: String,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            region: region.into(),
            profile: None,
            voice_id: DEFAULT_VOICE.to_string(),
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            channels: 1,
            audio_format: "pcm".to_string(),
        }
    }

    pub fn with_voice(mut self, voice_id: impl Into<String>) -> Self {
        self.voice_id = voice_id.into();
        self
    }
}

/// Everything needed to build an agent instance for one session.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub session_id: String,
    pub model: ModelConfig,
    pub system_prompt: Arc<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The model closed the stream because it reached its maximum duration.
    #[error("Model stream limit reached: {0}")]
    StreamLimit(String),
    #[error("Model error: {message}")]
    Model {
        code: Option<String>,
        message: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            code: None,
            message: message.into(),
        }
    }
}

/// How the session bridge should react to a failed agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The stream hit its duration ceiling; a fresh instance can continue.
    StreamLimit,
    /// Anything else ends the connection.
    Fatal,
}

/// Decides whether a failed run can be recovered by rebuilding the agent.
///
/// Structured signals win; matching on the error text is the last resort.
pub fn classify_failure(error: &AgentError) -> FailureKind {
    match error {
        AgentError::StreamLimit(_) => FailureKind::StreamLimit,
        AgentError::Model {
            code: Some(code), ..
        } if code == STREAM_LIMIT_CODE => FailureKind::StreamLimit,
        other => {
            let text = format!("{other:#}").to_lowercase();
            if text.contains(STREAM_LIMIT_MARKER) {
                FailureKind::StreamLimit
            } else {
                FailureKind::Fatal
            }
        }
    }
}

/// Source of input events for an agent.
#[async_trait]
pub trait BidiInput: Send {
    /// Starts producing events. `agent_stop` is cancelled when the input learns
    /// the user is gone.
    async fn start(&mut self, agent_stop: CancellationToken);

    /// Waits for the next event. `None` means the input is exhausted.
    async fn next(&mut self) -> Option<BidiInputEvent>;

    /// Stops producing events. Safe to call more than once.
    async fn stop(&mut self);
}

/// Sink for events an agent emits.
#[async_trait]
pub trait BidiOutput: Send {
    async fn start(&mut self);

    /// Delivers one event. Delivery problems are the output's concern and are
    /// never reported back to the agent.
    async fn send(&mut self, event: BidiOutputEvent);

    async fn stop(&mut self);
}

/// A single, disposable instance of the conversational engine.
#[async_trait]
pub trait BidiAgent: Send {
    /// Runs until the stop handle is cancelled, the input is exhausted, or the
    /// model fails.
    async fn run(
        &mut self,
        input: &mut dyn BidiInput,
        output: &mut dyn BidiOutput,
    ) -> Result<(), AgentError>;

    /// Handle that asks a running instance to finish cleanly.
    fn stop_handle(&self) -> CancellationToken;

    /// The live conversation the instance will continue from.
    fn history_mut(&mut self) -> &mut Vec<Turn>;
}

/// Builds agent instances bound to a session's history.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn create(
        &self,
        spec: &AgentSpec,
        session: SessionHistory,
    ) -> Result<Box<dyn BidiAgent>, AgentError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn structured_stream_limit_is_recoverable() {
        let err = AgentError::StreamLimit("8 minute ceiling".into());
        assert_eq!(classify_failure(&err), FailureKind::StreamLimit);

        let err = AgentError::Model {
            code: Some(STREAM_LIMIT_CODE.into()),
            message: "closed".into(),
        };
        assert_eq!(classify_failure(&err), FailureKind::StreamLimit);
    }

    #[test]
    fn message_text_is_the_fallback() {
        let err = AgentError::model("ValidationException: Stream length exceeded for session");
        assert_eq!(classify_failure(&err), FailureKind::StreamLimit);

        let err = AgentError::Other(anyhow!("transport: stream length exceeded"));
        assert_eq!(classify_failure(&err), FailureKind::StreamLimit);
    }

    #[test]
    fn wrapped_context_is_searched() {
        let err = AgentError::Other(anyhow!("stream length exceeded").context("model run failed"));
        assert_eq!(classify_failure(&err), FailureKind::StreamLimit);
    }

    #[test]
    fn other_failures_are_fatal() {
        let err = AgentError::Model {
            code: Some("ThrottlingException".into()),
            message: "slow down".into(),
        };
        assert_eq!(classify_failure(&err), FailureKind::Fatal);
        assert_eq!(
            classify_failure(&AgentError::Other(anyhow!("connection reset"))),
            FailureKind::Fatal
        );
    }

    #[test]
    fn model_config_defaults_match_browser_audio() {
        let config = ModelConfig::new("model", "us-east-1").with_voice("amy");
        assert_eq!(config.voice_id, "amy");
        assert_eq!(config.input_sample_rate, 16_000);
        assert_eq!(config.output_sample_rate, 24_000);
        assert_eq!(config.channels, 1);
        assert!(is_supported_voice("tiffany"));
        assert!(!is_supported_voice("bob"));
    }
}
