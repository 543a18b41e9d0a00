//! Typed events exchanged between the connection adapters and an agent instance.
//!
//! Input events flow from the browser into the agent; output events flow from
//! the agent back towards the browser. Each variant carries only the fields
//! that are meaningful for its kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sample rate of audio accepted from the browser.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Channel count of audio accepted from the browser.
pub const INPUT_CHANNELS: u16 = 1;
/// Encoding of audio accepted from the browser.
pub const INPUT_AUDIO_FORMAT: &str = "pcm";

/// An event delivered to an agent instance.
#[derive(Debug, Clone, PartialEq)]
pub enum BidiInputEvent {
    /// A chunk of base64 encoded audio.
    AudioInput {
        audio: String,
        format: String,
        sample_rate: u32,
        channels: u16,
    },
    /// A complete text turn typed by the user.
    TextInput { text: String },
}

impl BidiInputEvent {
    /// Wraps a browser audio chunk, which always arrives as 16kHz mono PCM.
    pub fn pcm_audio(audio: impl Into<String>) -> Self {
        Self::AudioInput {
            audio: audio.into(),
            format: INPUT_AUDIO_FORMAT.to_string(),
            sample_rate: INPUT_SAMPLE_RATE,
            channels: INPUT_CHANNELS,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::TextInput { text: text.into() }
    }
}

/// Speaker of a transcript fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

/// An event emitted by an agent instance.
///
/// The `ToolUse`, `ToolResult` and `Usage` variants are bookkeeping for the agent
/// itself and have no representation on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum BidiOutputEvent {
    AudioStream {
        audio: String,
        format: String,
        sample_rate: u32,
        channels: u16,
    },
    TranscriptStream {
        role: TranscriptRole,
        text: String,
        is_final: bool,
    },
    ConnectionStart {
        connection_id: String,
        model: String,
    },
    ConnectionClose {
        connection_id: String,
        reason: String,
    },
    ConnectionRestart,
    Interruption {
        reason: String,
    },
    ResponseStart {
        response_id: String,
    },
    ResponseComplete {
        response_id: String,
        stop_reason: String,
    },
    Error {
        message: String,
        code: Option<String>,
        details: Option<Value>,
    },
    ToolUse {
        tool_use_id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
    Usage {
        input_tokens: u32,
        output_tokens: u32,
    },
}

impl BidiOutputEvent {
    pub fn error(message: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.map(str::to_string),
            details: None,
        }
    }

    /// Whether this event is internal bookkeeping that never leaves the process.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::ToolUse { .. } | Self::ToolResult { .. } | Self::Usage { .. }
        )
    }
}
