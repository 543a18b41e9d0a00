//! Defines the WebSocket message protocol between the browser client and the API server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use voiceops_core::events::{BidiOutputEvent, TranscriptRole};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Optional negotiation frame. Only honoured as the first frame.
    Config {
        #[serde(default)]
        voice_id: Option<String>,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// A base64 encoded chunk of 16kHz mono PCM audio.
    BidiAudioInput { data: String },
    /// A text turn typed in place of speech.
    BidiTextInput { text: String },
    /// Explicit end of the session.
    Close,
    /// Any other `type`. Ignored.
    #[serde(other)]
    Unknown,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    BidiAudioStream {
        data: String,
        format: String,
        sample_rate: u32,
        channels: u16,
    },
    /// `delta` repeats `text` for clients that append fragments.
    BidiTranscriptStream {
        role: TranscriptRole,
        text: String,
        is_final: bool,
        delta: String,
    },
    BidiConnectionStart {
        connection_id: String,
        model: String,
    },
    BidiConnectionClose {
        connection_id: String,
        reason: String,
    },
    BidiConnectionRestart,
    BidiInterruption {
        reason: String,
    },
    BidiResponseStart {
        response_id: String,
    },
    BidiResponseComplete {
        response_id: String,
        stop_reason: String,
    },
    BidiError {
        message: String,
        code: Option<String>,
        details: Option<Value>,
    },
}

impl ServerMessage {
    /// Maps an agent event onto its wire frame. Internal bookkeeping events
    /// have no wire form and map to `None`.
    pub fn from_event(event: BidiOutputEvent) -> Option<Self> {
        let message = match event {
            BidiOutputEvent::AudioStream {
                audio,
                format,
                sample_rate,
                channels,
            } => Self::BidiAudioStream {
                data: audio,
                format,
                sample_rate,
                channels,
            },
            BidiOutputEvent::TranscriptStream {
                role,
                text,
                is_final,
            } => Self::BidiTranscriptStream {
                role,
                delta: text.clone(),
                text,
                is_final,
            },
            BidiOutputEvent::ConnectionStart {
                connection_id,
                model,
            } => Self::BidiConnectionStart {
                connection_id,
                model,
            },
            BidiOutputEvent::ConnectionClose {
                connection_id,
                reason,
            } => Self::BidiConnectionClose {
                connection_id,
                reason,
            },
            BidiOutputEvent::ConnectionRestart => Self::BidiConnectionRestart,
            BidiOutputEvent::Interruption { reason } => Self::BidiInterruption { reason },
            BidiOutputEvent::ResponseStart { response_id } => {
                Self::BidiResponseStart { response_id }
            }
            BidiOutputEvent::ResponseComplete {
                response_id,
                stop_reason,
            } => Self::BidiResponseComplete {
                response_id,
                stop_reason,
            },
            BidiOutputEvent::Error {
                message,
                code,
                details,
            } => Self::BidiError {
                message,
                code,
                details,
            },
            BidiOutputEvent::ToolUse { .. }
            | BidiOutputEvent::ToolResult { .. }
            | BidiOutputEvent::Usage { .. } => return None,
        };
        Some(message)
    }
}
