//! # Client ↔ Relay Protocol
//!
//! JSON text frames over the relay WebSocket.
//!
//! ## Client → Relay
//! - `{"type": "start"}`: open a turn
//! - `{"type": "audio", "audio": "<base64 PCM16>"}`: one captured frame
//! - `{"type": "stop"}`: end of the speaker's input
//!
//! ## Relay → Client
//! - `{"type": "status", "status": "recording" | "processing" | "done"}`
//! - `{"type": "audio_chunk", "audio": "<base64 PCM16>"}`
//! - `{"type": "error", "message": "..."}`

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "start")]
    Start,

    #[serde(rename = "audio")]
    Audio {
        /// Base64-encoded little-endian PCM16 at 16 kHz
        audio: String,
    },

    #[serde(rename = "stop")]
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Recording,
    Processing,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "status")]
    Status { status: TurnStatus },

    #[serde(rename = "audio_chunk")]
    AudioChunk {
        /// Base64 audio exactly as produced by the AI service
        audio: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerMessage {
    pub fn status(status: TurnStatus) -> Self {
        ServerMessage::Status { status }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Status { .. } => "status",
            ServerMessage::AudioChunk { .. } => "audio_chunk",
            ServerMessage::Error { .. } => "error",
        }
    }
}
