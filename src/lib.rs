//! # IELTS Voice Relay
//!
//! Real-time voice relay for spoken IELTS practice. A browser streams
//! microphone audio over a WebSocket; the relay forwards it to a speech AI
//! service and streams the synthesized reply back for playback.
//!
//! ## Crate Layout
//! - **audio**: PCM wire format, framing, silence detection, playback queue
//! - **relay**: client protocol, per-connection session state machine and
//!   the WebSocket actor that drives it
//! - **upstream**: connection to the AI service (Gemini Live)
//! - **client**: reference client used by the `ielts-replay` binary
//! - **config / state / error**: ambient plumbing shared by the server
//! - **health / handlers / middleware**: the HTTP surface

pub mod audio;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod relay;
pub mod state;
pub mod upstream;

pub use config::AppConfig;
pub use error::{AppError, AppResult, VoiceError};
pub use state::AppState;
