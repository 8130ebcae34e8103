//! # Reference Client
//!
//! The browser side of a turn, without a browser:
//! - **turn**: status tracking and the rules for what may be sent
//! - **connection**: WebSocket connection to the relay
//! - **capture**: WAV file capture standing in for a microphone
//! - **sink**: WAV file output standing in for speakers
//!
//! Used by the `ielts-replay` binary and by end-to-end tests.

pub mod capture;
pub mod connection;
pub mod sink;
pub mod turn;

pub use capture::WavCapture;
pub use connection::{connect, RelayReceiver, RelaySender};
pub use sink::WavFileSink;
pub use turn::{ClientStatus, ClientTurn};
