//! # Session Relay
//!
//! Bridges a browser client and the speech AI service for one conversation:
//! - **protocol**: JSON messages exchanged with the client
//! - **session**: the per-connection turn state machine
//! - **socket**: the actix WebSocket actor that drives a session

pub mod protocol;
pub mod session;
pub mod socket;

pub use protocol::{ClientMessage, ServerMessage, TurnStatus};
pub use session::{ClientSink, RelaySession, SessionState, SessionStats};
pub use socket::{relay_websocket, RelaySocket};
