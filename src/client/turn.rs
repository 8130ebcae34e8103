//! # Client Turn State
//!
//! Client-side counterpart of the relay session. Tracks what the user sees
//! (listening, processing, speaking, ...) and decides which protocol
//! messages may be sent. It performs no I/O: every operation returns the
//! message to send, if any, and the caller owns the socket.
//!
//! ## Send Rules
//! - Nothing is sent unless the connection is open.
//! - `audio` and `stop` are sent only while listening, so a late capture
//!   block after `stop` never reaches the relay.

use crate::audio::pcm::AudioFrame;
use crate::relay::protocol::{ClientMessage, ServerMessage, TurnStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    #[default]
    Idle,
    Connecting,
    Listening,
    SilenceDetected,
    Processing,
    Speaking,
    Error,
}

#[derive(Debug, Default)]
pub struct ClientTurn {
    status: ClientStatus,
    open: bool,
    listening: bool,
    last_error: Option<String>,
}

impl ClientTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn set_status(&mut self, status: ClientStatus) {
        if self.status != status {
            debug!(from = ?self.status, to = ?status, "client status");
            self.status = status;
        }
    }

    /// About to open the connection. Returns false if it is already open.
    pub fn connect(&mut self) -> bool {
        if self.open {
            return false;
        }
        self.set_status(ClientStatus::Connecting);
        true
    }

    pub fn on_open(&mut self) {
        info!("connected to relay");
        self.open = true;
        self.last_error = None;
        self.set_status(ClientStatus::Idle);
    }

    pub fn on_transport_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        warn!(error = %error, "relay connection error");
        self.last_error = Some(error);
        self.set_status(ClientStatus::Error);
    }

    /// The relay closed the connection.
    pub fn on_close(&mut self) {
        info!("relay connection closed");
        self.open = false;
        self.listening = false;
        self.set_status(ClientStatus::Idle);
    }

    /// User-initiated teardown. Returns whether a close must be issued;
    /// calling it again is harmless.
    pub fn disconnect(&mut self) -> bool {
        let was_open = self.open;
        self.open = false;
        self.listening = false;
        self.set_status(ClientStatus::Idle);
        was_open
    }

    pub fn start_listening(&mut self) -> Option<ClientMessage> {
        if !self.open {
            return None;
        }
        self.listening = true;
        self.set_status(ClientStatus::Listening);
        Some(ClientMessage::Start)
    }

    /// Silence detected or user pressed stop.
    pub fn stop_listening(&mut self) -> Option<ClientMessage> {
        if !self.open || !self.listening {
            return None;
        }
        self.listening = false;
        self.set_status(ClientStatus::SilenceDetected);
        Some(ClientMessage::Stop)
    }

    pub fn audio_chunk(&mut self, frame: &AudioFrame) -> Option<ClientMessage> {
        if !self.open || !self.listening {
            return None;
        }
        Some(ClientMessage::Audio {
            audio: frame.to_base64(),
        })
    }

    /// Apply a relay message. Returns an audio payload to hand to playback.
    pub fn on_server_message(&mut self, msg: ServerMessage) -> Option<String> {
        match msg {
            ServerMessage::Status { status } => {
                match status {
                    TurnStatus::Recording => self.set_status(ClientStatus::Listening),
                    TurnStatus::Processing => self.set_status(ClientStatus::Processing),
                    TurnStatus::Done => self.set_status(ClientStatus::Idle),
                }
                None
            }
            ServerMessage::AudioChunk { audio } => {
                self.set_status(ClientStatus::Speaking);
                Some(audio)
            }
            ServerMessage::Error { message } => {
                warn!(error = %message, "relay reported an error");
                // The relay has abandoned the turn; further audio would be dropped
                self.listening = false;
                self.last_error = Some(message);
                self.set_status(ClientStatus::Error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_turn() -> ClientTurn {
        let mut turn = ClientTurn::new();
        assert!(turn.connect());
        assert_eq!(turn.status(), ClientStatus::Connecting);
        turn.on_open();
        turn
    }

    #[test]
    fn test_nothing_is_sent_before_open() {
        let mut turn = ClientTurn::new();
        assert_eq!(turn.status(), ClientStatus::Idle);
        assert_eq!(ClientStatus::default(), ClientStatus::Idle);
        assert_eq!(turn.start_listening(), None);
        assert_eq!(turn.stop_listening(), None);
        assert_eq!(turn.audio_chunk(&AudioFrame::new(vec![0; 4])), None);
    }

    #[test]
    fn test_full_turn_statuses() {
        let mut turn = open_turn();
        assert!(!turn.connect());
        assert_eq!(turn.status(), ClientStatus::Idle);

        assert_eq!(turn.start_listening(), Some(ClientMessage::Start));
        assert_eq!(turn.status(), ClientStatus::Listening);
        assert!(turn.audio_chunk(&AudioFrame::new(vec![1; 4])).is_some());

        turn.on_server_message(ServerMessage::status(TurnStatus::Recording));
        assert_eq!(turn.status(), ClientStatus::Listening);

        assert_eq!(turn.stop_listening(), Some(ClientMessage::Stop));
        assert_eq!(turn.status(), ClientStatus::SilenceDetected);

        turn.on_server_message(ServerMessage::status(TurnStatus::Processing));
        assert_eq!(turn.status(), ClientStatus::Processing);

        let payload = turn.on_server_message(ServerMessage::AudioChunk { audio: "AAAA".into() });
        assert_eq!(payload.as_deref(), Some("AAAA"));
        assert_eq!(turn.status(), ClientStatus::Speaking);

        turn.on_server_message(ServerMessage::status(TurnStatus::Done));
        assert_eq!(turn.status(), ClientStatus::Idle);
    }

    #[test]
    fn test_audio_and_stop_only_while_listening() {
        let mut turn = open_turn();
        assert_eq!(turn.audio_chunk(&AudioFrame::new(vec![0; 4])), None);
        assert_eq!(turn.stop_listening(), None);

        turn.start_listening();
        assert_eq!(turn.stop_listening(), Some(ClientMessage::Stop));
        // Second stop and late audio are suppressed
        assert_eq!(turn.stop_listening(), None);
        assert_eq!(turn.audio_chunk(&AudioFrame::new(vec![0; 4])), None);
    }

    #[test]
    fn test_server_error() {
        let mut turn = open_turn();
        turn.start_listening();
        turn.on_server_message(ServerMessage::error("AI service stream error: boom"));
        assert_eq!(turn.status(), ClientStatus::Error);
        assert!(!turn.is_listening());
        assert_eq!(turn.last_error(), Some("AI service stream error: boom"));

        // The user can start again
        assert_eq!(turn.start_listening(), Some(ClientMessage::Start));
    }

    #[test]
    fn test_close_and_disconnect() {
        let mut turn = open_turn();
        turn.start_listening();
        turn.on_close();
        assert_eq!(turn.status(), ClientStatus::Idle);
        assert!(!turn.is_listening());
        assert!(!turn.is_open());

        let mut turn = open_turn();
        assert!(turn.disconnect());
        assert!(!turn.disconnect());
        assert_eq!(turn.status(), ClientStatus::Idle);
    }
}
