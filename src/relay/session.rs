//! # Session Relay
//!
//! Per-connection state machine bridging one client channel and at most one
//! upstream AI link. It is transport-agnostic: the WebSocket actor feeds it
//! client commands and upstream events, and hands it a [`ClientSink`] for
//! everything going back to the browser.
//!
//! ## States
//! ```text
//!   Idle/Error --start--> Connecting --connected--> Recording --stop--> Processing
//!       ^                     |                        |                    |
//!       |                connect failed           upstream error      turn complete
//!       |                     v                        v                    |
//!       +------------------ Error <------------------- + <-- upstream error-+
//!       +<---------------------------------------------------- done --------+
//!
//!   any state --client disconnect--> Disconnected (terminal)
//! ```
//!
//! ## Guarantees
//! - At most one upstream link exists per session; `start` outside
//!   `Idle`/`Error` is rejected, so a second link is never opened.
//! - Audio is forwarded only while `Recording` and the link reports open;
//!   everything else is dropped on the spot, never queued.
//! - Upstream events carry their link id; events from a retired link are
//!   discarded.
//! - Sends to the client are best effort. A closed client channel is logged
//!   and ignored.

use crate::audio::pcm::decode_base64;
use crate::config::DisconnectPolicy;
use crate::error::VoiceError;
use crate::relay::protocol::{ServerMessage, TurnStatus};
use crate::upstream::{UpstreamEnvelope, UpstreamEvent, UpstreamLink};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    /// Upstream handshake in flight
    Connecting,
    Recording,
    Processing,
    /// Last turn failed; a new `start` is accepted
    Error,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Recording => "recording",
            SessionState::Processing => "processing",
            SessionState::Error => "error",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Outbound half of the client channel.
pub trait ClientSink {
    fn is_open(&self) -> bool;

    fn deliver(&mut self, msg: ServerMessage) -> Result<(), VoiceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Caller must open upstream link `link_id` and report back through
    /// [`RelaySession::on_upstream_connected`]
    Connect(u64),
    /// Ignored; the session was in the given state
    Rejected(SessionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Recording,
    Failed,
    /// Result for a link the session no longer waits for
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotRecording,
    UpstreamNotOpen,
    InvalidPayload,
    SendFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    /// Number of PCM bytes sent upstream
    Forwarded(usize),
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub chunks_forwarded: u64,
    pub chunks_dropped: u64,
    pub chunks_relayed: u64,
    pub turns_completed: u64,
    pub upstream_failures: u64,
}

pub struct RelaySession {
    id: String,
    state: SessionState,
    upstream: Option<Box<dyn UpstreamLink>>,
    pending_link: Option<u64>,
    next_link_id: u64,
    policy: DisconnectPolicy,
    stats: SessionStats,
}

impl fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("link", &self.current_link_id())
            .field("pending_link", &self.pending_link)
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

impl RelaySession {
    pub fn new(id: impl Into<String>, policy: DisconnectPolicy) -> Self {
        Self {
            id: id.into(),
            state: SessionState::Idle,
            upstream: None,
            pending_link: None,
            next_link_id: 1,
            policy,
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn has_upstream(&self) -> bool {
        self.upstream.is_some()
    }

    fn current_link_id(&self) -> Option<u64> {
        self.upstream.as_ref().map(|link| link.link_id())
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!(session_id = %self.id, from = %self.state, to = %to, "session state change");
            self.state = to;
        }
    }

    /// Best-effort send to the client.
    fn notify(&self, sink: &mut dyn ClientSink, msg: ServerMessage) {
        if !sink.is_open() {
            debug!(session_id = %self.id, kind = msg.kind(), "client channel closed, message dropped");
            return;
        }
        match sink.deliver(msg) {
            Ok(()) => {}
            Err(VoiceError::TransportClosed) => {
                debug!(session_id = %self.id, "client channel closed during send");
            }
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "failed to deliver message to client");
            }
        }
    }

    /// Client asked to begin a turn.
    pub fn on_start(&mut self) -> StartOutcome {
        match self.state {
            SessionState::Idle | SessionState::Error => {
                // A resting state never holds a link, but make sure of it
                if let Some(mut stale) = self.upstream.take() {
                    stale.close();
                }
                let link_id = self.next_link_id;
                self.next_link_id += 1;
                self.pending_link = Some(link_id);
                self.transition(SessionState::Connecting);
                StartOutcome::Connect(link_id)
            }
            other => {
                warn!(session_id = %self.id, state = %other, "start ignored");
                StartOutcome::Rejected(other)
            }
        }
    }

    /// Result of the connect requested by [`RelaySession::on_start`].
    pub fn on_upstream_connected(
        &mut self,
        link_id: u64,
        result: Result<Box<dyn UpstreamLink>, VoiceError>,
        sink: &mut dyn ClientSink,
    ) -> ConnectOutcome {
        if self.state != SessionState::Connecting || self.pending_link != Some(link_id) {
            if let Ok(mut link) = result {
                debug!(session_id = %self.id, link_id, "closing link nobody waits for");
                link.close();
            }
            return ConnectOutcome::Stale;
        }
        self.pending_link = None;

        match result {
            Ok(link) => {
                info!(session_id = %self.id, link_id, "upstream connected");
                self.upstream = Some(link);
                self.transition(SessionState::Recording);
                self.notify(sink, ServerMessage::status(TurnStatus::Recording));
                ConnectOutcome::Recording
            }
            Err(e) => {
                error!(session_id = %self.id, link_id, error = %e, "upstream connect failed");
                self.fail(e, sink);
                ConnectOutcome::Failed
            }
        }
    }

    /// One base64 audio payload from the client.
    pub fn on_audio(&mut self, payload: &str) -> AudioOutcome {
        let outcome = self.forward_audio(payload);
        match outcome {
            AudioOutcome::Forwarded(bytes) => {
                self.stats.chunks_forwarded += 1;
                debug!(session_id = %self.id, bytes, "audio forwarded");
            }
            AudioOutcome::Dropped(reason) => {
                self.stats.chunks_dropped += 1;
                debug!(session_id = %self.id, state = %self.state, ?reason, "audio dropped");
            }
        }
        outcome
    }

    fn forward_audio(&mut self, payload: &str) -> AudioOutcome {
        if self.state != SessionState::Recording {
            return AudioOutcome::Dropped(DropReason::NotRecording);
        }
        let link = match self.upstream.as_mut() {
            Some(link) if link.is_open() => link,
            _ => return AudioOutcome::Dropped(DropReason::UpstreamNotOpen),
        };
        let pcm = match decode_base64(payload) {
            Ok(pcm) if !pcm.is_empty() => pcm,
            _ => return AudioOutcome::Dropped(DropReason::InvalidPayload),
        };
        match link.send_audio(&pcm) {
            Ok(()) => AudioOutcome::Forwarded(pcm.len()),
            Err(_) => AudioOutcome::Dropped(DropReason::SendFailed),
        }
    }

    /// Client finished speaking. Returns whether anything happened.
    pub fn on_stop(&mut self, sink: &mut dyn ClientSink) -> bool {
        if self.state != SessionState::Recording {
            debug!(session_id = %self.id, state = %self.state, "stop ignored");
            return false;
        }

        let sent = match self.upstream.as_mut() {
            Some(link) => link.end_of_stream(),
            None => Err(VoiceError::UpstreamStreamError("no upstream link".into())),
        };

        self.transition(SessionState::Processing);
        self.notify(sink, ServerMessage::status(TurnStatus::Processing));

        if let Err(e) = sent {
            let e = match e {
                VoiceError::TransportClosed => {
                    VoiceError::UpstreamStreamError("connection closed before end of input".into())
                }
                other => other,
            };
            error!(session_id = %self.id, error = %e, "failed to signal end of input");
            self.fail(e, sink);
        }
        true
    }

    /// Something arrived from an upstream link.
    pub fn on_upstream_event(&mut self, envelope: UpstreamEnvelope, sink: &mut dyn ClientSink) {
        if self.current_link_id() != Some(envelope.link_id) {
            debug!(
                session_id = %self.id,
                link_id = envelope.link_id,
                event = envelope.event.kind(),
                "event from retired link discarded"
            );
            return;
        }

        match envelope.event {
            UpstreamEvent::Audio { data, .. } => {
                if self.state == SessionState::Processing {
                    self.stats.chunks_relayed += 1;
                    self.notify(sink, ServerMessage::AudioChunk { audio: data });
                } else {
                    debug!(session_id = %self.id, state = %self.state, "response audio outside processing dropped");
                }
            }
            UpstreamEvent::TurnComplete => {
                if self.state == SessionState::Processing {
                    self.stats.turns_completed += 1;
                    self.transition(SessionState::Idle);
                    self.notify(sink, ServerMessage::status(TurnStatus::Done));
                    if let Some(mut link) = self.upstream.take() {
                        link.close();
                    }
                } else {
                    debug!(session_id = %self.id, state = %self.state, "turn complete before stop ignored");
                }
            }
            UpstreamEvent::Error(message) => {
                error!(session_id = %self.id, error = %message, "upstream error");
                self.fail(VoiceError::UpstreamStreamError(message), sink);
            }
            UpstreamEvent::Closed(reason) => {
                let message = reason.unwrap_or_else(|| "connection closed".to_string());
                warn!(session_id = %self.id, reason = %message, "upstream closed mid-turn");
                self.fail(VoiceError::UpstreamStreamError(message), sink);
            }
        }
    }

    /// Move to `Error`, tell the client once and drop the link.
    fn fail(&mut self, err: VoiceError, sink: &mut dyn ClientSink) {
        if let Some(mut link) = self.upstream.take() {
            link.close();
        }
        self.pending_link = None;
        self.stats.upstream_failures += 1;
        warn!(session_id = %self.id, error_code = err.code(), "turn failed");
        self.transition(SessionState::Error);
        self.notify(sink, ServerMessage::error(err.to_string()));
    }

    /// Client channel is gone. Terminal.
    pub fn on_client_disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }

        let draining = self.state == SessionState::Processing && self.policy == DisconnectPolicy::Drain;
        if let Some(mut link) = self.upstream.take() {
            if draining {
                info!(session_id = %self.id, link_id = link.link_id(), "client left mid-turn, letting upstream finish");
                link.release();
            } else {
                link.close();
            }
        }
        self.pending_link = None;
        self.transition(SessionState::Disconnected);

        info!(
            session_id = %self.id,
            forwarded = self.stats.chunks_forwarded,
            relayed = self.stats.chunks_relayed,
            turns = self.stats.turns_completed,
            "session closed"
        );
    }
}

impl Drop for RelaySession {
    fn drop(&mut self) {
        if self.state != SessionState::Disconnected {
            self.on_client_disconnect();
        }
    }
}
