//! # Upstream AI Connection
//!
//! The relay talks to the speech AI service through two traits:
//!
//! - [`UpstreamConnector`] opens a new duplex link for one turn.
//! - [`UpstreamLink`] is the relay's handle on that link: a capability check
//!   (`is_open`) plus fire-and-forget sends.
//!
//! Everything the service sends back arrives as an [`UpstreamEnvelope`] on a
//! channel owned by the session, tagged with the id of the link that produced
//! it so events from a retired link can be told apart.

pub mod gemini;

use crate::error::VoiceError;
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

pub use gemini::GeminiConnector;

/// Event produced by an upstream link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// One inline audio part, still base64-encoded as received
    Audio { data: String, mime_type: Option<String> },
    /// The service finished its reply for this turn
    TurnComplete,
    /// The connection failed mid-stream
    Error(String),
    /// The connection went away; carries the close reason if any
    Closed(Option<String>),
}

impl UpstreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamEvent::Audio { .. } => "audio",
            UpstreamEvent::TurnComplete => "turn_complete",
            UpstreamEvent::Error(_) => "error",
            UpstreamEvent::Closed(_) => "closed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEnvelope {
    pub link_id: u64,
    pub event: UpstreamEvent,
}

impl UpstreamEnvelope {
    pub fn new(link_id: u64, event: UpstreamEvent) -> Self {
        Self { link_id, event }
    }
}

/// Handle on one live upstream connection.
///
/// Dropping a link closes it. [`UpstreamLink::release`] is the only way to
/// let a connection outlive its handle.
pub trait UpstreamLink: Send {
    fn link_id(&self) -> u64;

    /// Whether the connection is confirmed open and accepting input.
    fn is_open(&self) -> bool;

    /// Forward one block of raw PCM16 bytes.
    fn send_audio(&mut self, pcm: &[u8]) -> Result<(), VoiceError>;

    /// Signal the end of the speaker's input. Not an audio frame.
    fn end_of_stream(&mut self) -> Result<(), VoiceError>;

    /// Close now. Safe to call more than once.
    fn close(&mut self);

    /// Detach from the connection without closing it. The connection lets
    /// the current turn run to completion, discards the reply, then closes.
    fn release(self: Box<Self>);
}

/// Factory for upstream links.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a link and wait until the service confirms it is ready.
    ///
    /// Events for the link are sent to `events` tagged with `link_id`.
    async fn connect(
        &self,
        link_id: u64,
        events: UnboundedSender<UpstreamEnvelope>,
    ) -> Result<Box<dyn UpstreamLink>, VoiceError>;

    /// Model name reported by health checks.
    fn model(&self) -> &str;
}
