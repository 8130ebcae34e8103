//! # Gemini Live Link
//!
//! [`UpstreamConnector`] for the Gemini Live bidirectional streaming API.
//!
//! ## Connection Lifecycle
//! 1. WebSocket handshake with the `BidiGenerateContent` endpoint
//! 2. `setup` frame naming the model, audio-only responses and the voice
//! 3. Wait for `setupComplete`; only then is the link reported open
//! 4. A background task owns the socket for the rest of the link's life,
//!    taking commands from the [`GeminiLink`] handle and publishing events
//!
//! Steps 1 to 3 share a single `connect_timeout_ms` budget.
//!
//! ## Draining
//! When the handle is released instead of closed, the task stops accepting
//! input and keeps reading until the turn completes, the service fails, or
//! `drain_timeout_ms` passes. Everything it reads in that mode is discarded.

use crate::audio::pcm::{encode_base64, INPUT_MIME_TYPE};
use crate::config::UpstreamConfig;
use crate::error::VoiceError;
use crate::upstream::{UpstreamConnector, UpstreamEnvelope, UpstreamEvent, UpstreamLink};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type GeminiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize, Default)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    mime_type: Option<String>,
}

/// What a single inbound frame means to the relay.
#[derive(Debug, Default, PartialEq)]
struct Inbound {
    setup_complete: bool,
    events: Vec<UpstreamEvent>,
}

fn parse_frame(raw: &[u8]) -> Result<Inbound, serde_json::Error> {
    let frame: ServerFrame = serde_json::from_slice(raw)?;
    let mut inbound = Inbound {
        setup_complete: frame.setup_complete.is_some(),
        events: Vec::new(),
    };

    if let Some(content) = frame.server_content {
        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(inline) = part.inline_data {
                    inbound.events.push(UpstreamEvent::Audio {
                        data: inline.data,
                        mime_type: inline.mime_type,
                    });
                }
            }
        }
        if content.turn_complete {
            inbound.events.push(UpstreamEvent::TurnComplete);
        }
    }

    Ok(inbound)
}

fn frame_bytes(msg: &Message) -> Option<&[u8]> {
    match msg {
        Message::Text(text) => Some(text.as_bytes()),
        Message::Binary(bytes) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn audio_frame(pcm: &[u8]) -> String {
    json!({
        "realtimeInput": {
            "audio": {
                "data": encode_base64(pcm),
                "mimeType": INPUT_MIME_TYPE
            }
        }
    })
    .to_string()
}

fn end_of_stream_frame() -> String {
    json!({ "realtimeInput": { "audioStreamEnd": true } }).to_string()
}

#[derive(Debug)]
enum LinkCommand {
    Audio(Vec<u8>),
    EndOfStream,
    Close,
}

#[derive(Debug, Clone)]
pub struct GeminiConnector {
    config: UpstreamConfig,
}

impl GeminiConnector {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }

    /// Full endpoint URL including the API key.
    pub fn url(&self) -> String {
        format!(
            "{}/ws/google.ai.generativelanguage.{}.GenerativeService.BidiGenerateContent?key={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.api_version,
            self.config.api_key
        )
    }

    pub fn setup_frame(&self) -> String {
        json!({
            "setup": {
                "model": format!("models/{}", self.config.model),
                "generationConfig": {
                    "responseModalities": ["AUDIO"],
                    "speechConfig": {
                        "voiceConfig": {
                            "prebuiltVoiceConfig": { "voiceName": self.config.voice_name }
                        }
                    }
                }
            }
        })
        .to_string()
    }

    async fn handshake(&self) -> Result<GeminiSocket, VoiceError> {
        let (mut ws, _response) = connect_async(self.url())
            .await
            .map_err(|e| VoiceError::UpstreamConnectFailure(e.to_string()))?;

        ws.send(Message::Text(self.setup_frame()))
            .await
            .map_err(|e| VoiceError::UpstreamConnectFailure(format!("setup not sent: {}", e)))?;

        loop {
            match ws.next().await {
                Some(Ok(msg)) => {
                    if let Message::Close(frame) = &msg {
                        let reason = frame.as_ref().map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(VoiceError::UpstreamConnectFailure(format!(
                            "closed during setup: {}",
                            reason
                        )));
                    }
                    let Some(raw) = frame_bytes(&msg) else {
                        continue;
                    };
                    match parse_frame(raw) {
                        Ok(inbound) if inbound.setup_complete => return Ok(ws),
                        Ok(_) => debug!("ignoring frame before setupComplete"),
                        Err(e) => warn!(error = %e, "unparseable frame during setup"),
                    }
                }
                Some(Err(e)) => return Err(VoiceError::UpstreamConnectFailure(e.to_string())),
                None => {
                    return Err(VoiceError::UpstreamConnectFailure(
                        "connection ended during setup".to_string(),
                    ))
                }
            }
        }
    }
}

#[async_trait]
impl UpstreamConnector for GeminiConnector {
    async fn connect(
        &self,
        link_id: u64,
        events: UnboundedSender<UpstreamEnvelope>,
    ) -> Result<Box<dyn UpstreamLink>, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::UpstreamConnectFailure("no API key configured".to_string()));
        }

        let budget = Duration::from_millis(self.config.connect_timeout_ms);
        let ws = tokio::time::timeout(budget, self.handshake())
            .await
            .map_err(|_| VoiceError::UpstreamConnectFailure(format!("timed out after {:?}", budget)))??;

        info!(link_id, model = %self.config.model, "gemini session ready");

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let task = LinkTask {
            link_id,
            commands: commands_rx,
            events,
            open: open.clone(),
            drain_timeout: Duration::from_millis(self.config.drain_timeout_ms),
        };
        tokio::spawn(task.run(ws));

        Ok(Box::new(GeminiLink {
            link_id,
            commands: Some(commands_tx),
            open,
        }))
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Relay-side handle on a running link task.
pub struct GeminiLink {
    link_id: u64,
    commands: Option<UnboundedSender<LinkCommand>>,
    open: Arc<AtomicBool>,
}

impl GeminiLink {
    fn command(&self, cmd: LinkCommand) -> Result<(), VoiceError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(VoiceError::TransportClosed);
        }
        let sender = self.commands.as_ref().ok_or(VoiceError::TransportClosed)?;
        sender.send(cmd).map_err(|_| VoiceError::TransportClosed)
    }
}

impl UpstreamLink for GeminiLink {
    fn link_id(&self) -> u64 {
        self.link_id
    }

    fn is_open(&self) -> bool {
        self.commands.is_some() && self.open.load(Ordering::SeqCst)
    }

    fn send_audio(&mut self, pcm: &[u8]) -> Result<(), VoiceError> {
        self.command(LinkCommand::Audio(pcm.to_vec()))
    }

    fn end_of_stream(&mut self) -> Result<(), VoiceError> {
        self.command(LinkCommand::EndOfStream)
    }

    fn close(&mut self) {
        if let Some(sender) = self.commands.take() {
            let _ = sender.send(LinkCommand::Close);
        }
        self.open.store(false, Ordering::SeqCst);
    }

    fn release(mut self: Box<Self>) {
        // Dropping the sender without a Close puts the task into drain mode
        self.commands.take();
    }
}

impl Drop for GeminiLink {
    fn drop(&mut self) {
        self.close();
    }
}

struct LinkTask {
    link_id: u64,
    commands: UnboundedReceiver<LinkCommand>,
    events: UnboundedSender<UpstreamEnvelope>,
    open: Arc<AtomicBool>,
    drain_timeout: Duration,
}

impl LinkTask {
    fn emit(&self, event: UpstreamEvent) {
        // The session may already be gone; its events are moot then
        let _ = self.events.send(UpstreamEnvelope::new(self.link_id, event));
    }

    async fn run(mut self, mut ws: GeminiSocket) {
        let link_id = self.link_id;
        let mut draining = false;
        let mut drain_deadline = tokio::time::Instant::now();

        loop {
            tokio::select! {
                cmd = self.commands.recv(), if !draining => {
                    match cmd {
                        Some(LinkCommand::Audio(pcm)) => {
                            if let Err(e) = ws.send(Message::Text(audio_frame(&pcm))).await {
                                error!(link_id, error = %e, "failed to send audio upstream");
                                self.emit(UpstreamEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        Some(LinkCommand::EndOfStream) => {
                            debug!(link_id, "sending audioStreamEnd");
                            if let Err(e) = ws.send(Message::Text(end_of_stream_frame())).await {
                                error!(link_id, error = %e, "failed to send end of input");
                                self.emit(UpstreamEvent::Error(e.to_string()));
                                break;
                            }
                        }
                        Some(LinkCommand::Close) => {
                            debug!(link_id, "closing upstream link");
                            let _ = ws.close(None).await;
                            break;
                        }
                        None => {
                            info!(link_id, timeout = ?self.drain_timeout, "link released, draining current turn");
                            draining = true;
                            drain_deadline = tokio::time::Instant::now() + self.drain_timeout;
                        }
                    }
                }
                _ = tokio::time::sleep_until(drain_deadline), if draining => {
                    warn!(link_id, "drain timed out, closing");
                    let _ = ws.close(None).await;
                    break;
                }
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Close(close))) => {
                            let reason = close.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                            info!(link_id, reason = ?reason, "upstream closed the connection");
                            if !draining {
                                self.emit(UpstreamEvent::Closed(reason));
                            }
                            break;
                        }
                        Some(Ok(msg)) => {
                            let Some(raw) = frame_bytes(&msg) else {
                                continue;
                            };
                            let inbound = match parse_frame(raw) {
                                Ok(inbound) => inbound,
                                Err(e) => {
                                    warn!(link_id, error = %e, "skipping unparseable upstream frame");
                                    continue;
                                }
                            };
                            let mut finished = false;
                            for event in inbound.events {
                                finished |= event == UpstreamEvent::TurnComplete;
                                if !draining {
                                    self.emit(event);
                                }
                            }
                            if finished && draining {
                                info!(link_id, "drained turn completed, closing");
                                let _ = ws.close(None).await;
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!(link_id, error = %e, "upstream stream error");
                            if !draining {
                                self.emit(UpstreamEvent::Error(e.to_string()));
                            }
                            break;
                        }
                        None => {
                            if !draining {
                                self.emit(UpstreamEvent::Closed(None));
                            }
                            break;
                        }
                    }
                }
            }
        }

        self.open.store(false, Ordering::SeqCst);
        debug!(link_id, "link task finished");
    }
}
