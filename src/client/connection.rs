//! WebSocket connection from a client to the relay.
//!
//! The socket is split so capture can keep sending while relay messages
//! are read on another task.

use crate::error::VoiceError;
use crate::relay::protocol::{ClientMessage, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct RelaySender {
    sink: SplitSink<RelaySocket, Message>,
    closed: bool,
}

pub struct RelayReceiver {
    stream: SplitStream<RelaySocket>,
}

/// Open a connection to the relay at `url` (e.g. `ws://127.0.0.1:3000/ws`).
pub async fn connect(url: &str) -> Result<(RelaySender, RelayReceiver), VoiceError> {
    let (ws, _response) = connect_async(url)
        .await
        .map_err(|e| VoiceError::UpstreamConnectFailure(format!("relay unreachable at {}: {}", url, e)))?;
    debug!(url, "relay connection open");

    let (sink, stream) = ws.split();
    Ok((RelaySender { sink, closed: false }, RelayReceiver { stream }))
}

impl RelaySender {
    pub async fn send(&mut self, msg: &ClientMessage) -> Result<(), VoiceError> {
        if self.closed {
            return Err(VoiceError::TransportClosed);
        }
        let json = serde_json::to_string(msg).map_err(|_| VoiceError::TransportClosed)?;
        self.sink
            .send(Message::Text(json))
            .await
            .map_err(|_| VoiceError::TransportClosed)
    }

    /// Close the connection. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "relay close handshake failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RelayReceiver {
    /// Next protocol message. `None` once the relay has closed the
    /// connection; frames that do not parse are skipped.
    pub async fn next_message(&mut self) -> Option<Result<ServerMessage, VoiceError>> {
        while let Some(frame) = self.stream.next().await {
            let text = match frame {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(VoiceError::UpstreamStreamError(e.to_string()))),
            };
            match serde_json::from_str::<ServerMessage>(&text) {
                Ok(msg) => return Some(Ok(msg)),
                Err(e) => warn!(error = %e, "skipping unrecognized relay message"),
            }
        }
        None
    }
}
