//! # Relay WebSocket Actor
//!
//! Binds one [`RelaySession`] to one browser connection.
//!
//! ## Actor Model
//! Each connection is an actix actor with two inbound streams:
//! - client frames (`StreamHandler<Result<ws::Message, ws::ProtocolError>>`)
//! - upstream events for this session (`StreamHandler<UpstreamEnvelope>`)
//!
//! Both are handled on the actor's own context, one message at a time, so
//! the session state machine never sees concurrent input. Upstream connects
//! run as futures spawned on the same context and report back into it.
//!
//! ## Heartbeat
//! The actor pings every `heartbeat_interval_secs` and stops the connection
//! when nothing has been heard for `client_timeout_secs`.

use crate::error::{AppError, VoiceError};
use crate::relay::protocol::{ClientMessage, ServerMessage};
use crate::relay::session::{ClientSink, RelaySession, StartOutcome};
use crate::state::AppState;
use crate::upstream::{UpstreamConnector, UpstreamEnvelope};

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

/// Client channel as seen by the session: the actor's WebSocket context.
struct ContextSink<'a> {
    ctx: &'a mut ws::WebsocketContext<RelaySocket>,
}

impl ClientSink for ContextSink<'_> {
    fn is_open(&self) -> bool {
        self.ctx.state().alive()
    }

    fn deliver(&mut self, msg: ServerMessage) -> Result<(), VoiceError> {
        if !self.ctx.state().alive() {
            return Err(VoiceError::TransportClosed);
        }
        match serde_json::to_string(&msg) {
            Ok(json) => self.ctx.text(json),
            Err(e) => warn!(kind = msg.kind(), error = %e, "failed to encode message for client"),
        }
        Ok(())
    }
}

pub struct RelaySocket {
    session: RelaySession,
    app_state: AppState,
    connector: Arc<dyn UpstreamConnector>,
    events_tx: UnboundedSender<UpstreamEnvelope>,
    events_rx: Option<UnboundedReceiver<UpstreamEnvelope>>,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl RelaySocket {
    pub fn new(app_state: AppState) -> Self {
        let config = app_state.get_config();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session_id = uuid::Uuid::new_v4().to_string();

        Self {
            session: RelaySession::new(session_id, config.relay.disconnect_policy),
            connector: app_state.connector.clone(),
            app_state,
            events_tx,
            events_rx: Some(events_rx),
            last_heartbeat: Instant::now(),
            heartbeat_interval: Duration::from_secs(config.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.server.client_timeout_secs),
        }
    }

    fn handle_client_message(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let msg = match serde_json::from_str::<ClientMessage>(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "ignoring malformed client message");
                return;
            }
        };

        match msg {
            ClientMessage::Start => self.handle_start(ctx),
            ClientMessage::Audio { audio } => {
                self.session.on_audio(&audio);
            }
            ClientMessage::Stop => {
                let mut sink = ContextSink { ctx };
                self.session.on_stop(&mut sink);
            }
        }
    }

    fn handle_start(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        let link_id = match self.session.on_start() {
            StartOutcome::Connect(link_id) => link_id,
            StartOutcome::Rejected(_) => return,
        };

        debug!(session_id = %self.session.id(), link_id, "opening upstream link");
        let connector = self.connector.clone();
        let events = self.events_tx.clone();
        let connect = async move { connector.connect(link_id, events).await };

        ctx.spawn(connect.into_actor(self).map(move |result, act, ctx| {
            let mut sink = ContextSink { ctx };
            act.session.on_upstream_connected(link_id, result, &mut sink);
        }));
    }
}

impl Actor for RelaySocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session.id(), "relay connection started");

        if let Some(rx) = self.events_rx.take() {
            ctx.add_stream(UnboundedReceiverStream::new(rx));
        }

        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > timeout {
                warn!(session_id = %act.session.id(), "client heartbeat timeout, closing connection");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.on_client_disconnect();
        self.app_state.record_session_stats(&self.session.stats());
        self.app_state.release_session();
        info!(session_id = %self.session.id(), "relay connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.handle_client_message(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                warn!(session_id = %self.session.id(), bytes = data.len(), "binary frames are not part of the protocol");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session.id(), reason = ?reason, "client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.session.id(), "unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(session_id = %self.session.id(), error = %err, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<UpstreamEnvelope> for RelaySocket {
    fn handle(&mut self, envelope: UpstreamEnvelope, ctx: &mut Self::Context) {
        let mut sink = ContextSink { ctx };
        self.session.on_upstream_event(envelope, &mut sink);
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The actor owns a sender, so this stream only ends with the actor
    }
}

/// `GET {ws_path}`: upgrade into a relay session.
pub async fn relay_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    if !app_state.try_acquire_session() {
        warn!(
            peer = ?req.connection_info().peer_addr(),
            active = app_state.active_sessions(),
            "session limit reached, refusing connection"
        );
        return Err(AppError::ServiceUnavailable("too many active sessions".to_string()).into());
    }

    info!(peer = ?req.connection_info().peer_addr(), "new relay connection");
    let socket = RelaySocket::new(app_state.get_ref().clone());
    ws::start(socket, &req, stream).map_err(|e| {
        app_state.release_session();
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::{encode_base64, AudioFrame};
    use crate::client;
    use crate::config::AppConfig;
    use crate::relay::protocol::TurnStatus;
    use crate::state::tests::test_state;
    use crate::upstream::{UpstreamEvent, UpstreamLink};
    use actix_web::{http::StatusCode, test, App, HttpServer};
    use async_trait::async_trait;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    /// Records what the relay forwards and answers end of input with two
    /// audio parts and a turn completion.
    struct ScriptedLink {
        link_id: u64,
        events: UnboundedSender<UpstreamEnvelope>,
        log: Log,
        open: bool,
    }

    impl ScriptedLink {
        fn emit(&self, event: UpstreamEvent) {
            let _ = self.events.send(UpstreamEnvelope::new(self.link_id, event));
        }
    }

    impl UpstreamLink for ScriptedLink {
        fn link_id(&self) -> u64 {
            self.link_id
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn send_audio(&mut self, pcm: &[u8]) -> Result<(), VoiceError> {
            self.log.lock().unwrap().push(format!("audio:{}", pcm.len()));
            Ok(())
        }

        fn end_of_stream(&mut self) -> Result<(), VoiceError> {
            self.log.lock().unwrap().push("end_of_stream".to_string());
            for part in [&[1u8, 0][..], &[2, 0]] {
                self.emit(UpstreamEvent::Audio {
                    data: encode_base64(part),
                    mime_type: Some("audio/pcm;rate=24000".to_string()),
                });
            }
            self.emit(UpstreamEvent::TurnComplete);
            Ok(())
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.log.lock().unwrap().push("close".to_string());
            }
        }

        fn release(self: Box<Self>) {
            self.log.lock().unwrap().push("release".to_string());
        }
    }

    struct ScriptedConnector {
        log: Log,
    }

    #[async_trait]
    impl UpstreamConnector for ScriptedConnector {
        async fn connect(
            &self,
            link_id: u64,
            events: UnboundedSender<UpstreamEnvelope>,
        ) -> Result<Box<dyn UpstreamLink>, VoiceError> {
            Ok(Box::new(ScriptedLink {
                link_id,
                events,
                log: self.log.clone(),
                open: true,
            }))
        }

        fn model(&self) -> &str {
            "scripted-model"
        }
    }

    #[actix_web::test]
    async fn test_refuses_when_sessions_are_full() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = web::Data::new(test_state(config));
        assert!(state.try_acquire_session());

        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(relay_websocket)),
        )
        .await;

        let req = test::TestRequest::get().uri("/ws").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.get_metrics_snapshot().sessions_rejected, 1);
    }

    #[actix_web::test]
    async fn test_failed_handshake_releases_slot() {
        let state = web::Data::new(test_state(AppConfig::default()));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(relay_websocket)),
        )
        .await;

        // No upgrade headers
        let req = test::TestRequest::get().uri("/ws").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.active_sessions(), 0);
    }

    #[actix_web::test]
    async fn test_full_turn_over_the_wire() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let state = AppState::new(AppConfig::default(), Arc::new(ScriptedConnector { log: log.clone() }));
        let data = web::Data::new(state.clone());

        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/ws", web::get().to(relay_websocket))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let (mut tx, mut rx) = client::connect(&format!("ws://{}/ws", addr)).await.unwrap();
        tx.send(&ClientMessage::Start).await.unwrap();
        assert_eq!(
            rx.next_message().await.unwrap().unwrap(),
            ServerMessage::status(TurnStatus::Recording)
        );

        for marker in 1..=3 {
            let audio = AudioFrame::new(vec![marker; 4096]).to_base64();
            tx.send(&ClientMessage::Audio { audio }).await.unwrap();
        }
        tx.send(&ClientMessage::Stop).await.unwrap();

        let done = ServerMessage::status(TurnStatus::Done);
        let mut received = Vec::new();
        while let Some(msg) = rx.next_message().await {
            let msg = msg.unwrap();
            let finished = msg == done;
            received.push(msg);
            if finished {
                break;
            }
        }

        assert_eq!(
            received,
            vec![
                ServerMessage::status(TurnStatus::Processing),
                ServerMessage::AudioChunk { audio: encode_base64(&[1, 0]) },
                ServerMessage::AudioChunk { audio: encode_base64(&[2, 0]) },
                done,
            ]
        );
        assert_eq!(
            *log.lock().unwrap(),
            vec!["audio:8192", "audio:8192", "audio:8192", "end_of_stream", "close"]
        );

        // Closing the client stops the actor and folds its counters
        tx.close().await;
        for _ in 0..100 {
            if state.active_sessions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.active_sessions(), 0);
        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.turns_completed, 1);
        assert_eq!(metrics.audio_chunks_forwarded, 3);
        assert_eq!(metrics.audio_chunks_relayed, 2);

        handle.stop(true).await;
    }
}
