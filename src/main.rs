//! # IELTS Voice Relay Server
//!
//! Entry point for the relay. Sets up an Actix-web server with:
//! - the relay WebSocket endpoint (`/ws` by default)
//! - health, metrics, configuration and audio-format endpoints
//! - CORS open to any origin, since the browser client is served elsewhere
//! - graceful shutdown on SIGINT/SIGTERM

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Result;
use ielts_voice_relay::{
    config::AppConfig,
    handlers, health, middleware, relay,
    state::AppState,
    upstream::{GeminiConnector, UpstreamConnector},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set by the signal handler task once shutdown is requested.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    // Another component may already have installed one
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting ielts-voice-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        bind = %config.bind_addr(),
        ws_path = %config.server.ws_path,
        model = %config.upstream.model,
        policy = ?config.relay.disconnect_policy,
        "configuration loaded"
    );
    if config.upstream.api_key.is_empty() {
        warn!("GOOGLE_AI_API_KEY is not set; every turn will fail to connect upstream");
    }

    let connector: Arc<dyn UpstreamConnector> = Arc::new(GeminiConnector::new(config.upstream.clone()));
    let app_state = AppState::new(config.clone(), connector);
    let bind_addr = config.bind_addr();
    let ws_path = config.server.ws_path.clone();

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(Logger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route(&ws_path, web::get().to(relay::relay_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/audio/format", web::get().to(handlers::audio_format)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ielts_voice_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
