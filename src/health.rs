//! # Health and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/v1/health`: liveness plus a load summary
//! - `GET /api/v1/metrics`: request counters per endpoint and relay counters
//!
//! Both are cheap snapshots of [`AppState`]; neither touches the upstream
//! service.

use crate::config::AppConfig;
use crate::state::{AppMetrics, AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
            "ws_path": config.server.ws_path
        },
        "upstream": {
            "model": state.connector.model(),
            "api_key_configured": !config.upstream.api_key.is_empty()
        },
        "sessions": {
            "active": metrics.active_sessions,
            "total": metrics.sessions_total
        },
        "system": load_status(&config, &metrics)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "relay": {
            "active_sessions": metrics.active_sessions,
            "sessions_total": metrics.sessions_total,
            "sessions_rejected": metrics.sessions_rejected,
            "turns_completed": metrics.turns_completed,
            "upstream_failures": metrics.upstream_failures,
            "audio_chunks_forwarded": metrics.audio_chunks_forwarded,
            "audio_chunks_dropped": metrics.audio_chunks_dropped,
            "audio_chunks_relayed": metrics.audio_chunks_relayed
        },
        "endpoints": endpoint_stats,
        "performance": {
            "max_concurrent_sessions": state.get_config().performance.max_concurrent_sessions
        }
    }))
}

fn load_status(config: &AppConfig, metrics: &AppMetrics) -> serde_json::Value {
    let max = config.performance.max_concurrent_sessions;
    let session_usage = if max > 0 {
        metrics.active_sessions as f64 / max as f64
    } else {
        0.0
    };

    let status = if session_usage >= 1.0 {
        "full"
    } else if session_usage > 0.7 {
        "high_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (session_usage * 100.0).round(),
        "max_sessions": max,
        "current_sessions": metrics.active_sessions
    })
}
