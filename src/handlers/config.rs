//! # Configuration Endpoints
//!
//! - `GET /api/v1/config`: the running configuration, API key masked
//! - `PUT /api/v1/config`: partial update of the `silence` and `relay`
//!   sections, e.g. `{"relay": {"disconnect_policy": "abort"}}`
//!
//! Updates apply to sessions opened afterwards; live sessions keep the
//! settings they started with.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config().redacted();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(AppError::ValidationError)?;

    info!(
        threshold_db = current_config.silence.threshold_db,
        duration_ms = current_config.silence.duration_ms,
        policy = ?current_config.relay.disconnect_policy,
        "configuration updated"
    );

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": {
            "silence": current_config.silence,
            "relay": current_config.relay
        }
    })))
}
