//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`VoiceError`]: failures inside the audio path (capture devices, the
//!   upstream AI connection, the client channel). These never reach HTTP;
//!   the relay turns them into state transitions and `error` messages.
//! - [`AppError`]: failures of the HTTP endpoints, rendered as JSON bodies
//!   through actix's `ResponseError`.
//!
//! ## JSON Response Format
//! ```json
//! {
//!   "error": {
//!     "type": "validation_error",
//!     "message": "Silence duration must be greater than 0",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Audio path failures.
///
/// Capture errors are raised on the client side, upstream errors by the
/// relay's AI connection, and `TransportClosed` by any send whose channel
/// has already gone away.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoiceError {
    /// Access to the capture device was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device could be opened
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The capture source exists but cannot be used here
    #[error("unsupported capture environment: {0}")]
    UnsupportedEnvironment(String),

    /// The AI service could not be reached or refused the session setup
    #[error("failed to connect to AI service: {0}")]
    UpstreamConnectFailure(String),

    /// The AI service failed mid-turn
    #[error("AI service stream error: {0}")]
    UpstreamStreamError(String),

    #[error("channel closed")]
    TransportClosed,
}

impl VoiceError {
    /// Stable machine-readable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied(_) => "permission_denied",
            VoiceError::DeviceUnavailable(_) => "device_unavailable",
            VoiceError::UnsupportedEnvironment(_) => "unsupported_environment",
            VoiceError::UpstreamConnectFailure(_) => "upstream_connect_failure",
            VoiceError::UpstreamStreamError(_) => "upstream_stream_error",
            VoiceError::TransportClosed => "transport_closed",
        }
    }

    pub fn is_capture_error(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied(_)
                | VoiceError::DeviceUnavailable(_)
                | VoiceError::UnsupportedEnvironment(_)
        )
    }
}

/// HTTP endpoint errors.
///
/// ## Status Code Mapping:
/// - Internal/ConfigError → 500
/// - BadRequest/ValidationError → 400
/// - NotFound → 404
/// - ServiceUnavailable → 503 (session limit reached)
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::ConfigError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", msg)
            }
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are the client's fault, so they map to 400.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_voice_error_codes() {
        assert_eq!(VoiceError::TransportClosed.code(), "transport_closed");
        assert_eq!(
            VoiceError::UpstreamConnectFailure("timeout".into()).code(),
            "upstream_connect_failure"
        );
        assert!(VoiceError::PermissionDenied("x".into()).is_capture_error());
        assert!(!VoiceError::UpstreamStreamError("x".into()).is_capture_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AppError::ServiceUnavailable("full".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::ValidationError("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::ConfigError("x".into()).status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let resp = AppError::NotFound("no such thing".into()).error_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "not_found");
        assert_eq!(value["error"]["message"], "no such thing");
        assert!(value["error"]["timestamp"].is_string());
    }

    #[test]
    fn test_json_error_is_bad_request() {
        let err: AppError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
