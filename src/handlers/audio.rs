//! Audio format contract for browser clients.
//!
//! `GET /api/v1/audio/format` tells a client how to capture, frame and play
//! audio so it matches what the relay and the AI service expect.

use crate::audio::pcm::INPUT_MIME_TYPE;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn audio_format(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();
    let frame_ms = config.audio.frame_samples as f64 * 1000.0 / config.audio.input_sample_rate as f64;

    Ok(HttpResponse::Ok().json(json!({
        "input": {
            "sample_rate": config.audio.input_sample_rate,
            "channels": config.audio.channels,
            "bit_depth": config.audio.bit_depth,
            "encoding": "pcm_s16le",
            "transport": "base64",
            "mime_type": INPUT_MIME_TYPE,
            "frame_samples": config.audio.frame_samples,
            "frame_duration_ms": frame_ms
        },
        "output": {
            "sample_rate": config.audio.output_sample_rate,
            "channels": config.audio.channels,
            "bit_depth": config.audio.bit_depth,
            "encoding": "pcm_s16le",
            "transport": "base64"
        },
        "silence": config.silence,
        "ws_path": config.server.ws_path
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::tests::test_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_format_contract() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(AppConfig::default())))
                .route("/api/v1/audio/format", web::get().to(audio_format)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/audio/format").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["input"]["sample_rate"], 16000);
        assert_eq!(body["input"]["frame_samples"], 4096);
        assert_eq!(body["input"]["frame_duration_ms"], 256.0);
        assert_eq!(body["input"]["mime_type"], "audio/pcm;rate=16000");
        assert_eq!(body["output"]["sample_rate"], 24000);
        assert_eq!(body["silence"]["threshold_db"], -50.0);
        assert_eq!(body["silence"]["duration_ms"], 3000);
    }
}
