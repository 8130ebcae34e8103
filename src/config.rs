//! # Configuration Management
//!
//! Loads relay configuration from several sources, highest priority last:
//! 1. Default values (the `Default` impl below)
//! 2. `config.toml` in the working directory (optional)
//! 3. Environment variables with the `APP_` prefix, sections split by a
//!    double underscore (`APP_SERVER__PORT=4000`, `APP_UPSTREAM__DRAIN_TIMEOUT_MS=5000`)
//! 4. Platform variables `HOST`, `PORT` and the `GOOGLE_AI_API_KEY` secret
//!
//! The `silence` and `relay` sections can be changed at runtime through
//! `PUT /api/v1/config`; everything else is fixed for the process lifetime.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Environment variable holding the AI service key.
pub const API_KEY_ENV: &str = "GOOGLE_AI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub relay: RelayConfig,
    pub performance: PerformanceConfig,
}

/// HTTP/WebSocket listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Path the browser connects to for the relay channel
    pub ws_path: String,
    pub heartbeat_interval_secs: u64,
    /// Client is dropped after this long without any frame
    pub client_timeout_secs: u64,
}

/// Connection settings for the real-time speech AI service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub api_version: String,
    pub model: String,
    pub api_key: String,
    pub voice_name: String,
    /// Covers the socket handshake and the setup acknowledgement
    pub connect_timeout_ms: u64,
    /// Upper bound on letting an abandoned turn finish after the client left
    pub drain_timeout_ms: u64,
}

/// Wire format shared by the browser client and the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub frame_samples: usize,
}

/// Turn-boundary detection parameters handed to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SilenceConfig {
    pub threshold_db: f64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisconnectPolicy {
    /// Let an in-flight AI turn run to completion and discard its output
    Drain,
    /// Close the upstream connection as soon as the client goes away
    Abort,
}

impl std::str::FromStr for DisconnectPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(DisconnectPolicy::Drain),
            "abort" => Ok(DisconnectPolicy::Abort),
            _ => Err(format!("Unknown disconnect policy: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub disconnect_policy: DisconnectPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                ws_path: "/ws".to_string(),
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            upstream: UpstreamConfig {
                endpoint: "wss://generativelanguage.googleapis.com".to_string(),
                api_version: "v1alpha".to_string(),
                model: "gemini-2.0-flash-exp".to_string(),
                api_key: String::new(),
                voice_name: "Aoede".to_string(),
                connect_timeout_ms: 10_000,
                drain_timeout_ms: 30_000,
            },
            audio: AudioConfig {
                input_sample_rate: 16_000,
                output_sample_rate: 24_000,
                channels: 1,
                bit_depth: 16,
                frame_samples: 4096,
            },
            silence: SilenceConfig {
                threshold_db: -50.0,
                duration_ms: 3000,
            },
            relay: RelayConfig {
                disconnect_policy: DisconnectPolicy::Drain,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
            },
        }
    }
}

/// `APP_<SECTION>__<KEY>` variables.
fn app_environment() -> config::Environment {
    config::Environment::with_prefix("APP")
        .prefix_separator("_")
        .separator("__")
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=4000`: Override server port
    /// - `APP_UPSTREAM__MODEL=gemini-2.0-flash-live-001`: Override the AI model
    /// - `APP_SERVER__WS_PATH=/relay`: Keys containing underscores work as-is
    /// - `HOST` / `PORT`: Deployment platform conventions
    /// - `GOOGLE_AI_API_KEY`: AI service key
    pub fn load() -> Result<Self> {
        Self::load_with(app_environment())
    }

    fn load_with(environment: config::Environment) -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(environment);

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var(API_KEY_ENV) {
            settings = settings.set_override("upstream.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if !self.server.ws_path.starts_with('/') {
            return Err(anyhow::anyhow!("WebSocket path must start with '/'"));
        }

        if self.server.heartbeat_interval_secs == 0 || self.server.client_timeout_secs == 0 {
            return Err(anyhow::anyhow!("Heartbeat interval and client timeout must be greater than 0"));
        }

        if self.upstream.connect_timeout_ms == 0 || self.upstream.drain_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream timeouts must be greater than 0"));
        }

        if self.upstream.model.is_empty() {
            return Err(anyhow::anyhow!("Upstream model cannot be empty"));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!("Only mono audio is supported"));
        }

        if self.audio.bit_depth != 16 {
            return Err(anyhow::anyhow!("Only 16-bit PCM is supported"));
        }

        if self.audio.frame_samples == 0 {
            return Err(anyhow::anyhow!("Frame size must be greater than 0"));
        }

        self.validate_tunables()?;

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    fn validate_tunables(&self) -> Result<()> {
        if !(self.silence.threshold_db < 0.0) {
            return Err(anyhow::anyhow!("Silence threshold must be a negative dB value"));
        }

        if self.silence.duration_ms == 0 {
            return Err(anyhow::anyhow!("Silence duration must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update of the runtime-tunable sections.
    ///
    /// Only `silence.threshold_db`, `silence.duration_ms` and
    /// `relay.disconnect_policy` are honoured, e.g.
    /// `{"silence": {"duration_ms": 2000}}`. The result is re-validated.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(silence) = partial_config.get("silence") {
            if let Some(threshold) = silence.get("threshold_db").and_then(|v| v.as_f64()) {
                self.silence.threshold_db = threshold;
            }
            if let Some(duration) = silence.get("duration_ms").and_then(|v| v.as_u64()) {
                self.silence.duration_ms = duration;
            }
        }

        if let Some(relay) = partial_config.get("relay") {
            if let Some(policy) = relay.get("disconnect_policy").and_then(|v| v.as_str()) {
                self.relay.disconnect_policy = policy.parse().map_err(|e: String| anyhow::anyhow!(e))?;
            }
        }

        self.validate()?;
        Ok(())
    }

    /// Copy safe to hand out over HTTP.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.upstream.api_key.is_empty() {
            copy.upstream.api_key = "********".to_string();
        }
        copy
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.audio.frame_samples, 4096);
        assert_eq!(config.silence.threshold_db, -50.0);
        assert_eq!(config.silence.duration_ms, 3000);
        assert_eq!(config.relay.disconnect_policy, DisconnectPolicy::Drain);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.silence.threshold_db = 3.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"silence": {"duration_ms": 2000}, "relay": {"disconnect_policy": "abort"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.silence.duration_ms, 2000);
        assert_eq!(config.relay.disconnect_policy, DisconnectPolicy::Abort);
        // Untouched sections keep their values
        assert_eq!(config.silence.threshold_db, -50.0);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_config_update_ignores_fixed_sections() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "upstream": {"model": "other"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.upstream.model, "gemini-2.0-flash-exp");
    }

    #[test]
    fn test_config_update_rejects_bad_policy() {
        let mut config = AppConfig::default();
        let json = r#"{"relay": {"disconnect_policy": "later"}}"#;
        assert!(config.update_from_json(json).is_err());
    }

    #[test]
    fn test_environment_reaches_multi_word_keys() {
        let vars: std::collections::HashMap<String, String> = [
            ("APP_SERVER__WS_PATH", "/relay"),
            ("APP_UPSTREAM__DRAIN_TIMEOUT_MS", "5000"),
            ("APP_SILENCE__DURATION_MS", "1500"),
            ("APP_RELAY__DISCONNECT_POLICY", "abort"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = AppConfig::load_with(app_environment().source(Some(vars))).unwrap();
        assert_eq!(config.server.ws_path, "/relay");
        assert_eq!(config.upstream.drain_timeout_ms, 5000);
        assert_eq!(config.silence.duration_ms, 1500);
        assert_eq!(config.relay.disconnect_policy, DisconnectPolicy::Abort);
        // Untouched keys keep their defaults
        assert_eq!(config.audio.frame_samples, 4096);
    }

    #[test]
    fn test_redacted_hides_api_key() {
        let mut config = AppConfig::default();
        config.upstream.api_key = "secret".to_string();
        let redacted = config.redacted();
        assert_eq!(redacted.upstream.api_key, "********");
        assert_eq!(config.upstream.api_key, "secret");
    }
}
