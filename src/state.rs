//! # Application State
//!
//! Shared across every HTTP handler and WebSocket session actor.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **config**: read by every new session, replaced by `PUT /api/v1/config`
//! - **metrics**: request counters from the middleware plus relay counters
//!   folded in by sessions as they run
//!
//! The upstream connector is shared read-only; each session asks it for its
//! own links.
//!
//! Lock poisoning is recovered from rather than propagated: every writer
//! leaves the data consistent at each step, so the inner value stays usable.

use crate::config::AppConfig;
use crate::relay::session::SessionStats;
use crate::upstream::UpstreamConnector;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub start_time: Instant,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("model", &self.connector.model())
            .field("uptime_secs", &self.get_uptime_seconds())
            .finish()
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    pub active_sessions: u32,
    pub sessions_total: u64,
    /// Upgrades refused because the session limit was reached
    pub sessions_rejected: u64,
    pub turns_completed: u64,
    pub upstream_failures: u64,
    pub audio_chunks_forwarded: u64,
    pub audio_chunks_dropped: u64,
    pub audio_chunks_relayed: u64,
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig, connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            connector,
            start_time: Instant::now(),
        }
    }

    fn read_metrics(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_metrics(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_config(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the configuration if the new one validates.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write().unwrap_or_else(|poisoned| poisoned.into_inner()) = new_config;
        Ok(())
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Claim a session slot. Fails once `max_concurrent_sessions` are active.
    pub fn try_acquire_session(&self) -> bool {
        let max = self.get_config().performance.max_concurrent_sessions;
        let mut metrics = self.write_metrics();
        if metrics.active_sessions as usize >= max {
            metrics.sessions_rejected += 1;
            return false;
        }
        metrics.active_sessions += 1;
        metrics.sessions_total += 1;
        true
    }

    pub fn release_session(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    /// Fold a finished session's counters into the global totals.
    pub fn record_session_stats(&self, stats: &SessionStats) {
        let mut metrics = self.write_metrics();
        metrics.turns_completed += stats.turns_completed;
        metrics.upstream_failures += stats.upstream_failures;
        metrics.audio_chunks_forwarded += stats.chunks_forwarded;
        metrics.audio_chunks_dropped += stats.chunks_dropped;
        metrics.audio_chunks_relayed += stats.chunks_relayed;
    }

    pub fn active_sessions(&self) -> u32 {
        self.read_metrics().active_sessions
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.read_metrics().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
