//! # Silence Detector
//!
//! Decides when the speaker has finished a turn. Each analyzed frame is
//! reduced to an RMS level in dBFS; once the level has stayed below the
//! threshold for the configured duration, the detector fires exactly once.
//!
//! ## One-Shot Semantics
//! Loud audio restarts the silence timer but does not re-arm the detector.
//! Only [`SilenceDetector::reset`], called at the start of each listening
//! cycle, allows another firing. Levels hovering around the threshold after
//! a firing therefore cannot produce a second signal in the same cycle.
//!
//! ## Time
//! Time comes from a [`Clock`]. Live capture uses [`SystemClock`]; replaying
//! recorded audio uses a [`StreamClock`] advanced by each frame's duration,
//! so detection follows media time rather than wall time.

use crate::audio::pcm::{rms, AudioFrame};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_THRESHOLD_DB: f64 = -50.0;
pub const DEFAULT_SILENCE_DURATION_MS: u64 = 3000;

/// Source of "now" for silence timing.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock measuring media time.
#[derive(Debug)]
pub struct StreamClock {
    origin: Instant,
    elapsed_us: AtomicU64,
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed_us: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_us.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us.load(Ordering::SeqCst))
    }
}

impl Clock for StreamClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceConfig {
    /// Level below which a frame counts as silent (dBFS)
    pub threshold_db: f64,
    /// Sustained silence needed before firing
    pub duration: Duration,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold_db: DEFAULT_THRESHOLD_DB,
            duration: Duration::from_millis(DEFAULT_SILENCE_DURATION_MS),
        }
    }
}

impl From<&crate::config::SilenceConfig> for SilenceConfig {
    fn from(cfg: &crate::config::SilenceConfig) -> Self {
        Self {
            threshold_db: cfg.threshold_db,
            duration: Duration::from_millis(cfg.duration_ms),
        }
    }
}

/// Level of a frame in dBFS. An all-zero frame is `-inf`.
pub fn level_db(frame: &AudioFrame) -> f64 {
    let level = rms(frame.samples());
    if level <= 0.0 {
        f64::NEG_INFINITY
    } else {
        20.0 * level.log10()
    }
}

pub struct SilenceDetector<C: Clock = SystemClock> {
    config: SilenceConfig,
    silence_start: Option<Instant>,
    silent: bool,
    fired: bool,
    clock: C,
}

impl SilenceDetector<SystemClock> {
    pub fn new(config: SilenceConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> SilenceDetector<C> {
    pub fn with_clock(config: SilenceConfig, clock: C) -> Self {
        Self {
            config,
            silence_start: None,
            silent: false,
            fired: false,
            clock,
        }
    }

    /// Feed one frame. Returns `true` only on the frame that fires.
    pub fn analyze(&mut self, frame: &AudioFrame) -> bool {
        let db = level_db(frame);
        let now = self.clock.now();

        // NaN cannot come out of level_db, but a NaN comparison must not
        // count as loud audio either
        if db < self.config.threshold_db || db.is_nan() {
            self.silent = true;
            match self.silence_start {
                None => {
                    self.silence_start = Some(now);
                }
                Some(start) => {
                    if !self.fired && now.saturating_duration_since(start) >= self.config.duration {
                        self.fired = true;
                        tracing::debug!(level_db = db, "silence detected");
                        return true;
                    }
                }
            }
        } else {
            self.silence_start = None;
            self.silent = false;
        }

        false
    }

    /// Re-arm for a new listening cycle.
    pub fn reset(&mut self) {
        self.silence_start = None;
        self.silent = false;
        self.fired = false;
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn config(&self) -> &SilenceConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_MS: u64 = 100;

    fn quiet() -> AudioFrame {
        AudioFrame::new(vec![0; 1600])
    }

    fn loud() -> AudioFrame {
        // Square wave at a quarter of full scale, about -12 dBFS
        AudioFrame::new((0..1600).map(|i| if i % 2 == 0 { 8192 } else { -8192 }).collect())
    }

    fn detector() -> (SilenceDetector<Arc<StreamClock>>, Arc<StreamClock>) {
        let clock = Arc::new(StreamClock::new());
        (SilenceDetector::with_clock(SilenceConfig::default(), clock.clone()), clock)
    }

    /// Feed frames for `ms` of media time and count firings.
    fn feed(
        det: &mut SilenceDetector<Arc<StreamClock>>,
        clock: &StreamClock,
        frame: &AudioFrame,
        ms: u64,
    ) -> usize {
        let mut fired = 0;
        for _ in 0..(ms / FRAME_MS) {
            if det.analyze(frame) {
                fired += 1;
            }
            clock.advance(Duration::from_millis(FRAME_MS));
        }
        fired
    }

    #[test]
    fn test_level_of_zero_frame_is_negative_infinity() {
        let db = level_db(&quiet());
        assert!(db.is_infinite() && db < 0.0);
        let db = level_db(&loud());
        assert!((db - (-12.04)).abs() < 0.1, "got {}", db);
    }

    #[test]
    fn test_sustained_zeros_fire_exactly_once() {
        let (mut det, clock) = detector();
        assert_eq!(feed(&mut det, &clock, &quiet(), 10_000), 1);
        assert!(det.has_fired());
        assert!(det.is_silent());
    }

    #[test]
    fn test_fires_at_the_duration_boundary() {
        let (mut det, clock) = detector();
        // First silent frame starts the timer at t=0; t=2900 is still short
        assert_eq!(feed(&mut det, &clock, &quiet(), 3000), 0);
        // t=3000 reaches the duration
        assert!(det.analyze(&quiet()));
    }

    #[test]
    fn test_alternating_every_second_never_fires() {
        let (mut det, clock) = detector();
        let mut fired = 0;
        for _ in 0..10 {
            fired += feed(&mut det, &clock, &loud(), 1000);
            fired += feed(&mut det, &clock, &quiet(), 1000);
        }
        assert_eq!(fired, 0);
    }

    #[test]
    fn test_loud_audio_does_not_rearm() {
        let (mut det, clock) = detector();
        assert_eq!(feed(&mut det, &clock, &quiet(), 4000), 1);
        assert_eq!(feed(&mut det, &clock, &loud(), 500), 0);
        assert!(!det.is_silent());
        assert_eq!(feed(&mut det, &clock, &quiet(), 5000), 0);
    }

    #[test]
    fn test_reset_allows_one_more_firing() {
        let (mut det, clock) = detector();
        assert_eq!(feed(&mut det, &clock, &quiet(), 4000), 1);
        det.reset();
        assert!(!det.has_fired());
        assert_eq!(feed(&mut det, &clock, &quiet(), 8000), 1);
    }

    #[test]
    fn test_threshold_is_configurable() {
        let clock = Arc::new(StreamClock::new());
        let config = SilenceConfig {
            threshold_db: -6.0,
            duration: Duration::from_millis(200),
        };
        let mut det = SilenceDetector::with_clock(config, clock.clone());
        // -12 dBFS is below a -6 dB threshold
        assert_eq!(feed(&mut det, &clock, &loud(), 1000), 1);
    }
}
