//! # PCM Framer
//!
//! Turns an irregular stream of float samples into fixed-size int16 frames.
//! Capture callbacks deliver blocks of any length; the framer accumulates
//! them and emits one [`AudioFrame`] per `frame_samples` samples.
//!
//! A trailing partial frame is never padded or flushed. It stays buffered
//! until more samples arrive or [`PcmFramer::reset`] discards it.

use crate::audio::pcm::{float_to_pcm16, AudioFrame};

/// Samples per frame sent over the wire.
pub const DEFAULT_FRAME_SAMPLES: usize = 4096;

#[derive(Debug)]
pub struct PcmFramer {
    frame_samples: usize,
    pending: Vec<i16>,
    frames_emitted: u64,
}

impl Default for PcmFramer {
    fn default() -> Self {
        Self::new(DEFAULT_FRAME_SAMPLES)
    }
}

impl PcmFramer {
    /// A zero frame size is bumped to one sample.
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
            frames_emitted: 0,
        }
    }

    /// Accept a block of float samples and return every frame it completes.
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        for &sample in samples {
            self.pending.push(float_to_pcm16(sample));
            if self.pending.len() == self.frame_samples {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_samples));
                frames.push(AudioFrame::new(full));
            }
        }

        self.frames_emitted += frames.len() as u64;
        frames
    }

    /// Number of samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    /// Drop any buffered partial frame, e.g. when capture is torn down.
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_one_frame_per_4096_samples() {
        let mut framer = PcmFramer::default();
        let mut total_frames = 0;
        let mut total_samples = 0usize;

        // Irregular block sizes, like an audio callback under load
        for block in [128usize, 1000, 4095, 1, 3, 8192, 77, 4096, 2500].iter() {
            let samples = vec![0.25f32; *block];
            let frames = framer.push(&samples);
            total_samples += block;
            total_frames += frames.len();

            assert_eq!(total_frames, total_samples / 4096);
            assert_eq!(framer.pending(), total_samples % 4096);
            for frame in frames {
                assert_eq!(frame.len(), 4096);
            }
        }
        assert_eq!(framer.frames_emitted(), total_frames as u64);
    }

    #[test]
    fn test_frame_contents_are_converted_in_order() {
        let mut framer = PcmFramer::new(4);
        assert!(framer.push(&[-1.0, 0.0]).is_empty());
        let frames = framer.push(&[0.5, 1.0, 0.1]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].samples(), &[-32768, 0, 16383, 32767]);
        assert_eq!(framer.pending(), 1);
    }

    #[test]
    fn test_no_flush_and_reset() {
        let mut framer = PcmFramer::new(8);
        framer.push(&[0.1; 5]);
        assert_eq!(framer.pending(), 5);
        framer.reset();
        assert_eq!(framer.pending(), 0);

        // After reset a full frame needs a full frame's worth of samples again
        assert!(framer.push(&[0.1; 7]).is_empty());
        assert_eq!(framer.push(&[0.1; 1]).len(), 1);
    }

    #[test]
    fn test_empty_push() {
        let mut framer = PcmFramer::default();
        assert!(framer.push(&[]).is_empty());
        assert_eq!(framer.pending(), 0);
    }
}
