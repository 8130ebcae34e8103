//! # WAV Capture Source
//!
//! Stands in for a microphone: reads a mono 16 kHz WAV file and yields its
//! samples as normalized floats in irregularly sized blocks, the way an
//! audio callback delivers them.
//!
//! ## Failure Mapping
//! - file not readable for permission reasons → `PermissionDenied`
//! - file missing or unreadable → `DeviceUnavailable`
//! - not a WAV, wrong channel count, rate or sample format → `UnsupportedEnvironment`

use crate::audio::pcm::{pcm16_to_float, INPUT_SAMPLE_RATE};
use crate::error::VoiceError;
use hound::{SampleFormat, WavReader};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use tracing::{debug, info};

/// Block sizes cycled through on successive reads.
pub const DEFAULT_BLOCK_SIZES: &[usize] = &[128, 480, 1024, 2000];

pub struct WavCapture {
    reader: Option<WavReader<BufReader<File>>>,
    format: SampleFormat,
    block_sizes: Vec<usize>,
    next_block: usize,
    samples_read: u64,
}

fn open_error(err: hound::Error) -> VoiceError {
    match err {
        hound::Error::IoError(e) => match e.kind() {
            ErrorKind::PermissionDenied => VoiceError::PermissionDenied(e.to_string()),
            _ => VoiceError::DeviceUnavailable(e.to_string()),
        },
        other => VoiceError::UnsupportedEnvironment(other.to_string()),
    }
}

impl WavCapture {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VoiceError> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(open_error)?;
        let spec = reader.spec();

        if spec.channels != 1 {
            return Err(VoiceError::UnsupportedEnvironment(format!(
                "expected mono input, got {} channels",
                spec.channels
            )));
        }
        if spec.sample_rate != INPUT_SAMPLE_RATE {
            return Err(VoiceError::UnsupportedEnvironment(format!(
                "expected {} Hz input, got {} Hz",
                INPUT_SAMPLE_RATE, spec.sample_rate
            )));
        }
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) | (SampleFormat::Float, 32) => {}
            (format, bits) => {
                return Err(VoiceError::UnsupportedEnvironment(format!(
                    "unsupported sample format {:?}/{} bits",
                    format, bits
                )))
            }
        }

        info!(path = %path.display(), samples = reader.len(), "capture opened");
        Ok(Self {
            reader: Some(reader),
            format: spec.sample_format,
            block_sizes: DEFAULT_BLOCK_SIZES.to_vec(),
            next_block: 0,
            samples_read: 0,
        })
    }

    /// Replace the block size cycle. Zero sizes are ignored.
    pub fn with_block_sizes(mut self, sizes: &[usize]) -> Self {
        let sizes: Vec<usize> = sizes.iter().copied().filter(|&s| s > 0).collect();
        if !sizes.is_empty() {
            self.block_sizes = sizes;
            self.next_block = 0;
        }
        self
    }

    pub fn sample_rate(&self) -> u32 {
        INPUT_SAMPLE_RATE
    }

    pub fn is_active(&self) -> bool {
        self.reader.is_some()
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Next block of samples, or `None` once the input is exhausted or
    /// capture has been stopped. A read error stops capture.
    pub fn read_block(&mut self) -> Result<Option<Vec<f32>>, VoiceError> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let size = self.block_sizes[self.next_block % self.block_sizes.len()];
        self.next_block = self.next_block.wrapping_add(1);

        let block: Result<Vec<f32>, hound::Error> = match self.format {
            SampleFormat::Int => reader
                .samples::<i16>()
                .take(size)
                .map(|s| s.map(pcm16_to_float))
                .collect(),
            SampleFormat::Float => reader.samples::<f32>().take(size).collect(),
        };

        match block {
            Ok(block) if block.is_empty() => {
                debug!(samples = self.samples_read, "capture input exhausted");
                self.stop();
                Ok(None)
            }
            Ok(block) => {
                self.samples_read += block.len() as u64;
                Ok(Some(block))
            }
            Err(e) => {
                self.stop();
                Err(VoiceError::DeviceUnavailable(e.to_string()))
            }
        }
    }

    /// Release the input. Idempotent.
    pub fn stop(&mut self) {
        if self.reader.take().is_some() {
            debug!(samples = self.samples_read, "capture stopped");
        }
    }
}

impl Drop for WavCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::path::PathBuf;

    fn temp_wav(spec: WavSpec, samples: &[i16]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("capture-{}.wav", uuid::Uuid::new_v4()));
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    fn mono_16k() -> WavSpec {
        WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn test_reads_irregular_blocks() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 100) as i16 * 100).collect();
        let path = temp_wav(mono_16k(), &samples);

        let mut capture = WavCapture::open(&path).unwrap().with_block_sizes(&[128, 300]);
        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while let Some(block) = capture.read_block().unwrap() {
            sizes.push(block.len());
            all.extend(block);
        }

        assert_eq!(sizes, vec![128, 300, 128, 300, 128, 16]);
        assert_eq!(all.len(), 1000);
        assert_eq!(all[1], pcm16_to_float(100));
        assert!(!capture.is_active());
        assert_eq!(capture.samples_read(), 1000);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let path = temp_wav(mono_16k(), &[0; 512]);
        let mut capture = WavCapture::open(&path).unwrap();
        assert!(capture.read_block().unwrap().is_some());

        capture.stop();
        capture.stop();
        assert_eq!(capture.read_block().unwrap(), None);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_unavailable() {
        let result = WavCapture::open("/nonexistent/dir/input.wav");
        assert!(matches!(result, Err(VoiceError::DeviceUnavailable(_))));
    }

    #[test]
    fn test_rejects_wrong_format() {
        let stereo = WavSpec {
            channels: 2,
            ..mono_16k()
        };
        let path = temp_wav(stereo, &[0; 64]);
        assert!(matches!(
            WavCapture::open(&path),
            Err(VoiceError::UnsupportedEnvironment(_))
        ));
        std::fs::remove_file(path).ok();

        let wrong_rate = WavSpec {
            sample_rate: 44_100,
            ..mono_16k()
        };
        let path = temp_wav(wrong_rate, &[0; 64]);
        assert!(matches!(
            WavCapture::open(&path),
            Err(VoiceError::UnsupportedEnvironment(_))
        ));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_rejects_non_wav() {
        let path = std::env::temp_dir().join(format!("capture-{}.wav", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"definitely not a riff header").unwrap();
        assert!(matches!(
            WavCapture::open(&path),
            Err(VoiceError::UnsupportedEnvironment(_))
        ));
        std::fs::remove_file(path).ok();
    }
}
