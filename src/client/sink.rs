//! Playback sink that records response audio to a WAV file.
//!
//! Samples are stored as 32-bit float so the file holds exactly what the
//! queue decoded.

use crate::audio::playback::{AudioSink, PlaybackProgress, PlaybackTicket};
use crate::error::VoiceError;
use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct WavFileSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: u32,
    samples_written: u64,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self, VoiceError> {
        let path = path.as_ref().to_path_buf();
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;

        Ok(Self {
            writer: Some(writer),
            path,
            sample_rate,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Flush the header and close the file. Returns the samples written.
    pub fn finalize(mut self) -> Result<u64, VoiceError> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
        }
        debug!(path = %self.path.display(), samples = self.samples_written, "playback file finalized");
        Ok(self.samples_written)
    }
}

impl AudioSink for WavFileSink {
    fn start(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        _ticket: PlaybackTicket,
    ) -> Result<PlaybackProgress, VoiceError> {
        if sample_rate != self.sample_rate {
            return Err(VoiceError::UnsupportedEnvironment(format!(
                "sink records {} Hz, frame is {} Hz",
                self.sample_rate, sample_rate
            )));
        }
        let writer = self.writer.as_mut().ok_or(VoiceError::TransportClosed)?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| VoiceError::DeviceUnavailable(e.to_string()))?;
        }
        self.samples_written += samples.len() as u64;
        Ok(PlaybackProgress::Finished)
    }

    fn halt(&mut self) {
        // Writes complete synchronously; nothing is ever in flight
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!(path = %self.path.display(), error = %e, "failed to finalize playback file");
            }
        }
    }
}
