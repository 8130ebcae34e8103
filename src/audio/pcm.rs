//! # PCM Format Conversion
//!
//! The wire format for every audio block in the system:
//! mono, signed 16-bit, little-endian PCM, base64-encoded inside JSON.
//!
//! ## Sample Scaling
//! Float samples in `[-1, 1]` map onto the asymmetric int16 range:
//! negative values scale by 32768, non-negative values by 32767. Decoding
//! uses the same split, so `-1.0 ↔ -32768` and `1.0 ↔ 32767` both round-trip
//! exactly.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Sample rate of client capture audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate the AI service replies with.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type attached to audio forwarded to the AI service.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Convert one float sample to int16 with clipping. The scaled value is
/// truncated toward zero, matching an `Int16Array` store in the browser.
pub fn float_to_pcm16(sample: f32) -> i16 {
    // NaN would otherwise cast to 0 silently; treat it as silence explicitly
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

pub fn pcm16_to_float(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

pub fn pcm16_to_floats(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| pcm16_to_float(s)).collect()
}

/// Serialize samples as little-endian bytes.
pub fn encode_le(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

/// Parse little-endian bytes into samples.
///
/// A trailing odd byte is ignored; it cannot form a whole sample.
pub fn decode_le(bytes: &[u8]) -> Vec<i16> {
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    let mut cursor = Cursor::new(bytes);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }
    samples
}

/// Decode a base64 transport payload into raw PCM bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    B64.decode(payload.trim())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    B64.encode(bytes)
}

/// Root-mean-square level of a block of int16 samples, normalized by 32768.
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();
    (sum / samples.len() as f64).sqrt()
}

/// One fixed-size block of 16 kHz mono int16 samples.
///
/// Immutable once built; the framer hands ownership to whoever transmits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// Build a frame from little-endian PCM bytes.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        Self::new(decode_le(bytes))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Playback duration at the given sample rate, in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> f64 {
        if sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 * 1000.0 / sample_rate as f64
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.samples.len() * 2];
        LittleEndian::write_i16_into(&self.samples, &mut bytes);
        bytes
    }

    /// Wire form carried in `audio` messages.
    pub fn to_base64(&self) -> String {
        encode_base64(&self.to_le_bytes())
    }

    pub fn to_floats(&self) -> Vec<f32> {
        pcm16_to_floats(&self.samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaling_extremes() {
        assert_eq!(float_to_pcm16(-1.0), -32768);
        assert_eq!(float_to_pcm16(1.0), 32767);
        assert_eq!(float_to_pcm16(0.0), 0);
        assert_eq!(float_to_pcm16(2.5), 32767);
        assert_eq!(float_to_pcm16(-7.0), -32768);
        assert_eq!(float_to_pcm16(f32::NAN), 0);

        // Truncated, not rounded
        assert_eq!(float_to_pcm16(0.5), 16383);
        assert_eq!(float_to_pcm16(-0.25), -8192);
        assert_eq!(float_to_pcm16(0.99999), 32766);

        assert_eq!(pcm16_to_float(-32768), -1.0);
        assert_eq!(pcm16_to_float(32767), 1.0);
    }

    #[test]
    fn test_round_trip_within_one_step() {
        let step = 1.0 / 32767.0;
        let mut s = -1.0f32;
        while s <= 1.0 {
            let back = pcm16_to_float(float_to_pcm16(s));
            assert!(
                (back - s).abs() <= step,
                "sample {} came back as {}",
                s,
                back
            );
            s += 0.00037;
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let bytes = encode_le(&[1, -2, 0x1234]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF, 0x34, 0x12]);
        assert_eq!(decode_le(&bytes), vec![1, -2, 0x1234]);

        // Odd trailing byte is dropped
        assert_eq!(decode_le(&[0x01, 0x00, 0x07]), vec![1]);
    }

    #[test]
    fn test_frame_base64() {
        let frame = AudioFrame::new(vec![0, 32767, -32768]);
        let wire = frame.to_base64();
        let bytes = decode_base64(&wire).unwrap();
        assert_eq!(AudioFrame::from_le_bytes(&bytes), frame);
        assert!(decode_base64("not base64!!").is_err());
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0; 64]), 0.0);
        let full = rms(&[-32768; 16]);
        assert!((full - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; 4096]);
        assert!((frame.duration_ms(16_000) - 256.0).abs() < 1e-9);
        assert_eq!(frame.duration_ms(0), 0.0);
    }
}
