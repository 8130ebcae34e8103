//! # Audio Pipeline
//!
//! Everything that touches samples:
//! - **pcm**: float ↔ int16 conversion and the little-endian/base64 wire format
//! - **framer**: fixed-size framing of captured audio
//! - **silence**: end-of-turn detection by sustained quiet
//! - **playback**: strictly ordered playback of response audio
//!
//! ## Audio Format
//! - Input: 16 kHz mono, 16-bit signed little-endian PCM, 4096-sample frames
//! - Output: 24 kHz mono, same sample encoding

pub mod framer;
pub mod pcm;
pub mod playback;
pub mod silence;

pub use framer::PcmFramer;
pub use pcm::AudioFrame;
pub use playback::{AudioSink, PlaybackProgress, PlaybackQueue, PlaybackTicket};
pub use silence::{Clock, SilenceDetector, StreamClock, SystemClock};
