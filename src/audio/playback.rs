//! # Playback Queue
//!
//! Client-side ordering of AI response audio. Frames are played strictly in
//! arrival order, one at a time, never overlapping.
//!
//! ## Sinks
//! The output device sits behind [`AudioSink`]. A sink either consumes a
//! frame synchronously (a file writer returns [`PlaybackProgress::Finished`])
//! or starts asynchronous playback and returns [`PlaybackProgress::Pending`];
//! in that case its owner reports the end of the frame through
//! [`PlaybackQueue::frame_finished`] with the frame's [`PlaybackTicket`].
//!
//! A halted source may still report its end after [`PlaybackQueue::stop`].
//! Completions carrying any ticket other than the current one are ignored,
//! so a stale report never starts a second frame over the playing one.

use crate::audio::pcm::{decode_base64, AudioFrame, OUTPUT_SAMPLE_RATE};
use crate::error::VoiceError;
use std::collections::VecDeque;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackProgress {
    /// The frame has been fully played or written
    Finished,
    /// Playback is running; completion is reported later
    Pending,
}

/// Identity of one frame handed to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackTicket(u64);

/// Output device for decoded response audio.
pub trait AudioSink {
    /// Begin playing one frame of normalized float samples. An asynchronous
    /// sink keeps `ticket` and hands it back on completion.
    fn start(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        ticket: PlaybackTicket,
    ) -> Result<PlaybackProgress, VoiceError>;

    /// Stop whatever is playing. Must tolerate being called when idle.
    fn halt(&mut self);
}

pub struct PlaybackQueue<S: AudioSink> {
    sink: S,
    queue: VecDeque<AudioFrame>,
    current: Option<PlaybackTicket>,
    next_ticket: u64,
    sample_rate: u32,
    frames_played: u64,
}

impl<S: AudioSink> PlaybackQueue<S> {
    pub fn new(sink: S) -> Self {
        Self::with_sample_rate(sink, OUTPUT_SAMPLE_RATE)
    }

    pub fn with_sample_rate(sink: S, sample_rate: u32) -> Self {
        Self {
            sink,
            queue: VecDeque::new(),
            current: None,
            next_ticket: 0,
            sample_rate,
            frames_played: 0,
        }
    }

    /// Append a frame; starts playback if nothing is playing.
    pub fn enqueue(&mut self, frame: AudioFrame) {
        self.queue.push_back(frame);
        if self.current.is_none() {
            self.play_next();
        }
    }

    /// Enqueue a base64 `audio_chunk` payload.
    pub fn enqueue_base64(&mut self, payload: &str) -> Result<(), base64::DecodeError> {
        let bytes = decode_base64(payload)?;
        self.enqueue(AudioFrame::from_le_bytes(&bytes));
        Ok(())
    }

    /// The sink finished the frame identified by `ticket`; advance to the
    /// next one. Returns false for a stale or unknown ticket.
    pub fn frame_finished(&mut self, ticket: PlaybackTicket) -> bool {
        if self.current != Some(ticket) {
            debug!(ticket = ticket.0, "ignoring completion of a frame that is not playing");
            return false;
        }
        self.current = None;
        self.play_next();
        true
    }

    /// Drop everything queued and halt current playback.
    pub fn stop(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.sink.halt();
        self.current = None;
        if dropped > 0 {
            debug!(dropped, "playback stopped with frames pending");
        }
    }

    fn play_next(&mut self) {
        while let Some(frame) = self.queue.pop_front() {
            let ticket = PlaybackTicket(self.next_ticket);
            self.next_ticket += 1;

            let samples = frame.to_floats();
            match self.sink.start(&samples, self.sample_rate, ticket) {
                Ok(PlaybackProgress::Finished) => {
                    self.frames_played += 1;
                }
                Ok(PlaybackProgress::Pending) => {
                    self.frames_played += 1;
                    self.current = Some(ticket);
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "audio sink rejected frame, skipping");
                }
            }
        }
        self.current = None;
    }

    pub fn is_playing(&self) -> bool {
        self.current.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
