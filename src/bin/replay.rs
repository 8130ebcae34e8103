//! # ielts-replay
//!
//! Plays one speaking turn against a running relay: streams a WAV file as
//! the candidate's answer, ends the turn on sustained silence (or at the end
//! of the file) and records the examiner's spoken reply to another WAV file.
//!
//! ```text
//! ielts-replay --input answer.wav --output reply.wav --relay ws://127.0.0.1:3000/ws
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use ielts_voice_relay::audio::pcm::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE};
use ielts_voice_relay::audio::silence::{SilenceConfig, SilenceDetector, StreamClock};
use ielts_voice_relay::audio::{PcmFramer, PlaybackQueue};
use ielts_voice_relay::client::{self, ClientTurn, RelaySender, WavCapture, WavFileSink};
use ielts_voice_relay::relay::{ServerMessage, TurnStatus};
use ielts_voice_relay::VoiceError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ielts-replay", version, about = "Replay a recorded answer through the voice relay")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    relay: String,

    /// Mono 16 kHz WAV file to stream as the answer
    #[arg(long)]
    input: PathBuf,

    /// Where to write the reply audio
    #[arg(long, default_value = "reply.wav")]
    output: PathBuf,

    /// Silence threshold in dBFS
    #[arg(long, default_value_t = -50.0, allow_hyphen_values = true)]
    threshold_db: f64,

    /// Silence needed to end the turn, in milliseconds
    #[arg(long, default_value_t = 3000)]
    silence_ms: u64,

    /// Pace frames at their real duration instead of sending as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Give up on the reply after this many seconds
    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

type Events = UnboundedReceiver<Result<ServerMessage, VoiceError>>;
type Playback = PlaybackQueue<WavFileSink>;

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Recording,
    Done,
    Closed,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ielts_replay=info,ielts_voice_relay=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();
    let mut capture = WavCapture::open(&args.input).with_context(|| format!("opening {}", args.input.display()))?;
    let sink = WavFileSink::create(&args.output, OUTPUT_SAMPLE_RATE)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let mut playback = PlaybackQueue::new(sink);

    let mut turn = ClientTurn::new();
    turn.connect();
    let (mut tx, mut rx) = match client::connect(&args.relay).await {
        Ok(halves) => halves,
        Err(e) => {
            turn.on_transport_error(e.to_string());
            return Err(e.into());
        }
    };
    turn.on_open();

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let reader = tokio::spawn(async move {
        while let Some(msg) = rx.next_message().await {
            if events_tx.send(msg).is_err() {
                break;
            }
        }
    });

    let result = run_turn(&args, &mut capture, &mut turn, &mut tx, &mut events, &mut playback).await;

    capture.stop();
    playback.stop();
    if turn.disconnect() {
        tx.close().await;
    }
    reader.abort();

    let frames = playback.frames_played();
    let samples = playback.into_sink().finalize()?;
    if let Err(e) = &result {
        if let Some(voice) = e.downcast_ref::<VoiceError>() {
            let stage = if voice.is_capture_error() { "capture" } else { "relay" };
            error!(stage, error_code = voice.code(), "turn failed, start again to retry");
        }
    }
    result?;

    info!(
        frames,
        seconds = samples as f64 / OUTPUT_SAMPLE_RATE as f64,
        output = %args.output.display(),
        "reply recorded"
    );
    Ok(())
}

async fn run_turn(
    args: &Args,
    capture: &mut WavCapture,
    turn: &mut ClientTurn,
    tx: &mut RelaySender,
    events: &mut Events,
    playback: &mut Playback,
) -> Result<()> {
    let reply_timeout = Duration::from_secs(args.timeout_secs);

    if let Some(start) = turn.start_listening() {
        tx.send(&start).await?;
    }

    // The relay drops audio until its upstream link is up
    loop {
        let event = tokio::time::timeout(reply_timeout, events.recv())
            .await
            .context("timed out waiting for the relay to start recording")?;
        match apply(event, turn, playback)? {
            Flow::Recording => break,
            Flow::Closed => bail!("relay closed the connection before recording"),
            _ => {}
        }
    }

    let clock = Arc::new(StreamClock::new());
    let mut detector = SilenceDetector::with_clock(
        SilenceConfig {
            threshold_db: args.threshold_db,
            duration: Duration::from_millis(args.silence_ms),
        },
        clock.clone(),
    );
    let mut framer = PcmFramer::default();
    let mut silence_hit = false;

    'capture: while let Some(block) = capture.read_block()? {
        for frame in framer.push(&block) {
            if let Some(msg) = turn.audio_chunk(&frame) {
                tx.send(&msg).await?;
            }

            let frame_time = Duration::from_secs_f64(frame.duration_ms(INPUT_SAMPLE_RATE) / 1000.0);
            clock.advance(frame_time);
            if args.realtime {
                tokio::time::sleep(frame_time).await;
            }

            if detector.analyze(&frame) {
                info!(after = ?clock.elapsed(), "silence detected, ending answer");
                silence_hit = true;
                break 'capture;
            }
        }

        loop {
            let event = match events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => None,
            };
            if apply(event, turn, playback)? == Flow::Closed {
                bail!("relay closed the connection while recording");
            }
        }
    }

    capture.stop();
    if !silence_hit {
        debug!(unsent = framer.pending(), "input exhausted before silence");
    }
    if let Some(stop) = turn.stop_listening() {
        tx.send(&stop).await?;
    }

    loop {
        let event = tokio::time::timeout(reply_timeout, events.recv())
            .await
            .context("timed out waiting for the reply")?;
        match apply(event, turn, playback)? {
            Flow::Done => return Ok(()),
            Flow::Closed => bail!("relay closed the connection before the reply finished"),
            _ => {}
        }
    }
}

/// Feed one relay event through the turn state. `None` means the relay
/// connection has ended.
fn apply(
    event: Option<Result<ServerMessage, VoiceError>>,
    turn: &mut ClientTurn,
    playback: &mut Playback,
) -> Result<Flow> {
    let msg = match event {
        None => {
            turn.on_close();
            return Ok(Flow::Closed);
        }
        Some(Err(e)) => {
            turn.on_transport_error(e.to_string());
            return Err(e.into());
        }
        Some(Ok(msg)) => msg,
    };

    let flow = match &msg {
        ServerMessage::Status {
            status: TurnStatus::Recording,
        } => Flow::Recording,
        ServerMessage::Status {
            status: TurnStatus::Done,
        } => Flow::Done,
        _ => Flow::Continue,
    };
    let failed = matches!(msg, ServerMessage::Error { .. });

    if let Some(audio) = turn.on_server_message(msg) {
        if let Err(e) = playback.enqueue_base64(&audio) {
            warn!(error = %e, "undecodable reply audio, skipping");
        }
    }
    if failed {
        bail!("relay error: {}", turn.last_error().unwrap_or("unknown"));
    }
    Ok(flow)
}
