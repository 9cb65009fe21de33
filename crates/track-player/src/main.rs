//! Track Player: plays a test tone through an `AudioTrack` on a CPAL output device and logs
//! the estimated playback position.
//!
//! The tone is generated in fixed-size chunks, each tagged with the media time of its last
//! frame, and submitted until the track reports it consumed. After the last chunk the track
//! is told the stream ended and the player waits for the queued audio to play out.

mod cli;
mod tone;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use audio_track::cpal_sink::{CpalProvider, output_device_names};
use audio_track::{AudioTrack, Clock, MonotonicClock};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Raw PCM content type; anything that is not passthrough.
const PCM_MIME: &str = "audio/raw";
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,audio_track=info,track_player=info")
        }))
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for name in output_device_names(&host)? {
            println!("{name}");
        }
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("install ctrl-c handler")?;
    }

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let provider = CpalProvider::new(args.device.clone(), clock.clone());
    let mut track = AudioTrack::with_clock(
        provider,
        args.track_config(),
        args.track_quirks(),
        clock,
    );

    track
        .configure(args.channels, args.sample_rate, PCM_MIME, false, args.buffer_bytes)
        .context("configure track")?;
    let session_id = track.open(None).context("open track")?;
    track.set_volume(args.volume);
    track.play();
    tracing::info!(
        session_id,
        sample_rate = args.sample_rate,
        channels = args.channels,
        frequency = args.frequency,
        "playing test tone"
    );

    let result = play_tone(&mut track, &args, &running);
    track.release();
    result
}

fn play_tone(track: &mut AudioTrack<CpalProvider>, args: &cli::Args, running: &AtomicBool) -> Result<()> {
    let chunk_frames = (u64::from(args.sample_rate) * u64::from(args.chunk_ms.max(1)) / 1_000) as usize;
    let total_frames = (f64::from(args.seconds.max(0.0)) * f64::from(args.sample_rate)) as u64;
    let mut tone = tone::Tone::new(args.frequency, args.sample_rate, args.channels);
    let mut reporter = Reporter::new(Duration::from_millis(args.report_ms.max(1)));

    while running.load(Ordering::SeqCst) && tone.frames() < total_frames {
        let frames = chunk_frames.min((total_frames - tone.frames()) as usize);
        let chunk = tone.next_chunk(frames);
        let pts = tone.end_time_us();
        loop {
            let result = track.submit(&chunk, pts)?;
            if result.discontinuity {
                tracing::warn!(pts, "position discontinuity");
            }
            reporter.maybe_report(track)?;
            if result.consumed {
                break;
            }
            if !running.load(Ordering::SeqCst) {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    track.signal_end_of_stream();
    tracing::info!(end_us = tone.end_time_us(), "end of stream, playing out");
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while running.load(Ordering::SeqCst) && track.has_pending_data() && Instant::now() < deadline {
        reporter.maybe_report(track)?;
        std::thread::sleep(POLL_INTERVAL);
    }
    let final_us = track.get_position_us(true)?;
    tracing::info!(position_us = ?final_us, "playback finished");
    Ok(())
}

struct Reporter {
    interval: Duration,
    last: Option<Instant>,
}

impl Reporter {
    fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    fn maybe_report(&mut self, track: &mut AudioTrack<CpalProvider>) -> Result<()> {
        let now = Instant::now();
        if self.last.is_some_and(|last| now.duration_since(last) < self.interval) {
            return Ok(());
        }
        self.last = Some(now);
        let position_us = track.get_position_us(false)?;
        tracing::info!(position_us = ?position_us, "position");
        let status = serde_json::to_string(&track.status()).context("serialize status")?;
        tracing::debug!(%status, "track status");
        Ok(())
    }
}
