//! Playback position tracking.
//!
//! Converts the sink's wrapping frames-consumed counter and its optional hardware
//! timestamps into a position in microseconds:
//! - the head counter is promoted to 64 bits and sampled at most every
//!   `playhead_sample_interval_us` into an [`OffsetWindow`] of `(position - now)` offsets
//! - hardware timestamps (and the device latency) are sampled at most every
//!   `timestamp_sample_interval_us` and sanity-checked before they are trusted
//! - a position query prefers a valid timestamp, then the smoothed offset, then the raw
//!   head position
//!
//! The tracker holds no device; every call borrows the session's sink.

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{SpuriousTimestampPolicy, TrackConfig, TrackQuirks};
use crate::counter::WrapCounter;
use crate::error::{Error, Result};
use crate::format::{MICROS_PER_SECOND, frames_to_us, us_to_frames};
use crate::sink::{OutputSink, PlayState, SinkCapabilities};
use crate::smoothing::OffsetWindow;

/// Window after a resume during which head counter glitches are tolerated.
const RESUME_STABILIZATION_US: i64 = MICROS_PER_SECOND;

/// A hardware timestamp with its frame position promoted to 64 bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PresentedFrame {
    frames: i64,
    time_us: i64,
}

/// Head position frozen at end of stream; later reads are extrapolated from it.
#[derive(Clone, Copy, Debug)]
struct EndOfStream {
    stop_time_us: i64,
    stop_frames: u64,
    end_frames: u64,
}

/// Per-device parameters handed over when a device is attached.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TrackerDevice {
    pub sample_rate: u32,
    /// Duration of the device buffer, excluded from the queried latency.
    pub buffer_duration_us: i64,
    /// Pause and timestamp workarounds for the AC-3 passthrough defect class.
    pub passthrough_workarounds: bool,
}

pub(crate) struct PositionTracker {
    cfg: TrackConfig,
    quirks: TrackQuirks,
    caps: SinkCapabilities,
    clock: Arc<dyn Clock>,

    device: TrackerDevice,
    head: WrapCounter,
    pause_offset: u64,
    end_of_stream: Option<EndOfStream>,
    resume_time_us: i64,
    latency_query_enabled: bool,

    timestamp_frames: WrapCounter,
    timestamp: Option<PresentedFrame>,
    timestamp_valid: bool,

    window: OffsetWindow,
    last_playhead_sample_us: i64,
    last_timestamp_sample_us: i64,
    latency_us: i64,
}

impl PositionTracker {
    pub fn new(
        cfg: TrackConfig,
        quirks: TrackQuirks,
        caps: SinkCapabilities,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let window = OffsetWindow::new(cfg.playhead_window);
        Self {
            cfg,
            quirks,
            caps,
            clock,
            device: TrackerDevice::default(),
            head: WrapCounter::new(),
            pause_offset: 0,
            end_of_stream: None,
            resume_time_us: 0,
            latency_query_enabled: caps.latency_query,
            timestamp_frames: WrapCounter::new(),
            timestamp: None,
            timestamp_valid: false,
            window,
            last_playhead_sample_us: 0,
            last_timestamp_sample_us: 0,
            latency_us: 0,
        }
    }

    /// Start tracking a freshly opened device. All counters restart from zero.
    pub fn attach(&mut self, device: TrackerDevice) {
        self.device = device;
        self.clear_counters();
    }

    /// Forget the current device.
    pub fn detach(&mut self) {
        self.device = TrackerDevice::default();
        self.clear_counters();
        self.reset_sync();
        self.latency_us = 0;
    }

    fn clear_counters(&mut self) {
        self.head.reset();
        self.pause_offset = 0;
        self.end_of_stream = None;
        self.timestamp_frames.reset();
        self.timestamp = None;
        self.latency_query_enabled = self.caps.latency_query;
    }

    /// Drop smoothing and timestamp state, e.g. on pause.
    pub fn reset_sync(&mut self) {
        self.window.clear();
        self.last_playhead_sample_us = 0;
        self.timestamp_valid = false;
        self.timestamp = None;
        self.last_timestamp_sample_us = 0;
    }

    /// Passthrough buffer durations are only known once a bitrate has been estimated.
    pub fn set_buffer_duration_us(&mut self, buffer_duration_us: i64) {
        self.device.buffer_duration_us = buffer_duration_us;
    }

    pub fn on_play(&mut self) {
        self.resume_time_us = self.clock.now_us();
    }

    /// Whether end of stream was signaled and the device is playing out.
    pub fn is_draining(&self) -> bool {
        self.end_of_stream.is_some()
    }

    pub fn smoothed_offset_us(&self) -> i64 {
        self.window.smoothed_us()
    }

    pub fn offset_samples(&self) -> usize {
        self.window.len()
    }

    pub fn timestamp_valid(&self) -> bool {
        self.timestamp_valid
    }

    pub fn latency_us(&self) -> i64 {
        self.latency_us
    }

    /// Whether the device must be treated as holding unplayed data whatever the counters say.
    pub fn overrides_pending_data<S: OutputSink>(&self, sink: &S) -> bool {
        let state = sink.play_state();
        if self.device.passthrough_workarounds
            && state == PlayState::Paused
            && sink.raw_head_position() == 0
        {
            return true;
        }
        self.quirks.head_position_includes_latency
            && state == PlayState::Playing
            && self.clock.now_us() - self.resume_time_us < RESUME_STABILIZATION_US
    }

    /// Freeze the head position at the total submitted frames and stop the device so the
    /// remaining data plays out in full.
    pub fn handle_end_of_stream<S: OutputSink>(&mut self, sink: &mut S, submitted_frames: i64) {
        let stop_frames = self.head_position(sink);
        self.end_of_stream = Some(EndOfStream {
            stop_time_us: self.clock.now_us(),
            stop_frames,
            end_frames: submitted_frames.max(0) as u64,
        });
        tracing::info!(stop_frames, submitted_frames, "end of stream, stopping device");
        sink.stop();
    }

    /// Promoted head position in frames.
    pub fn head_position<S: OutputSink>(&mut self, sink: &S) -> u64 {
        if let Some(eos) = self.end_of_stream {
            let elapsed_us = (self.clock.now_us() - eos.stop_time_us).max(0);
            let since_stop = us_to_frames(elapsed_us, self.device.sample_rate).max(0) as u64;
            return eos.end_frames.min(eos.stop_frames + since_stop);
        }

        let state = sink.play_state();
        if state == PlayState::Stopped {
            return 0;
        }

        let raw = u64::from(sink.raw_head_position());
        if self.quirks.head_position_includes_latency {
            let raw = self.remove_latency_from_head(sink, state, raw);
            return self.head.advance_tolerant(raw);
        }

        let mut raw = raw;
        if self.device.passthrough_workarounds {
            // Paused passthrough devices reset their counter to zero.
            if state == PlayState::Paused && raw == 0 {
                self.pause_offset = self.head.last_raw();
            }
            raw += self.pause_offset;
        }
        self.head.advance(raw)
    }

    fn remove_latency_from_head<S: OutputSink>(&self, sink: &S, state: PlayState, raw: u64) -> u64 {
        let mut head = i64::from(raw as u32 as i32);
        if state == PlayState::Playing || (state == PlayState::Paused && head != 0) {
            head += self.software_latency_frames(sink);
        }
        if head < 0 && self.clock.now_us() - self.resume_time_us < RESUME_STABILIZATION_US {
            tracing::debug!(head, "negative head position while stabilizing, clamping to 0");
            head = 0;
        }
        u64::from(head as u32)
    }

    fn software_latency_frames<S: OutputSink>(&self, sink: &S) -> i64 {
        if !self.caps.latency_query {
            return 0;
        }
        sink.latency_ms()
            .map(|ms| ms * i64::from(self.device.sample_rate / 1000))
            .unwrap_or(0)
    }

    pub fn head_position_us<S: OutputSink>(&mut self, sink: &S) -> i64 {
        let frames = self.head_position(sink);
        frames_to_us(i64::try_from(frames).unwrap_or(i64::MAX), self.device.sample_rate)
    }

    /// Read a fresh hardware timestamp. Returns whether one was available.
    fn update_timestamp<S: OutputSink>(&mut self, sink: &mut S) -> bool {
        if !self.caps.timestamp_query {
            return false;
        }
        let Some(ts) = sink.timestamp() else {
            return false;
        };
        let frames = self.timestamp_frames.advance(u64::from(ts.frame_position));
        self.timestamp = Some(PresentedFrame {
            frames: i64::try_from(frames).unwrap_or(i64::MAX),
            time_us: ts.nano_time / 1_000,
        });
        true
    }

    /// Take new playhead, timestamp and latency samples when their intervals have elapsed.
    pub fn maybe_sample<S: OutputSink>(&mut self, sink: &mut S) -> Result<()> {
        let head_us = self.head_position_us(sink);
        if head_us == 0 {
            // Nothing has been output yet.
            return Ok(());
        }
        let now_us = self.clock.now_us();
        if now_us - self.last_playhead_sample_us >= self.cfg.playhead_sample_interval_us {
            let smoothed = self.window.push(head_us - now_us);
            self.last_playhead_sample_us = now_us;
            tracing::trace!(head_us, smoothed_offset_us = smoothed, "playhead sampled");
        }

        if self.device.passthrough_workarounds {
            // Timestamps and latencies are wrong on these devices.
            return Ok(());
        }

        if now_us - self.last_timestamp_sample_us < self.cfg.timestamp_sample_interval_us {
            return Ok(());
        }
        let checked = if self.update_timestamp(sink) {
            let checked = self.check_timestamp(now_us, head_us);
            if !matches!(checked, Ok(true)) {
                self.timestamp = None;
            }
            checked
        } else {
            Ok(false)
        };
        // A rejected sample is never trusted, even when the rejection is an error.
        self.timestamp_valid = matches!(checked, Ok(true));
        self.sample_latency(sink);
        self.last_timestamp_sample_us = now_us;
        checked.map(|_| ())
    }

    fn check_timestamp(&self, now_us: i64, head_us: i64) -> Result<bool> {
        let Some(ts) = self.timestamp else {
            return Ok(false);
        };
        if ts.time_us < self.resume_time_us {
            tracing::warn!(
                timestamp_us = ts.time_us,
                resume_us = self.resume_time_us,
                "timestamp predates the most recent resume"
            );
            return Ok(false);
        }
        let max = self.cfg.max_timestamp_offset_us;
        let frame_us = frames_to_us(ts.frames, self.device.sample_rate);
        let reason = if (ts.time_us - now_us).abs() > max {
            "system clock mismatch"
        } else if (frame_us - head_us).abs() > max {
            "frame position mismatch"
        } else {
            return Ok(true);
        };
        let message = format!(
            "{reason}: {}, {}, {now_us}, {head_us}",
            ts.frames, ts.time_us
        );
        match self.cfg.spurious_timestamp_policy {
            SpuriousTimestampPolicy::Abort => Err(Error::SpuriousTimestamp(message)),
            SpuriousTimestampPolicy::Discard => {
                tracing::warn!("spurious audio timestamp: {message}");
                Ok(false)
            }
        }
    }

    fn sample_latency<S: OutputSink>(&mut self, sink: &S) {
        if let Some(latency_us) = self.quirks.latency_override_us {
            self.latency_us = latency_us;
            return;
        }
        if !self.latency_query_enabled {
            return;
        }
        let Some(latency_ms) = sink.latency_ms() else {
            tracing::debug!("latency query unavailable, disabling");
            self.latency_query_enabled = false;
            return;
        };
        // Exclude the device buffer, leaving mixer and driver latency.
        let latency_us = (latency_ms * 1_000 - self.device.buffer_duration_us).max(0);
        if latency_us > self.cfg.max_latency_us {
            tracing::warn!(latency_us, "ignoring impossibly large audio latency");
            self.latency_us = 0;
        } else {
            self.latency_us = latency_us;
        }
    }

    /// Position relative to the start of the media timeline.
    ///
    /// `source_ended` skips the latency compensation once no more data will arrive.
    pub fn position_us<S: OutputSink>(
        &mut self,
        sink: &mut S,
        start_media_time_us: i64,
        source_ended: bool,
        timestamp_only: bool,
    ) -> Result<i64> {
        if timestamp_only {
            return Ok(self.timestamp_only_position_us(sink, start_media_time_us));
        }
        if sink.play_state() == PlayState::Playing {
            self.maybe_sample(sink)?;
        }

        let now_us = self.clock.now_us();
        if self.timestamp_valid {
            if let Some(ts) = self.timestamp {
                // How long ago the timestamp was presented (negative if in the future).
                let frames_since = us_to_frames(now_us - ts.time_us, self.device.sample_rate);
                let frame = ts.frames + frames_since;
                return Ok(frames_to_us(frame, self.device.sample_rate) + start_media_time_us);
            }
        }

        let mut position_us = if self.window.is_empty() {
            self.head_position_us(sink) + start_media_time_us
        } else {
            // The head counter is coarse, so report the clock plus the smoothed offset.
            now_us + self.window.smoothed_us() + start_media_time_us
        };
        if !source_ended {
            position_us -= self.latency_us;
        }
        Ok(position_us)
    }

    fn timestamp_only_position_us<S: OutputSink>(&mut self, sink: &mut S, start_us: i64) -> i64 {
        self.timestamp_valid = self.update_timestamp(sink);
        match self.timestamp {
            Some(ts) => {
                let elapsed_us = self.clock.now_us() - ts.time_us;
                frames_to_us(ts.frames, self.device.sample_rate) + elapsed_us + start_us
            }
            None => start_us,
        }
    }
}
