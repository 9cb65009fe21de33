//! Session lifecycle and the caller-facing track API.
//!
//! An [`AudioTrack`] owns at most one open device instance at a time. `reset` detaches
//! the device synchronously and releases it on a worker thread; the next `open` waits
//! on a [`ReleaseGate`] until that release has finished, so two device instances are
//! never live for the same track.

use std::sync::Arc;

use crate::clock::{Clock, MonotonicClock};
use crate::config::{SessionConfig, TrackConfig, TrackQuirks, select_buffer_size};
use crate::error::{Error, Result};
use crate::format::{ChannelLayout, Encoding};
use crate::gate::ReleaseGate;
use crate::pacer::{PacerMode, SubmitResult, SyncState, WritePacer};
use crate::position::{PositionTracker, TrackerDevice};
use crate::release::ReleaseWorker;
use crate::sink::{
    OutputSink, PlayState, SessionId, SinkCapabilities, SinkConfig, SinkProvider, SinkState,
};
use crate::status::TrackStatus;

/// Streaming audio output with position tracking.
///
/// Driven from a single owner thread; only device release runs elsewhere.
pub struct AudioTrack<P: SinkProvider> {
    provider: P,
    cfg: TrackConfig,
    quirks: TrackQuirks,
    caps: SinkCapabilities,

    session: Option<SessionConfig>,
    sink: Option<P::Sink>,
    keep_alive: Option<P::Sink>,
    session_id: Option<SessionId>,

    tracker: PositionTracker,
    pacer: WritePacer,
    volume: f32,

    gate: ReleaseGate,
    releaser: ReleaseWorker<P::Sink>,
}

impl<P: SinkProvider> AudioTrack<P> {
    pub fn new(provider: P, cfg: TrackConfig, quirks: TrackQuirks) -> Self {
        Self::with_clock(provider, cfg, quirks, Arc::new(MonotonicClock::new()))
    }

    /// Build a track reading time from `clock`. Hardware timestamps must share its timebase.
    pub fn with_clock(
        provider: P,
        cfg: TrackConfig,
        quirks: TrackQuirks,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let caps = provider.capabilities();
        tracing::debug!(?caps, ?quirks, "audio track created");
        let tracker = PositionTracker::new(cfg.clone(), quirks.clone(), caps, clock);
        let pacer = WritePacer::new(caps, cfg.resync_tolerance_us);
        Self {
            provider,
            cfg,
            quirks,
            caps,
            session: None,
            sink: None,
            keep_alive: None,
            session_id: None,
            tracker,
            pacer,
            volume: 1.0,
            gate: ReleaseGate::new(),
            releaser: ReleaseWorker::spawn(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn capabilities(&self) -> SinkCapabilities {
        self.caps
    }

    pub fn session_config(&self) -> Option<&SessionConfig> {
        self.session.as_ref()
    }

    /// Whether a device is open and not yet reset.
    pub fn is_initialized(&self) -> bool {
        self.sink.is_some()
    }

    /// Whether content of type `mime` can be played through the device undecoded.
    pub fn is_passthrough_supported(&self, mime: &str) -> bool {
        self.provider
            .select_encoding(mime)
            .is_some_and(|encoding| self.provider.passthrough_supported(encoding))
    }

    /// Set the output format.
    ///
    /// A no-op when a device is open with the same rate, layout and encoding. Otherwise the
    /// open device is reset and the session parameters are recomputed; `open` must follow.
    /// `buffer_size` overrides the computed device buffer size in bytes.
    pub fn configure(
        &mut self,
        channels: u16,
        sample_rate: u32,
        mime: &str,
        passthrough: bool,
        buffer_size: Option<usize>,
    ) -> Result<()> {
        let layout = ChannelLayout::from_count(channels)?;
        let encoding = if passthrough {
            self.provider
                .select_encoding(mime)
                .ok_or_else(|| Error::UnsupportedEncoding(mime.to_string()))?
        } else {
            Encoding::Pcm16
        };
        tracing::info!(channels, sample_rate, mime, ?encoding, passthrough, "configure");

        if self.is_initialized() {
            if let Some(session) = &self.session {
                if session.same_format(sample_rate, layout, encoding) {
                    return Ok(());
                }
            }
        }

        self.reset();

        let frame_size = 2 * usize::from(channels);
        let min_buffer_size = self
            .provider
            .min_buffer_size(sample_rate, layout, encoding)?;
        if min_buffer_size == 0 {
            return Err(Error::InvalidBufferSize {
                sample_rate,
                channels,
            });
        }
        let buffer_size = match buffer_size {
            Some(size) if size > 0 => size,
            _ => select_buffer_size(&self.cfg, min_buffer_size, sample_rate, frame_size),
        };
        tracing::info!(buffer_size, min_buffer_size, frame_size, sample_rate, "track reconfigured");

        self.pacer.clear_bitrate();
        self.session = Some(SessionConfig {
            sample_rate,
            layout,
            encoding,
            passthrough,
            frame_size,
            min_buffer_size,
            buffer_size,
        });
        Ok(())
    }

    /// Open a device for the configured format, joining `session_id` when given.
    ///
    /// Blocks until any release started by [`AudioTrack::reset`] has completed. Returns the
    /// session of the new device.
    pub fn open(&mut self, session_id: Option<SessionId>) -> Result<SessionId> {
        if self.is_initialized() {
            self.reset();
        }
        self.gate.wait();

        let session = self.session.clone().ok_or(Error::NotConfigured)?;
        let timestamp_only = timestamp_only(&self.quirks, &session);
        let config = SinkConfig {
            sample_rate: session.sample_rate,
            layout: session.layout,
            encoding: session.encoding,
            buffer_size: session.buffer_size,
            timestamp_only,
        };
        tracing::info!(?session_id, timestamp_only, "opening device");

        let mut sink = self.provider.open(&config, session_id)?;
        let state = sink.state();
        if state != SinkState::Initialized {
            // The half-open device still holds resources.
            sink.release();
            return Err(Error::DeviceInitFailed {
                state,
                sample_rate: session.sample_rate,
                channels: session.channels(),
                buffer_size: session.buffer_size,
            });
        }

        let session_id = sink.session_id();
        if self.quirks.keep_session_alive {
            self.keep_session_alive(session_id);
        }

        self.tracker.attach(TrackerDevice {
            sample_rate: session.sample_rate,
            buffer_duration_us: buffer_duration_us(&session, self.pacer.bitrate_kbps()),
            passthrough_workarounds: passthrough_workarounds(&self.quirks, &session),
        });
        sink.set_volume(self.volume);
        self.sink = Some(sink);
        self.session_id = Some(session_id);
        tracing::info!(session_id, "device opened");
        Ok(session_id)
    }

    fn keep_session_alive(&mut self, session_id: SessionId) {
        if let Some(keep_alive) = self.keep_alive.take_if(|k| k.session_id() != session_id) {
            self.releaser.release_keep_alive(keep_alive);
        }
        if self.keep_alive.is_some() {
            return;
        }
        match self.provider.open(&SinkConfig::keep_alive(), Some(session_id)) {
            Ok(mut keep_alive) if keep_alive.state() != SinkState::Initialized => {
                tracing::warn!(session_id, state = ?keep_alive.state(), "keep-alive device not initialized");
                keep_alive.release();
            }
            Ok(keep_alive) => {
                tracing::debug!(session_id, "keep-alive device opened");
                self.keep_alive = Some(keep_alive);
            }
            Err(e) => tracing::warn!(session_id, "keep-alive open failed: {e}"),
        }
    }

    /// Start or resume playback.
    pub fn play(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            tracing::info!("play");
            self.tracker.on_play();
            sink.play();
        }
    }

    /// Pause playback. A device playing out after end of stream keeps playing.
    pub fn pause(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            tracing::info!("pause");
            self.tracker.reset_sync();
            if !self.tracker.is_draining() {
                sink.pause();
            }
        }
    }

    /// Mark the next buffer as not continuing the previous one.
    pub fn signal_discontinuity(&mut self) {
        self.pacer.signal_discontinuity();
    }

    /// Write as much of `buffer` as the device accepts without blocking.
    ///
    /// `presentation_time_us` is the presentation time of the buffer's last sample. Until
    /// the result reports [`SubmitResult::consumed`], call again with the same buffer.
    pub fn submit(&mut self, buffer: &[u8], presentation_time_us: i64) -> Result<SubmitResult> {
        let (Some(sink), Some(session)) = (self.sink.as_mut(), self.session.as_ref()) else {
            return Err(Error::NotInitialized);
        };
        let mode = PacerMode {
            passthrough_workarounds: passthrough_workarounds(&self.quirks, session),
            timestamp_only: timestamp_only(&self.quirks, session),
        };
        self.pacer.submit(
            sink,
            &mut self.tracker,
            session,
            mode,
            buffer,
            presentation_time_us,
        )
    }

    /// Play out everything submitted so far, then stop.
    pub fn signal_end_of_stream(&mut self) {
        let (Some(sink), Some(session)) = (self.sink.as_mut(), self.session.as_ref()) else {
            return;
        };
        if timestamp_only(&self.quirks, session) {
            tracing::info!("end of stream, stopping device");
            sink.stop();
        } else {
            let submitted = self.pacer.submitted_frames(session);
            self.tracker.handle_end_of_stream(sink, submitted);
        }
    }

    /// Whether submitted audio is still waiting to be played.
    pub fn has_pending_data(&mut self) -> bool {
        let (Some(sink), Some(session)) = (self.sink.as_ref(), self.session.as_ref()) else {
            return false;
        };
        if timestamp_only(&self.quirks, session) {
            // Buffering is opaque on these devices.
            return true;
        }
        let submitted = self.pacer.submitted_frames(session);
        let head = i64::try_from(self.tracker.head_position(sink)).unwrap_or(i64::MAX);
        submitted > head || self.tracker.overrides_pending_data(sink)
    }

    /// Playback position on the media timeline, or `None` before the first buffer.
    ///
    /// `source_ended` skips the latency compensation once no more data will be submitted.
    pub fn get_position_us(&mut self, source_ended: bool) -> Result<Option<i64>> {
        let (Some(sink), Some(session)) = (self.sink.as_mut(), self.session.as_ref()) else {
            return Ok(None);
        };
        if self.pacer.sync_state() == SyncState::NotSet {
            return Ok(None);
        }
        self.tracker
            .set_buffer_duration_us(buffer_duration_us(session, self.pacer.bitrate_kbps()));
        let position_us = self.tracker.position_us(
            sink,
            self.pacer.start_media_time_us(),
            source_ended,
            timestamp_only(&self.quirks, session),
        )?;
        tracing::trace!(position_us, "position");
        Ok(Some(position_us))
    }

    /// Set the output gain. Re-applied to every device opened later.
    pub fn set_volume(&mut self, gain: f32) {
        if self.volume == gain {
            return;
        }
        tracing::info!(gain, "set volume");
        self.volume = gain;
        if let Some(sink) = self.sink.as_mut() {
            sink.set_volume(gain);
        }
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Detach the device and release it in the background. Idempotent.
    ///
    /// `open` may be called right away; it waits for the release to finish.
    pub fn reset(&mut self) {
        let Some(mut sink) = self.sink.take() else {
            return;
        };
        tracing::info!(session_id = ?self.session_id, "reset");
        self.pacer.reset();
        self.tracker.detach();
        self.session_id = None;
        if sink.play_state() == PlayState::Playing {
            sink.pause();
        }
        self.releaser.release_device(sink, &self.gate);
    }

    /// Reset and drop the session keep-alive device.
    pub fn release(&mut self) {
        self.reset();
        if let Some(keep_alive) = self.keep_alive.take() {
            tracing::info!(session_id = keep_alive.session_id(), "releasing keep-alive device");
            self.releaser.release_keep_alive(keep_alive);
        }
    }

    /// Diagnostic snapshot.
    pub fn status(&self) -> TrackStatus {
        let sync_state = self.pacer.sync_state();
        TrackStatus {
            initialized: self.is_initialized(),
            session_id: self.session_id,
            play_state: self.sink.as_ref().map(|s| s.play_state()),
            sample_rate: self.session.as_ref().map(|s| s.sample_rate),
            channels: self.session.as_ref().map(|s| s.channels()),
            encoding: self.session.as_ref().map(|s| s.encoding),
            passthrough: self.session.as_ref().is_some_and(|s| s.passthrough),
            buffer_size: self.session.as_ref().map(|s| s.buffer_size),
            submitted_bytes: self.pacer.submitted_bytes(),
            sync_state,
            start_media_time_us: (sync_state != SyncState::NotSet)
                .then(|| self.pacer.start_media_time_us()),
            smoothed_offset_us: self.tracker.smoothed_offset_us(),
            offset_samples: self.tracker.offset_samples(),
            timestamp_valid: self.tracker.timestamp_valid(),
            latency_us: self.tracker.latency_us(),
            bitrate_kbps: self.pacer.bitrate_kbps(),
            draining: self.tracker.is_draining(),
        }
    }
}

impl<P: SinkProvider> Drop for AudioTrack<P> {
    fn drop(&mut self) {
        self.release();
    }
}

fn buffer_duration_us(session: &SessionConfig, bitrate_kbps: Option<u32>) -> i64 {
    session.frames_to_us(session.bytes_to_frames(session.buffer_size as u64, bitrate_kbps))
}

fn timestamp_only(quirks: &TrackQuirks, session: &SessionConfig) -> bool {
    quirks.timestamp_only_passthrough && session.passthrough
}

/// The AC-3 family pause and stop defects only affect passthrough sessions.
fn passthrough_workarounds(quirks: &TrackQuirks, session: &SessionConfig) -> bool {
    quirks.passthrough_workarounds && session.passthrough && session.encoding.is_ac3_family()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::fake::FakeProvider;
    use crate::pacer::{RESULT_BUFFER_CONSUMED, RESULT_POSITION_DISCONTINUITY};

    const RATE: u32 = 48_000;
    /// 10 ms of 48 kHz stereo PCM16.
    const CHUNK: usize = 1_920;

    fn track_with(
        provider: FakeProvider,
        quirks: TrackQuirks,
    ) -> (AudioTrack<FakeProvider>, ManualClock) {
        let clock = ManualClock::new(1_000_000);
        let track = AudioTrack::with_clock(
            provider,
            TrackConfig::default(),
            quirks,
            Arc::new(clock.clone()),
        );
        (track, clock)
    }

    fn open_pcm(provider: FakeProvider) -> (AudioTrack<FakeProvider>, ManualClock) {
        let (mut track, clock) = track_with(provider, TrackQuirks::default());
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        track.open(None).unwrap();
        (track, clock)
    }

    #[test]
    fn open_requires_configuration() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        assert!(matches!(track.open(None), Err(Error::NotConfigured)));
        assert!(!track.is_initialized());
    }

    #[test]
    fn configure_rejects_bad_formats() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        assert!(matches!(
            track.configure(3, RATE, "audio/raw", false, None),
            Err(Error::UnsupportedChannelCount(3))
        ));
        assert!(matches!(
            track.configure(2, RATE, "audio/mpeg", true, None),
            Err(Error::UnsupportedEncoding(_))
        ));
        let mut provider = FakeProvider::modern();
        provider.min_buffer_size = 0;
        let (mut track, _) = track_with(provider, TrackQuirks::default());
        assert!(matches!(
            track.configure(2, RATE, "audio/raw", false, None),
            Err(Error::InvalidBufferSize { .. })
        ));
    }

    #[test]
    fn configure_selects_buffer_size_unless_overridden() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        let session = track.session_config().unwrap();
        assert_eq!(session.frame_size, 4);
        assert_eq!(session.min_buffer_size, 16_384);
        assert_eq!(session.buffer_size, 65_536);

        track.configure(2, RATE, "audio/raw", false, Some(10_000)).unwrap();
        assert_eq!(track.session_config().unwrap().buffer_size, 10_000);
    }

    #[test]
    fn configure_with_same_format_keeps_open_device() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        assert!(track.is_initialized());
        assert_eq!(track.provider().opened.len(), 1);

        track.configure(2, 44_100, "audio/raw", false, None).unwrap();
        assert!(!track.is_initialized());
        track.gate.wait();
        assert!(track.provider().opened[0].lock().released);
    }

    #[test]
    fn open_passes_device_config_and_returns_session() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        track.set_volume(0.5);
        track.configure(6, 44_100, "audio/raw", false, None).unwrap();
        assert_eq!(track.open(None).unwrap(), 101);
        let dev = track.provider().last();
        let dev = dev.lock();
        assert_eq!(dev.config.sample_rate, 44_100);
        assert_eq!(dev.config.layout, ChannelLayout::Surround51);
        assert_eq!(dev.config.encoding, Encoding::Pcm16);
        assert!(!dev.config.timestamp_only);
        assert_eq!(dev.volume, 0.5);
        drop(dev);

        track.reset();
        assert_eq!(track.open(Some(42)).unwrap(), 42);
    }

    #[test]
    fn failed_init_releases_half_open_device() {
        let mut provider = FakeProvider::modern();
        provider.init_state = SinkState::Uninitialized;
        let (mut track, _) = track_with(provider, TrackQuirks::default());
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        let err = track.open(None).unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceInitFailed {
                state: SinkState::Uninitialized,
                sample_rate: RATE,
                channels: 2,
                buffer_size: 65_536,
            }
        ));
        assert!(!track.is_initialized());
        assert!(track.provider().last().lock().released);
        assert_eq!(track.provider().live.live(), 0);
    }

    #[test]
    fn submit_requires_open_device() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        assert!(matches!(
            track.submit(&[0; CHUNK], 10_000),
            Err(Error::NotInitialized)
        ));
    }

    #[test]
    fn position_unavailable_until_first_buffer() {
        let (mut track, clock) = open_pcm(FakeProvider::modern());
        assert_eq!(track.get_position_us(false).unwrap(), None);

        track.play();
        let result = track.submit(&[0; CHUNK], 510_000).unwrap();
        assert_eq!(result.bits(), RESULT_BUFFER_CONSUMED);
        // Nothing played yet: the raw head position plus the start time.
        assert_eq!(track.get_position_us(false).unwrap(), Some(500_000));

        track.provider().last().lock().head = 4_800;
        clock.advance_us(100_000);
        assert_eq!(track.get_position_us(true).unwrap(), Some(600_000));
    }

    #[test]
    fn position_does_not_decrease_while_playing() {
        let (mut track, clock) = open_pcm(FakeProvider::legacy());
        let dev = track.provider().last();
        track.play();
        let mut pts = 0;
        let mut last = i64::MIN;
        for step in 0..100 {
            pts += 10_000;
            track.submit(&[0; CHUNK], pts).unwrap();
            clock.advance_us(10_000);
            dev.lock().head = 480 * (step + 1);
            if let Some(pos) = track.get_position_us(false).unwrap() {
                assert!(pos >= last, "step {step}: {pos} < {last}");
                last = pos;
            }
        }
        assert!(last > 0);
    }

    #[test]
    fn discontinuity_bits_flow_through_submit() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.submit(&[0; CHUNK], 10_000).unwrap();
        track.signal_discontinuity();
        let result = track.submit(&[0; CHUNK], 1_000_000).unwrap();
        assert_eq!(
            result.bits(),
            RESULT_POSITION_DISCONTINUITY | RESULT_BUFFER_CONSUMED
        );
        assert_eq!(track.status().start_media_time_us, Some(980_000));
    }

    #[test]
    fn reset_is_idempotent_and_pauses_playing_device() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.reset();
        track.play();
        assert!(!track.is_initialized());

        track.open(None).unwrap();
        track.play();
        track.submit(&[0; CHUNK], 10_000).unwrap();
        let dev = track.provider().last();
        track.reset();
        track.reset();
        track.gate.wait();
        let d = dev.lock();
        assert_eq!(d.play_state, PlayState::Paused);
        assert!(d.flushed);
        assert!(d.released);
        drop(d);

        let status = track.status();
        assert_eq!(status.submitted_bytes, 0);
        assert_eq!(status.sync_state, SyncState::NotSet);
        assert_eq!(track.get_position_us(false).unwrap(), None);
    }

    #[test]
    fn reopen_waits_for_background_release() {
        let mut provider = FakeProvider::modern();
        provider.release_delay = Duration::from_millis(40);
        let (mut track, _) = open_pcm(provider);
        for _ in 0..5 {
            track.reset();
            track.open(None).unwrap();
            track.submit(&[0; CHUNK], 10_000).unwrap();
        }
        assert_eq!(track.provider().live.max_live(), 1);
        assert_eq!(track.provider().opened.len(), 6);
    }

    #[test]
    fn open_while_open_replaces_the_device() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.open(None).unwrap();
        assert_eq!(track.provider().opened.len(), 2);
        assert!(track.provider().opened[0].lock().released);
        assert_eq!(track.provider().live.max_live(), 1);
    }

    #[test]
    fn keep_alive_device_pins_session_until_release() {
        let quirks = TrackQuirks {
            keep_session_alive: true,
            ..TrackQuirks::default()
        };
        let (mut track, _) = track_with(FakeProvider::modern(), quirks);
        track.configure(2, RATE, "audio/raw", false, None).unwrap();
        let session = track.open(None).unwrap();
        assert_eq!(track.provider().keep_alives.len(), 1);

        // Same session: the keep-alive device is reused.
        track.reset();
        track.open(Some(session)).unwrap();
        assert_eq!(track.provider().keep_alives.len(), 1);

        // New session: the old keep-alive is replaced.
        track.reset();
        track.open(None).unwrap();
        assert_eq!(track.provider().keep_alives.len(), 2);

        track.release();
        assert!(track.keep_alive.is_none());
        assert!(!track.is_initialized());
        let first = track.provider().keep_alives[0].clone();
        let second = track.provider().keep_alives[1].clone();
        drop(track);
        assert!(first.lock().released);
        assert!(second.lock().released);
    }

    #[test]
    fn end_of_stream_plays_out_and_ignores_pause() {
        let (mut track, clock) = open_pcm(FakeProvider::modern());
        let dev = track.provider().last();
        track.play();
        // 100 ms submitted, 50 ms played.
        for i in 1..=10 {
            track.submit(&[0; CHUNK], i * 10_000).unwrap();
        }
        dev.lock().head = 2_400;
        assert!(track.has_pending_data());

        track.signal_end_of_stream();
        assert_eq!(dev.lock().play_state, PlayState::Stopped);
        track.pause();
        assert_eq!(dev.lock().play_state, PlayState::Stopped);
        assert!(track.status().draining);

        clock.advance_us(30_000);
        assert!(track.has_pending_data());
        clock.advance_us(30_000);
        assert!(!track.has_pending_data());
    }

    #[test]
    fn pending_data_without_device_is_false() {
        let (mut track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        assert!(!track.has_pending_data());
    }

    #[test]
    fn timestamp_only_passthrough_profile() {
        let quirks = TrackQuirks {
            timestamp_only_passthrough: true,
            ..TrackQuirks::default()
        };
        let (mut track, _) = track_with(FakeProvider::modern(), quirks);
        track.configure(6, RATE, "audio/eac3", true, None).unwrap();
        track.open(None).unwrap();
        let dev = track.provider().last();
        assert!(dev.lock().config.timestamp_only);
        assert!(track.has_pending_data());

        track.submit(&[0; 1_792], 400_000).unwrap();
        assert_eq!(track.get_position_us(false).unwrap(), Some(400_000));
        track.play();
        track.signal_end_of_stream();
        assert_eq!(dev.lock().play_state, PlayState::Stopped);
        assert!(!track.status().draining);
    }

    #[test]
    fn passthrough_latency_excludes_buffer_once_bitrate_is_known() {
        let (mut track, clock) = track_with(FakeProvider::modern(), TrackQuirks::default());
        track.configure(6, RATE, "audio/ac3", true, Some(65_536)).unwrap();
        track.open(None).unwrap();
        let dev = track.provider().last();
        dev.lock().latency_ms = Some(300);
        track.play();

        track.submit(&[0; 1_536], 32_000).unwrap();
        assert_eq!(track.status().bitrate_kbps, Some(384));
        clock.advance_us(10_000);
        dev.lock().head = 480;
        track.get_position_us(false).unwrap();
        // 65536 bytes at 384 kbit/s is ~1.37 s of buffer, more than the reported 300 ms.
        assert_eq!(track.status().latency_us, 0);
    }

    #[test]
    fn volume_is_applied_on_change_and_reopen() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.set_volume(0.25);
        assert_eq!(track.provider().last().lock().volume, 0.25);
        track.reset();
        track.open(None).unwrap();
        assert_eq!(track.provider().last().lock().volume, 0.25);
        assert_eq!(track.volume(), 0.25);
    }

    #[test]
    fn passthrough_support_follows_provider() {
        let (track, _) = track_with(FakeProvider::modern(), TrackQuirks::default());
        assert!(track.is_passthrough_supported("audio/ac3"));
        assert!(track.is_passthrough_supported("audio/vnd.dts"));
        assert!(!track.is_passthrough_supported("audio/mpeg"));
    }

    #[test]
    fn status_reports_session_and_timeline() {
        let (mut track, _) = open_pcm(FakeProvider::modern());
        track.play();
        track.submit(&[0; CHUNK], 260_000).unwrap();
        let status = track.status();
        assert!(status.initialized);
        assert_eq!(status.session_id, Some(101));
        assert_eq!(status.play_state, Some(PlayState::Playing));
        assert_eq!(status.sample_rate, Some(RATE));
        assert_eq!(status.channels, Some(2));
        assert_eq!(status.buffer_size, Some(65_536));
        assert_eq!(status.submitted_bytes, CHUNK as u64);
        assert_eq!(status.sync_state, SyncState::InSync);
        assert_eq!(status.start_media_time_us, Some(250_000));
    }
}
