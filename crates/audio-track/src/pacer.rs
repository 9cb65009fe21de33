//! Write pacing and timeline synchronization.
//!
//! A submitted buffer is staged once, then written across as many `submit` calls as it
//! takes without blocking the caller. The first chunk of each buffer also drives the
//! start-time state machine that detects gaps in the presentation timeline.

use serde::Serialize;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::position::PositionTracker;
use crate::sink::{OutputSink, PlayState, SinkCapabilities, WriteMode};

/// Bit set in [`SubmitResult::bits`] when the buffer was discontinuous.
pub const RESULT_POSITION_DISCONTINUITY: u32 = 1;
/// Bit set in [`SubmitResult::bits`] when the buffer was fully written.
pub const RESULT_BUFFER_CONSUMED: u32 = 2;

/// Timeline synchronization state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum SyncState {
    /// No buffer written on the current device yet.
    #[default]
    NotSet,
    InSync,
    /// The next buffer re-anchors the start time.
    NeedSync,
}

/// Outcome of one [`crate::AudioTrack::submit`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmitResult {
    /// The whole buffer has been written and may be reused by the caller.
    pub consumed: bool,
    /// The buffer did not continue the previous timeline.
    pub discontinuity: bool,
}

impl SubmitResult {
    pub fn bits(self) -> u32 {
        let mut bits = 0;
        if self.discontinuity {
            bits |= RESULT_POSITION_DISCONTINUITY;
        }
        if self.consumed {
            bits |= RESULT_BUFFER_CONSUMED;
        }
        bits
    }
}

/// Policy flags evaluated per submit.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct PacerMode {
    /// Suppress writes while paused, and while stopped with a stale head counter.
    pub passthrough_workarounds: bool,
    /// Anchor on the first buffer only and write without throttling.
    pub timestamp_only: bool,
}

/// A buffer in flight.
#[derive(Clone, Copy, Debug)]
struct Staged {
    len: usize,
    written: usize,
    /// Bytes live in the pacer's scratch copy rather than the caller's buffer.
    copied: bool,
}

impl Staged {
    fn remaining(&self) -> usize {
        self.len - self.written
    }
}

pub(crate) struct WritePacer {
    caps: SinkCapabilities,
    resync_tolerance_us: i64,
    submitted_bytes: u64,
    sync: SyncState,
    start_media_time_us: i64,
    bitrate_kbps: Option<u32>,
    staged: Option<Staged>,
    scratch: Vec<u8>,
}

impl WritePacer {
    pub fn new(caps: SinkCapabilities, resync_tolerance_us: i64) -> Self {
        Self {
            caps,
            resync_tolerance_us,
            submitted_bytes: 0,
            sync: SyncState::NotSet,
            start_media_time_us: 0,
            bitrate_kbps: None,
            staged: None,
            scratch: Vec::new(),
        }
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn start_media_time_us(&self) -> i64 {
        self.start_media_time_us
    }

    pub fn submitted_bytes(&self) -> u64 {
        self.submitted_bytes
    }

    pub fn bitrate_kbps(&self) -> Option<u32> {
        self.bitrate_kbps
    }

    pub fn submitted_frames(&self, session: &SessionConfig) -> i64 {
        session.bytes_to_frames(self.submitted_bytes, self.bitrate_kbps)
    }

    /// Force a re-anchor on the next buffer, e.g. after the caller skipped one.
    pub fn signal_discontinuity(&mut self) {
        if self.sync == SyncState::InSync {
            self.sync = SyncState::NeedSync;
        }
    }

    /// Forget everything written to the current device.
    pub fn reset(&mut self) {
        self.submitted_bytes = 0;
        self.staged = None;
        self.sync = SyncState::NotSet;
    }

    /// Forget the bitrate estimate; only a new format invalidates it.
    pub fn clear_bitrate(&mut self) {
        self.bitrate_kbps = None;
    }

    pub fn submit<S: OutputSink>(
        &mut self,
        sink: &mut S,
        tracker: &mut PositionTracker,
        session: &SessionConfig,
        mode: PacerMode,
        buffer: &[u8],
        presentation_time_us: i64,
    ) -> Result<SubmitResult> {
        tracing::trace!(size = buffer.len(), presentation_time_us, "submit");
        let mut result = SubmitResult::default();
        if buffer.is_empty() {
            result.consumed = true;
            return Ok(result);
        }

        if mode.passthrough_workarounds && !mode.timestamp_only {
            match sink.play_state() {
                // Paused AC-3 devices keep playing whatever is written.
                PlayState::Paused => return Ok(result),
                // A new device reports the released one's position for a while.
                PlayState::Stopped if sink.raw_head_position() != 0 => return Ok(result),
                _ => {}
            }
        }

        let staged = match self.staged {
            Some(staged) => staged,
            None => {
                self.estimate_bitrate(session, buffer.len());
                result.discontinuity =
                    self.synchronize(session, mode, buffer.len(), presentation_time_us);
                self.stage(buffer, mode)
            }
        };

        let pending = if staged.copied {
            &self.scratch[staged.written..staged.len]
        } else {
            let end = staged.len.min(buffer.len());
            &buffer[staged.written.min(end)..end]
        };

        let written = if mode.timestamp_only || self.caps.non_blocking_write {
            sink.write(pending, WriteMode::NonBlocking)
        } else {
            // Only write what fits in the device buffer so the blocking write returns at once.
            let head_bytes = tracker.head_position(sink) as i64 * session.frame_size as i64;
            let pending_bytes = self.submitted_bytes as i64 - head_bytes;
            let writable = session.buffer_size as i64 - pending_bytes;
            if writable > 0 {
                let len = pending.len().min(writable as usize);
                sink.write(&pending[..len], WriteMode::Blocking)
            } else {
                Ok(0)
            }
        }
        .map_err(|e| Error::WriteFailed { code: e.code })?;

        let written = written.min(staged.remaining());
        tracing::trace!(requested = pending.len(), written, "device write");
        self.submitted_bytes += written as u64;
        let staged = Staged {
            written: staged.written + written,
            ..staged
        };
        if staged.remaining() == 0 {
            self.staged = None;
            result.consumed = true;
        } else {
            self.staged = Some(staged);
        }
        Ok(result)
    }

    fn estimate_bitrate(&mut self, session: &SessionConfig, size: usize) {
        if !session.passthrough || self.bitrate_kbps.is_some() {
            return;
        }
        self.bitrate_kbps = session
            .encoding
            .estimate_bitrate_kbps(size, session.sample_rate);
        if let Some(kbps) = self.bitrate_kbps {
            tracing::info!(bitrate_kbps = kbps, encoding = ?session.encoding, "passthrough bitrate");
        }
    }

    /// Advance the start-time state machine; returns whether a discontinuity was resolved.
    fn synchronize(
        &mut self,
        session: &SessionConfig,
        mode: PacerMode,
        size: usize,
        presentation_time_us: i64,
    ) -> bool {
        if mode.timestamp_only {
            // Submitted bytes say nothing about position on these devices.
            if self.sync == SyncState::NotSet {
                self.start_media_time_us = presentation_time_us;
                self.sync = SyncState::InSync;
                tracing::info!(start_media_time_us = presentation_time_us, "start time set");
            }
            return false;
        }

        // The presentation time marks the end of the buffer.
        let duration_us =
            session.frames_to_us(session.bytes_to_frames(size as u64, self.bitrate_kbps));
        let buffer_start_us = presentation_time_us - duration_us;
        if self.sync == SyncState::NotSet {
            self.start_media_time_us = buffer_start_us.max(0);
            self.sync = SyncState::InSync;
            tracing::info!(start_media_time_us = self.start_media_time_us, "start time set");
            return false;
        }

        let expected_start_us =
            self.start_media_time_us + session.frames_to_us(self.submitted_frames(session));
        if self.sync == SyncState::InSync
            && (expected_start_us - buffer_start_us).abs() > self.resync_tolerance_us
        {
            tracing::warn!(
                expected_us = expected_start_us,
                actual_us = buffer_start_us,
                "discontinuity detected"
            );
            self.sync = SyncState::NeedSync;
        }
        if self.sync == SyncState::NeedSync {
            self.start_media_time_us += buffer_start_us - expected_start_us;
            self.sync = SyncState::InSync;
            tracing::info!(start_media_time_us = self.start_media_time_us, "start time re-anchored");
            return true;
        }
        false
    }

    fn stage(&mut self, buffer: &[u8], mode: PacerMode) -> Staged {
        let copied = !self.caps.direct_write || mode.timestamp_only;
        if copied {
            self.scratch.clear();
            self.scratch.extend_from_slice(buffer);
        }
        let staged = Staged {
            len: buffer.len(),
            written: 0,
            copied,
        };
        self.staged = Some(staged);
        staged
    }
}
