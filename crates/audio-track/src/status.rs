//! Serializable diagnostic snapshot of a track.

use serde::Serialize;

use crate::format::Encoding;
use crate::pacer::SyncState;
use crate::sink::{PlayState, SessionId};

/// Diagnostic snapshot of a track, returned by [`crate::AudioTrack::status`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrackStatus {
    /// Whether a device instance is open.
    pub initialized: bool,
    /// Session of the open device.
    pub session_id: Option<SessionId>,
    /// Device transport state.
    pub play_state: Option<PlayState>,
    /// Configured output sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Configured output channel count.
    pub channels: Option<u16>,
    pub encoding: Option<Encoding>,
    pub passthrough: bool,
    /// Device buffer size in bytes.
    pub buffer_size: Option<usize>,
    /// Bytes written to the current device.
    pub submitted_bytes: u64,
    pub sync_state: SyncState,
    /// Presentation time of the first frame written, once anchored.
    pub start_media_time_us: Option<i64>,
    /// Mean of the playhead offset window.
    pub smoothed_offset_us: i64,
    /// Number of samples in the playhead offset window.
    pub offset_samples: usize,
    /// Whether the last hardware timestamp passed its sanity checks.
    pub timestamp_valid: bool,
    /// Output latency subtracted from the position estimate.
    pub latency_us: i64,
    /// Passthrough bitrate estimate in kbit/s.
    pub bitrate_kbps: Option<u32>,
    /// Whether end of stream was signaled and the device is playing out.
    pub draining: bool,
}
