//! Track thresholds, platform quirks and the per-session format description.

use serde::Serialize;

use crate::format::{ChannelLayout, Encoding, frames_to_us, us_to_frames};

/// What to do when a hardware timestamp fails a sanity check.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SpuriousTimestampPolicy {
    /// Log and drop the sample; position falls back to the smoothed estimate.
    #[default]
    Discard,
    /// Surface [`crate::Error::SpuriousTimestamp`] from the position query.
    Abort,
}

/// Timing thresholds shared by the tracker, pacer and lifecycle manager.
#[derive(Clone, Debug)]
pub struct TrackConfig {
    /// Start-time drift that flips the timeline into resync.
    pub resync_tolerance_us: i64,
    /// Max distance between a hardware timestamp and the wall clock or head position.
    pub max_timestamp_offset_us: i64,
    /// Device latencies above this are treated as bogus.
    pub max_latency_us: i64,
    /// Min interval between playhead offset samples.
    pub playhead_sample_interval_us: i64,
    /// Min interval between hardware timestamp and latency samples.
    pub timestamp_sample_interval_us: i64,
    /// Number of playhead offsets averaged into the smoothed offset.
    pub playhead_window: usize,
    /// Multiplier applied to the device minimum buffer size.
    pub buffer_multiplier: usize,
    /// Lower bound of the device buffer, in microseconds of audio.
    pub min_buffer_duration_us: i64,
    /// Upper bound of the device buffer, in microseconds of audio.
    pub max_buffer_duration_us: i64,
    pub spurious_timestamp_policy: SpuriousTimestampPolicy,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            resync_tolerance_us: 200_000,
            max_timestamp_offset_us: 5_000_000,
            max_latency_us: 5_000_000,
            playhead_sample_interval_us: 30_000,
            timestamp_sample_interval_us: 500_000,
            playhead_window: 10,
            buffer_multiplier: 4,
            min_buffer_duration_us: 250_000,
            max_buffer_duration_us: 750_000,
            spurious_timestamp_policy: SpuriousTimestampPolicy::Discard,
        }
    }
}

/// Device and platform workarounds detected outside the engine.
#[derive(Clone, Debug, Default)]
pub struct TrackQuirks {
    /// AC-3 family passthrough on a platform whose direct tracks keep playing while paused,
    /// reset their head counter on pause, and report bad timestamps and latencies.
    pub passthrough_workarounds: bool,
    /// Passthrough sessions derive position from hardware timestamps only.
    pub timestamp_only_passthrough: bool,
    /// The head counter already includes the device software latency.
    pub head_position_includes_latency: bool,
    /// Hardware latency to use instead of querying the device.
    pub latency_override_us: Option<i64>,
    /// Pin the audio session with a minimal keep-alive device across reset/open cycles.
    pub keep_session_alive: bool,
}

/// Immutable description of one open device instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub encoding: Encoding,
    pub passthrough: bool,
    /// Bytes per PCM16 frame; passthrough uses it only for buffer sizing.
    pub frame_size: usize,
    pub min_buffer_size: usize,
    pub buffer_size: usize,
}

impl SessionConfig {
    pub fn channels(&self) -> u16 {
        self.layout.channels()
    }

    /// Whether another device instance could be reused for this format.
    pub fn same_format(&self, sample_rate: u32, layout: ChannelLayout, encoding: Encoding) -> bool {
        self.sample_rate == sample_rate && self.layout == layout && self.encoding == encoding
    }

    /// Convert a byte count to frames.
    ///
    /// Passthrough streams have no fixed frame size, so frames are derived from the
    /// bitrate estimate; with no estimate yet every byte count maps to zero frames.
    pub fn bytes_to_frames(&self, bytes: u64, bitrate_kbps: Option<u32>) -> i64 {
        if self.passthrough {
            match bitrate_kbps {
                Some(kbps) if kbps > 0 => {
                    let frames = u128::from(bytes) * 8 * u128::from(self.sample_rate)
                        / (1000 * u128::from(kbps));
                    i64::try_from(frames).unwrap_or(i64::MAX)
                }
                _ => 0,
            }
        } else if self.frame_size == 0 {
            0
        } else {
            i64::try_from(bytes / self.frame_size as u64).unwrap_or(i64::MAX)
        }
    }

    pub fn frames_to_us(&self, frames: i64) -> i64 {
        frames_to_us(frames, self.sample_rate)
    }
}

/// Pick the device buffer size in bytes.
///
/// Uses a multiple of the device minimum, clamped between the configured min/max buffer
/// durations. The upper bound never drops below the device minimum.
pub fn select_buffer_size(
    cfg: &TrackConfig,
    min_buffer_size: usize,
    sample_rate: u32,
    frame_size: usize,
) -> usize {
    let multiplied = min_buffer_size.saturating_mul(cfg.buffer_multiplier);
    let frames_for = |us: i64| us_to_frames(us, sample_rate).max(0) as usize;
    let lower = frames_for(cfg.min_buffer_duration_us).saturating_mul(frame_size);
    let upper = min_buffer_size.max(frames_for(cfg.max_buffer_duration_us).saturating_mul(frame_size));
    if multiplied < lower {
        lower
    } else if multiplied > upper {
        upper
    } else {
        multiplied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_stereo(rate: u32) -> SessionConfig {
        SessionConfig {
            sample_rate: rate,
            layout: ChannelLayout::Stereo,
            encoding: Encoding::Pcm16,
            passthrough: false,
            frame_size: 4,
            min_buffer_size: 0,
            buffer_size: 0,
        }
    }

    #[test]
    fn buffer_size_uses_multiplied_minimum_when_in_range() {
        let cfg = TrackConfig::default();
        // 250 ms of 48 kHz stereo is 48_000 bytes, 750 ms is 144_000 bytes.
        assert_eq!(select_buffer_size(&cfg, 15_000, 48_000, 4), 60_000);
    }

    #[test]
    fn buffer_size_clamps_to_lower_bound() {
        let cfg = TrackConfig::default();
        assert_eq!(select_buffer_size(&cfg, 1_000, 48_000, 4), 48_000);
    }

    #[test]
    fn buffer_size_clamps_to_upper_bound() {
        let cfg = TrackConfig::default();
        assert_eq!(select_buffer_size(&cfg, 40_000, 48_000, 4), 144_000);
    }

    #[test]
    fn buffer_size_upper_bound_respects_device_minimum() {
        let cfg = TrackConfig::default();
        assert_eq!(select_buffer_size(&cfg, 200_000, 48_000, 4), 200_000);
    }

    #[test]
    fn pcm_bytes_to_frames_divides_by_frame_size() {
        let cfg = pcm_stereo(48_000);
        assert_eq!(cfg.bytes_to_frames(4_096, None), 1_024);
        assert_eq!(cfg.frames_to_us(cfg.bytes_to_frames(192_000, None)), 1_000_000);
    }

    #[test]
    fn passthrough_bytes_to_frames_uses_bitrate() {
        let mut cfg = pcm_stereo(48_000);
        cfg.passthrough = true;
        cfg.encoding = Encoding::Ac3;
        assert_eq!(cfg.bytes_to_frames(1_536, None), 0);
        // 1536 bytes at 384 kbit/s is one 1536 sample syncframe.
        assert_eq!(cfg.bytes_to_frames(1_536, Some(384)), 1_536);
    }

    #[test]
    fn same_format_compares_rate_layout_and_encoding() {
        let cfg = pcm_stereo(44_100);
        assert!(cfg.same_format(44_100, ChannelLayout::Stereo, Encoding::Pcm16));
        assert!(!cfg.same_format(48_000, ChannelLayout::Stereo, Encoding::Pcm16));
        assert!(!cfg.same_format(44_100, ChannelLayout::Mono, Encoding::Pcm16));
    }
}
