//! Output formats: encodings, channel layouts, and frame/time conversions.

use serde::Serialize;

use crate::error::{Error, Result};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Device encoding for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Encoding {
    /// Interleaved signed 16-bit little-endian PCM.
    Pcm16,
    Ac3,
    EAc3,
    Dts,
    DtsHd,
}

impl Encoding {
    /// Map a content type to a passthrough encoding.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "audio/ac3" => Some(Encoding::Ac3),
            "audio/eac3" | "audio/eac3-joc" => Some(Encoding::EAc3),
            "audio/vnd.dts" => Some(Encoding::Dts),
            "audio/vnd.dts.hd" => Some(Encoding::DtsHd),
            _ => None,
        }
    }

    pub fn is_passthrough(self) -> bool {
        self != Encoding::Pcm16
    }

    /// AC-3 and E-AC-3 share the pause/stop defects worked around by the pacer.
    pub fn is_ac3_family(self) -> bool {
        matches!(self, Encoding::Ac3 | Encoding::EAc3)
    }

    pub fn is_dts_family(self) -> bool {
        matches!(self, Encoding::Dts | Encoding::DtsHd)
    }

    /// Estimate the bitrate in kbit/s from the size of one encoded access unit.
    ///
    /// AC-3 syncframes carry 1536 samples, DTS frames are treated as 512 samples.
    /// Returns `None` for PCM or when the estimate rounds to zero.
    pub fn estimate_bitrate_kbps(self, access_unit_bytes: usize, sample_rate: u32) -> Option<u32> {
        let samples_per_unit: u64 = if self.is_ac3_family() {
            1536
        } else if self.is_dts_family() {
            512
        } else {
            return None;
        };
        let unscaled = access_unit_bytes as u64 * 8 * u64::from(sample_rate);
        let divisor = 1000 * samples_per_unit;
        let kbps = (unscaled + divisor / 2) / divisor;
        u32::try_from(kbps).ok().filter(|k| *k > 0)
    }
}

/// Output channel layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelLayout {
    Mono,
    Stereo,
    Surround51,
    Surround71,
}

impl ChannelLayout {
    pub fn from_count(channels: u16) -> Result<Self> {
        match channels {
            1 => Ok(ChannelLayout::Mono),
            2 => Ok(ChannelLayout::Stereo),
            6 => Ok(ChannelLayout::Surround51),
            8 => Ok(ChannelLayout::Surround71),
            other => Err(Error::UnsupportedChannelCount(other)),
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
            ChannelLayout::Surround51 => 6,
            ChannelLayout::Surround71 => 8,
        }
    }
}

pub fn frames_to_us(frames: i64, sample_rate: u32) -> i64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(MICROS_PER_SECOND) / i64::from(sample_rate)
}

pub fn us_to_frames(duration_us: i64, sample_rate: u32) -> i64 {
    duration_us.saturating_mul(i64::from(sample_rate)) / MICROS_PER_SECOND
}
