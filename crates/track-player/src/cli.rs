use clap::Parser;

use audio_track::{SpuriousTimestampPolicy, TrackConfig, TrackQuirks};

#[derive(Parser, Debug)]
#[command(name = "track-player", version)]
pub struct Args {
    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output sample rate in Hz
    #[arg(long, default_value_t = 48_000)]
    pub sample_rate: u32,

    /// Output channel count (1, 2, 6 or 8)
    #[arg(long, default_value_t = 2)]
    pub channels: u16,

    /// Test tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    pub frequency: f32,

    /// Length of the tone in seconds
    #[arg(long, default_value_t = 5.0)]
    pub seconds: f32,

    /// Size of each submitted buffer in milliseconds
    #[arg(long, default_value_t = 20)]
    pub chunk_ms: u32,

    /// Output gain (0.0 - 1.0)
    #[arg(long, default_value_t = 0.5)]
    pub volume: f32,

    /// Device buffer size in bytes (default: derived from the device minimum)
    #[arg(long)]
    pub buffer_bytes: Option<usize>,

    /// How often to log the playback position, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub report_ms: u64,

    /// Fail on implausible hardware timestamps instead of discarding them
    #[arg(long)]
    pub strict_timestamps: bool,

    /// The device head counter already includes its software latency
    #[arg(long)]
    pub head_includes_latency: bool,

    /// Use this hardware latency instead of querying the device
    #[arg(long)]
    pub latency_override_ms: Option<i64>,

    /// Keep the audio session pinned with a minimal keep-alive device
    #[arg(long)]
    pub keep_session_alive: bool,
}

impl Args {
    pub fn track_config(&self) -> TrackConfig {
        TrackConfig {
            spurious_timestamp_policy: if self.strict_timestamps {
                SpuriousTimestampPolicy::Abort
            } else {
                SpuriousTimestampPolicy::Discard
            },
            ..TrackConfig::default()
        }
    }

    pub fn track_quirks(&self) -> TrackQuirks {
        TrackQuirks {
            head_position_includes_latency: self.head_includes_latency,
            latency_override_us: self.latency_override_ms.map(|ms| ms * 1_000),
            keep_session_alive: self.keep_session_alive,
            ..TrackQuirks::default()
        }
    }
}
