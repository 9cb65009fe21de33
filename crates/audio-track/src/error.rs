//! Error types for the audio track engine.

use thiserror::Error;

use crate::sink::SinkState;

/// Result type for audio track operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`crate::AudioTrack`] and the sink adapters.
#[derive(Error, Debug)]
pub enum Error {
    /// `open` was called before the track was configured.
    #[error("audio track is not configured")]
    NotConfigured,

    /// A buffer was submitted while no device is open.
    #[error("audio track is not initialized")]
    NotInitialized,

    /// Channel layouts other than mono, stereo, 5.1 and 7.1 are rejected.
    #[error("unsupported channel count: {0}")]
    UnsupportedChannelCount(u16),

    /// Passthrough was requested for a content type with no device encoding.
    #[error("no passthrough encoding for content type {0:?}")]
    UnsupportedEncoding(String),

    /// The provider could not report a minimum buffer size for the format.
    #[error("invalid minimum buffer size for {sample_rate} Hz, {channels} channels")]
    InvalidBufferSize { sample_rate: u32, channels: u16 },

    /// The device did not reach the initialized state after being opened.
    #[error(
        "audio track init failed: {state:?}, config({sample_rate}, {channels}, {buffer_size})"
    )]
    DeviceInitFailed {
        state: SinkState,
        sample_rate: u32,
        channels: u16,
        buffer_size: usize,
    },

    /// The device rejected a write with an error code.
    #[error("audio track write failed: {code}")]
    WriteFailed { code: i32 },

    /// A hardware timestamp failed a sanity check under the strict policy.
    #[error("spurious audio timestamp: {0}")]
    SpuriousTimestamp(String),

    /// Backend-specific device failure.
    #[error("device error: {0}")]
    Device(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Device(format!("{err:#}"))
    }
}
