//! Output sink contract.
//!
//! The engine never talks to an audio API directly. A [`SinkProvider`] opens device
//! instances for a [`SinkConfig`], and each instance implements [`OutputSink`]: a byte
//! write interface, transport controls, and a wrapping 32-bit frames-consumed counter.
//! Optional hardware facilities (timestamps, latency) are advertised once through
//! [`SinkCapabilities`] and queried through methods returning `Option`.

use serde::Serialize;
use thiserror::Error;

use crate::error::Result;
use crate::format::{ChannelLayout, Encoding};

/// Audio session identifier assigned by the device layer.
pub type SessionId = i32;

/// Lifecycle state reported right after a device is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SinkState {
    Uninitialized,
    Initialized,
}

/// Transport state of a device instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait until every byte has been accepted.
    Blocking,
    /// Accept whatever fits right now and return immediately.
    NonBlocking,
}

/// Optional facilities of the device layer, probed once per track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SinkCapabilities {
    /// [`OutputSink::timestamp`] can return samples.
    pub timestamp_query: bool,
    /// [`OutputSink::latency_ms`] can return values.
    pub latency_query: bool,
    /// Writes may address the caller's buffer directly; otherwise the pacer stages a copy.
    pub direct_write: bool,
    /// [`WriteMode::NonBlocking`] is honored; otherwise the pacer throttles blocking writes.
    pub non_blocking_write: bool,
}

/// A hardware presentation timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SinkTimestamp {
    /// Frames presented, as a raw counter that wraps at 2^32.
    pub frame_position: u32,
    /// Clock time at which `frame_position` was presented, in nanoseconds.
    pub nano_time: i64,
}

/// A negative device write result.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device write failed with code {code}")]
pub struct WriteError {
    pub code: i32,
}

/// Parameters for opening one device instance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    pub encoding: Encoding,
    /// Device buffer size in bytes.
    pub buffer_size: usize,
    /// Open a device that reports position only through hardware timestamps.
    pub timestamp_only: bool,
}

impl SinkConfig {
    /// Minimal device used to keep an audio session alive.
    pub fn keep_alive() -> Self {
        Self {
            sample_rate: 4_000,
            layout: ChannelLayout::Mono,
            encoding: Encoding::Pcm16,
            buffer_size: 2,
            timestamp_only: false,
        }
    }
}

/// One open output device instance.
///
/// Instances are owned by exactly one track and handed to the release worker on reset,
/// hence `Send`. [`OutputSink::release`] may be slow.
pub trait OutputSink: Send + 'static {
    fn state(&self) -> SinkState;
    fn session_id(&self) -> SessionId;
    fn play_state(&self) -> PlayState;

    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Discard queued data.
    fn flush(&mut self);

    /// Write bytes, returning how many were accepted.
    fn write(&mut self, data: &[u8], mode: WriteMode) -> std::result::Result<usize, WriteError>;

    /// Frames consumed by the hardware, wrapping at 2^32.
    fn raw_head_position(&self) -> u32;

    /// Latest hardware timestamp, if one is available right now.
    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        None
    }

    /// Total output latency in milliseconds including the device buffer.
    fn latency_ms(&self) -> Option<i64> {
        None
    }

    fn set_volume(&mut self, gain: f32);

    /// Free device resources. Safe to call from a background thread.
    fn release(&mut self);
}

/// Opens device instances and answers format queries.
pub trait SinkProvider {
    type Sink: OutputSink;

    fn capabilities(&self) -> SinkCapabilities;

    /// Smallest buffer in bytes the device accepts for a format.
    fn min_buffer_size(&self, sample_rate: u32, layout: ChannelLayout, encoding: Encoding)
    -> Result<usize>;

    /// Open a device instance, joining `session_id` when given.
    fn open(&mut self, config: &SinkConfig, session_id: Option<SessionId>) -> Result<Self::Sink>;

    /// Map a content type to the device's passthrough encoding.
    fn select_encoding(&self, mime: &str) -> Option<Encoding> {
        Encoding::from_mime(mime)
    }

    fn passthrough_supported(&self, _encoding: Encoding) -> bool {
        false
    }
}
