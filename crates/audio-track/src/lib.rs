//! Streaming audio output engine.
//!
//! [`AudioTrack`] takes encoded or PCM16 buffers tagged with presentation times, keeps the
//! output device fed, and answers "what media time is being heard right now". Device
//! access goes through the [`sink`] contract; [`cpal_sink`] is the CPAL-backed adapter.

pub mod clock;
pub mod config;
pub mod cpal_sink;
pub mod error;
pub mod format;
pub mod gate;
pub mod pacer;
pub mod sink;
pub mod status;
pub mod track;

mod counter;
mod position;
mod release;
mod smoothing;

#[cfg(test)]
mod fake;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{SessionConfig, SpuriousTimestampPolicy, TrackConfig, TrackQuirks};
pub use error::{Error, Result};
pub use format::{ChannelLayout, Encoding};
pub use pacer::{SubmitResult, SyncState};
pub use sink::{OutputSink, SessionId, SinkProvider};
pub use status::TrackStatus;
pub use track::AudioTrack;
