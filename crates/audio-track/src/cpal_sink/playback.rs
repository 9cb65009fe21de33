//! Output stream and real-time callback.
//!
//! The callback drains the sample queue only while the sink is playing (or playing out
//! after a stop), applies the gain, converts to the device sample format, and advances the
//! wrapping frames-consumed counter. Each callback also records which frame reaches the
//! speaker when, which the sink reports as its hardware timestamp.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::queue::SampleQueue;
use crate::clock::Clock;
use crate::sink::{PlayState, SinkTimestamp};

/// Transport state shared with the callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum StreamState {
    Stopped = 0,
    Paused = 1,
    Playing = 2,
    /// Stopped by the caller, still playing out queued frames.
    Draining = 3,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => StreamState::Paused,
            2 => StreamState::Playing,
            3 => StreamState::Draining,
            _ => StreamState::Stopped,
        }
    }

    pub fn play_state(self) -> PlayState {
        match self {
            StreamState::Stopped | StreamState::Draining => PlayState::Stopped,
            StreamState::Paused => PlayState::Paused,
            StreamState::Playing => PlayState::Playing,
        }
    }

    fn drains_queue(self) -> bool {
        matches!(self, StreamState::Playing | StreamState::Draining)
    }
}

/// State shared between the sink handle and the output callback.
pub(crate) struct StreamShared {
    pub queue: SampleQueue,
    channels: usize,
    state: AtomicU8,
    head: AtomicU32,
    gain_bits: AtomicU32,
    callback_frames: AtomicU32,
    timestamp: Mutex<Option<SinkTimestamp>>,
    clock: Arc<dyn Clock>,
}

impl StreamShared {
    pub fn new(channels: usize, capacity_frames: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: SampleQueue::new(channels, capacity_frames),
            channels: channels.max(1),
            state: AtomicU8::new(StreamState::Stopped as u8),
            head: AtomicU32::new(0),
            gain_bits: AtomicU32::new(1.0f32.to_bits()),
            callback_frames: AtomicU32::new(0),
            timestamp: Mutex::new(None),
            clock,
        }
    }

    pub fn stream_state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_stream_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Frames consumed by the callback, wrapping at 2^32.
    pub fn head(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain_bits.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain_bits.store(gain.to_bits(), Ordering::Relaxed);
    }

    /// Frames requested by the most recent callback.
    pub fn callback_frames(&self) -> u32 {
        self.callback_frames.load(Ordering::Relaxed)
    }

    pub fn timestamp(&self) -> Option<SinkTimestamp> {
        *self.timestamp.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fill one device buffer.
    ///
    /// `output_delay_ns` is how long after this call the first frame of `data` is heard.
    pub fn render<T>(&self, data: &mut [T], scratch: &mut Vec<i16>, output_delay_ns: i64)
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
        let frames = data.len() / self.channels;
        self.callback_frames
            .store(u32::try_from(frames).unwrap_or(u32::MAX), Ordering::Relaxed);

        if !self.stream_state().drains_queue() {
            data.fill(silence);
            return;
        }

        scratch.resize(data.len(), 0);
        let popped = self.queue.pop_into(scratch);
        let gain = self.gain();
        for (out, sample) in data.iter_mut().zip(&scratch[..popped]) {
            *out = <T as cpal::Sample>::from_sample::<f32>(f32::from(*sample) / 32_768.0 * gain);
        }
        data[popped..].fill(silence);

        let popped_frames = (popped / self.channels) as u32;
        let first_frame = self.head.fetch_add(popped_frames, Ordering::AcqRel);
        *self.timestamp.lock().unwrap_or_else(PoisonError::into_inner) = Some(SinkTimestamp {
            frame_position: first_frame,
            nano_time: self.clock.now_ns().saturating_add(output_delay_ns),
        });
    }
}

/// Build a CPAL output stream that plays from `shared`.
pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    shared: &Arc<StreamShared>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: &Arc<StreamShared>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let shared_cb = shared.clone();
    let mut scratch: Vec<i16> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
            let ts = info.timestamp();
            let delay_ns = ts
                .playback
                .duration_since(&ts.callback)
                .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
                .unwrap_or(0);
            shared_cb.render(data, &mut scratch, delay_ns);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}
