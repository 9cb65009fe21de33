//! Output sink backed by a CPAL output stream.
//!
//! `cpal::Stream` is not `Send`, so each sink owns a device thread that builds the stream,
//! holds it, and drops it on release. The sink handle talks to that thread over a
//! crossbeam channel and shares a [`playback::StreamShared`] with the output callback.
//! Passthrough encodings are not supported.

mod device;
mod playback;
mod queue;

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

pub use device::output_device_names;

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::format::{ChannelLayout, Encoding};
use crate::sink::{
    OutputSink, PlayState, SessionId, SinkCapabilities, SinkConfig, SinkProvider, SinkState,
    SinkTimestamp, WriteError, WriteMode,
};
use playback::{StreamShared, StreamState};

/// Write result code for a sink whose stream never started.
const ERROR_INVALID_OPERATION: i32 = -3;
const BYTES_PER_SAMPLE: usize = 2;

enum DeviceCommand {
    Play,
    Pause,
    /// Drop the stream, then acknowledge.
    Release(Sender<()>),
}

/// Opens [`CpalSink`]s on one output device.
pub struct CpalProvider {
    device_name: Option<String>,
    clock: Arc<dyn Clock>,
    next_session: SessionId,
}

impl CpalProvider {
    /// `device_name` selects by case-insensitive substring; `None` uses the host default.
    ///
    /// `clock` must be the clock the track reads, so timestamps share its timebase.
    pub fn new(device_name: Option<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            device_name,
            clock,
            next_session: 0,
        }
    }

    fn supported_config(&self, sample_rate: u32, channels: u16) -> anyhow::Result<cpal::SupportedStreamConfig> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device_name.as_deref())?;
        device::pick_output_config(&device, sample_rate, channels)
    }
}

impl SinkProvider for CpalProvider {
    type Sink = CpalSink;

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities {
            timestamp_query: true,
            latency_query: true,
            direct_write: true,
            non_blocking_write: true,
        }
    }

    fn min_buffer_size(&self, sample_rate: u32, layout: ChannelLayout, encoding: Encoding)
    -> Result<usize> {
        if encoding.is_passthrough() {
            return Err(Error::UnsupportedEncoding(format!("{encoding:?}")));
        }
        let config = self.supported_config(sample_rate, layout.channels())?;
        let frames = device::min_callback_frames(&config) as usize;
        Ok(frames * usize::from(layout.channels()) * BYTES_PER_SAMPLE)
    }

    fn open(&mut self, config: &SinkConfig, session_id: Option<SessionId>) -> Result<CpalSink> {
        if config.encoding.is_passthrough() {
            return Err(Error::UnsupportedEncoding(format!("{:?}", config.encoding)));
        }
        let session_id = session_id.unwrap_or_else(|| {
            self.next_session += 1;
            self.next_session
        });
        let channels = usize::from(config.layout.channels());
        let frame_bytes = channels * BYTES_PER_SAMPLE;
        let capacity_frames = (config.buffer_size / frame_bytes).max(1);
        let shared = Arc::new(StreamShared::new(channels, capacity_frames, self.clock.clone()));

        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let thread_shared = shared.clone();
        let device_name = self.device_name.clone();
        let sample_rate = config.sample_rate;
        let channel_count = config.layout.channels();
        let join = std::thread::Builder::new()
            .name("cpal-sink".to_string())
            .spawn(move || {
                device_thread_main(
                    device_name,
                    sample_rate,
                    channel_count,
                    thread_shared,
                    cmd_rx,
                    ready_tx,
                )
            })
            .context("spawn device thread")?;

        let state = match ready_rx.recv() {
            Ok(Ok(())) => SinkState::Initialized,
            Ok(Err(e)) => {
                tracing::warn!(sample_rate, channels, "output stream failed: {e:#}");
                SinkState::Uninitialized
            }
            Err(_) => SinkState::Uninitialized,
        };
        tracing::info!(session_id, sample_rate, channels, capacity_frames, ?state, "cpal sink opened");

        Ok(CpalSink {
            shared,
            cmd_tx,
            join: Some(join),
            state,
            session_id,
            sample_rate,
            frame_bytes,
        })
    }
}

fn device_thread_main(
    device_name: Option<String>,
    sample_rate: u32,
    channels: u16,
    shared: Arc<StreamShared>,
    cmd_rx: Receiver<DeviceCommand>,
    ready_tx: Sender<anyhow::Result<()>>,
) {
    let stream = match build_stream(device_name.as_deref(), sample_rate, channels, &shared) {
        Ok(stream) => {
            let _ = ready_tx.send(Ok(()));
            stream
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            DeviceCommand::Play => {
                if let Err(e) = stream.play() {
                    tracing::warn!("stream play failed: {e}");
                }
            }
            DeviceCommand::Pause => {
                if let Err(e) = stream.pause() {
                    tracing::debug!("stream pause failed: {e}");
                }
            }
            DeviceCommand::Release(ack) => {
                drop(stream);
                let _ = ack.send(());
                return;
            }
        }
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    channels: u16,
    shared: &Arc<StreamShared>,
) -> anyhow::Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, device_name)?;
    let supported = device::pick_output_config(&device, sample_rate, channels)?;
    let config = supported.config();
    if let Ok(desc) = device.description() {
        tracing::info!(
            device = %desc.name(),
            sample_rate,
            channels,
            sample_format = ?supported.sample_format(),
            "building output stream"
        );
    }
    playback::build_output_stream(&device, &config, supported.sample_format(), shared)
}

/// One open output stream.
pub struct CpalSink {
    shared: Arc<StreamShared>,
    cmd_tx: Sender<DeviceCommand>,
    join: Option<JoinHandle<()>>,
    state: SinkState,
    session_id: SessionId,
    sample_rate: u32,
    frame_bytes: usize,
}

impl CpalSink {
    fn send(&self, cmd: DeviceCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::debug!(session_id = self.session_id, "device thread gone");
        }
    }
}

impl OutputSink for CpalSink {
    fn state(&self) -> SinkState {
        self.state
    }

    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn play_state(&self) -> PlayState {
        self.shared.stream_state().play_state()
    }

    fn play(&mut self) {
        self.shared.set_stream_state(StreamState::Playing);
        self.send(DeviceCommand::Play);
    }

    fn pause(&mut self) {
        self.shared.set_stream_state(StreamState::Paused);
        self.send(DeviceCommand::Pause);
    }

    fn stop(&mut self) {
        // A playing stream plays out what is queued; the head keeps counting.
        let next = match self.shared.stream_state() {
            StreamState::Playing | StreamState::Draining => StreamState::Draining,
            _ => StreamState::Stopped,
        };
        self.shared.set_stream_state(next);
    }

    fn flush(&mut self) {
        self.shared.queue.clear();
    }

    fn write(&mut self, data: &[u8], mode: WriteMode) -> std::result::Result<usize, WriteError> {
        if self.state != SinkState::Initialized {
            return Err(WriteError {
                code: ERROR_INVALID_OPERATION,
            });
        }
        let whole = data.len() / self.frame_bytes * self.frame_bytes;
        let samples: Vec<i16> = data[..whole]
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        let pushed = match mode {
            WriteMode::NonBlocking => self.shared.queue.push_available(&samples),
            WriteMode::Blocking => self.shared.queue.push_blocking(&samples),
        };
        Ok(pushed * BYTES_PER_SAMPLE)
    }

    fn raw_head_position(&self) -> u32 {
        self.shared.head()
    }

    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        self.shared.timestamp()
    }

    fn latency_ms(&self) -> Option<i64> {
        if self.state != SinkState::Initialized || self.sample_rate == 0 {
            return None;
        }
        // Queue capacity stands in for the device buffer; the callback buffer adds to it.
        let frames = self.shared.queue.max_frames() as i64 + i64::from(self.shared.callback_frames());
        Some(frames * 1_000 / i64::from(self.sample_rate))
    }

    fn set_volume(&mut self, gain: f32) {
        self.shared.set_gain(gain);
    }

    fn release(&mut self) {
        self.shared.set_stream_state(StreamState::Stopped);
        self.shared.queue.close();
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        self.send(DeviceCommand::Release(ack_tx));
        let _ = ack_rx.recv();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        self.state = SinkState::Uninitialized;
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if self.join.is_some() {
            self.release();
        }
    }
}
