//! In-memory sink provider for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::Result;
use crate::format::{ChannelLayout, Encoding};
use crate::sink::{
    OutputSink, PlayState, SessionId, SinkCapabilities, SinkConfig, SinkProvider, SinkState,
    SinkTimestamp, WriteError, WriteMode,
};

#[derive(Debug)]
pub(crate) struct FakeDevice {
    pub config: SinkConfig,
    pub state: SinkState,
    pub play_state: PlayState,
    pub head: u32,
    pub timestamp: Option<SinkTimestamp>,
    pub latency_ms: Option<i64>,
    /// Bytes a non-blocking write may still accept.
    pub write_capacity: usize,
    pub write_error: Option<i32>,
    pub written: Vec<u8>,
    pub writes: Vec<(usize, WriteMode)>,
    pub volume: f32,
    pub flushed: bool,
    pub released: bool,
}

impl FakeDevice {
    fn new(config: SinkConfig) -> Self {
        Self {
            config,
            state: SinkState::Initialized,
            play_state: PlayState::Stopped,
            head: 0,
            timestamp: None,
            latency_ms: None,
            write_capacity: usize::MAX,
            write_error: None,
            written: Vec::new(),
            writes: Vec::new(),
            volume: 1.0,
            flushed: false,
            released: false,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SharedDevice(Arc<Mutex<FakeDevice>>);

impl SharedDevice {
    pub fn new(config: SinkConfig) -> Self {
        Self(Arc::new(Mutex::new(FakeDevice::new(config))))
    }

    pub fn lock(&self) -> MutexGuard<'_, FakeDevice> {
        self.0.lock().unwrap()
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct LiveCounter {
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl LiveCounter {
    fn opened(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn released(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

pub(crate) struct FakeSink {
    device: SharedDevice,
    session_id: SessionId,
    live: Option<LiveCounter>,
    release_delay: Duration,
}

impl FakeSink {
    pub fn new(device: SharedDevice) -> Self {
        Self {
            device,
            session_id: 1,
            live: None,
            release_delay: Duration::ZERO,
        }
    }
}

impl OutputSink for FakeSink {
    fn state(&self) -> SinkState {
        self.device.lock().state
    }

    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn play_state(&self) -> PlayState {
        self.device.lock().play_state
    }

    fn play(&mut self) {
        self.device.lock().play_state = PlayState::Playing;
    }

    fn pause(&mut self) {
        self.device.lock().play_state = PlayState::Paused;
    }

    fn stop(&mut self) {
        self.device.lock().play_state = PlayState::Stopped;
    }

    fn flush(&mut self) {
        self.device.lock().flushed = true;
    }

    fn write(&mut self, data: &[u8], mode: WriteMode) -> std::result::Result<usize, WriteError> {
        let mut dev = self.device.lock();
        if let Some(code) = dev.write_error {
            return Err(WriteError { code });
        }
        let n = match mode {
            WriteMode::Blocking => data.len(),
            WriteMode::NonBlocking => data.len().min(dev.write_capacity),
        };
        dev.write_capacity = dev.write_capacity.saturating_sub(n);
        dev.written.extend_from_slice(&data[..n]);
        dev.writes.push((n, mode));
        Ok(n)
    }

    fn raw_head_position(&self) -> u32 {
        self.device.lock().head
    }

    fn timestamp(&mut self) -> Option<SinkTimestamp> {
        self.device.lock().timestamp
    }

    fn latency_ms(&self) -> Option<i64> {
        self.device.lock().latency_ms
    }

    fn set_volume(&mut self, gain: f32) {
        self.device.lock().volume = gain;
    }

    fn release(&mut self) {
        std::thread::sleep(self.release_delay);
        self.device.lock().released = true;
        if let Some(live) = &self.live {
            live.released();
        }
    }
}

pub(crate) struct FakeProvider {
    pub capabilities: SinkCapabilities,
    pub min_buffer_size: usize,
    pub init_state: SinkState,
    pub release_delay: Duration,
    pub opened: Vec<SharedDevice>,
    pub keep_alives: Vec<SharedDevice>,
    pub live: LiveCounter,
    next_session: SessionId,
}

impl FakeProvider {
    pub fn new(capabilities: SinkCapabilities) -> Self {
        Self {
            capabilities,
            min_buffer_size: 16_384,
            init_state: SinkState::Initialized,
            release_delay: Duration::ZERO,
            opened: Vec::new(),
            keep_alives: Vec::new(),
            live: LiveCounter::default(),
            next_session: 100,
        }
    }

    pub fn modern() -> Self {
        Self::new(SinkCapabilities {
            timestamp_query: true,
            latency_query: true,
            direct_write: true,
            non_blocking_write: true,
        })
    }

    pub fn legacy() -> Self {
        Self::new(SinkCapabilities {
            timestamp_query: false,
            latency_query: false,
            direct_write: false,
            non_blocking_write: false,
        })
    }

    pub fn last(&self) -> SharedDevice {
        self.opened.last().cloned().unwrap()
    }
}

impl SinkProvider for FakeProvider {
    type Sink = FakeSink;

    fn capabilities(&self) -> SinkCapabilities {
        self.capabilities
    }

    fn min_buffer_size(&self, _sample_rate: u32, _layout: ChannelLayout, _encoding: Encoding)
    -> Result<usize> {
        Ok(self.min_buffer_size)
    }

    fn open(&mut self, config: &SinkConfig, session_id: Option<SessionId>) -> Result<FakeSink> {
        let session_id = session_id.unwrap_or_else(|| {
            self.next_session += 1;
            self.next_session
        });
        let device = SharedDevice::new(config.clone());
        let keep_alive = *config == SinkConfig::keep_alive();
        let live = if keep_alive {
            self.keep_alives.push(device.clone());
            None
        } else {
            device.lock().state = self.init_state;
            self.opened.push(device.clone());
            self.live.opened();
            Some(self.live.clone())
        };
        Ok(FakeSink {
            device,
            session_id,
            live,
            release_delay: self.release_delay,
        })
    }

    fn passthrough_supported(&self, encoding: Encoding) -> bool {
        encoding.is_passthrough()
    }
}
