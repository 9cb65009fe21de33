//! Bounded queue of interleaved PCM16 samples between sink writes and the output callback.
//!
//! Pushes and pops always move whole frames, so the callback never sees a frame split
//! across two refills.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Thread-safe bounded sample queue.
///
/// A single [`Condvar`] signals "state changed"; the `closed` flag is stored under the same
/// mutex as the samples so a blocking push can never miss a close.
pub(crate) struct SampleQueue {
    channels: usize,
    max_samples: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
}

struct QueueInner {
    samples: VecDeque<i16>,
    closed: bool,
}

impl SampleQueue {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        let channels = channels.max(1);
        let max_samples = max_frames.max(1).saturating_mul(channels);
        Self {
            channels,
            max_samples,
            inner: Mutex::new(QueueInner {
                samples: VecDeque::with_capacity(max_samples),
                closed: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn max_frames(&self) -> usize {
        self.max_samples / self.channels
    }

    /// Buffered frames (best-effort snapshot).
    pub fn len_frames(&self) -> usize {
        self.lock().samples.len() / self.channels
    }

    /// Stop accepting samples and wake blocked writers. Idempotent.
    pub fn close(&self) {
        self.lock().closed = true;
        self.cv.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Drop everything buffered.
    pub fn clear(&self) {
        self.lock().samples.clear();
        self.cv.notify_all();
    }

    fn push_locked(&self, inner: &mut QueueInner, samples: &[i16]) -> usize {
        let free = self.max_samples.saturating_sub(inner.samples.len());
        let take = free.min(samples.len()) / self.channels * self.channels;
        inner.samples.extend(&samples[..take]);
        take
    }

    /// Push as many whole frames as fit right now. Returns the number of samples pushed.
    pub fn push_available(&self, samples: &[i16]) -> usize {
        let mut g = self.lock();
        if g.closed {
            return 0;
        }
        let pushed = self.push_locked(&mut g, samples);
        drop(g);
        if pushed > 0 {
            self.cv.notify_all();
        }
        pushed
    }

    /// Push every whole frame, waiting for room as needed.
    ///
    /// Returns early with a short count if the queue is closed while waiting.
    pub fn push_blocking(&self, samples: &[i16]) -> usize {
        let total = samples.len() / self.channels * self.channels;
        let mut offset = 0;
        while offset < total {
            let mut g = self.lock();
            while self.max_samples - g.samples.len() < self.channels && !g.closed {
                g = self.cv.wait(g).unwrap_or_else(PoisonError::into_inner);
            }
            if g.closed {
                break;
            }
            offset += self.push_locked(&mut g, &samples[offset..total]);
            drop(g);
            self.cv.notify_all();
        }
        offset
    }

    /// Pop up to `out.len()` samples of whole frames without blocking.
    ///
    /// Returns the number of samples written to the front of `out`.
    pub fn pop_into(&self, out: &mut [i16]) -> usize {
        let mut g = self.lock();
        let take = g.samples.len().min(out.len()) / self.channels * self.channels;
        for (slot, sample) in out.iter_mut().zip(g.samples.drain(..take)) {
            *slot = sample;
        }
        drop(g);
        if take > 0 {
            self.cv.notify_all();
        }
        take
    }
}
