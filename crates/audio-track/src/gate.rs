//! Binary gate closed while a device release is in flight.

use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Blocks `wait` callers while closed.
///
/// The flag lives under the same mutex the condvar waits on, so an `open` racing a
/// `wait` can never be missed. Clones share the gate.
#[derive(Clone, Debug, Default)]
pub struct ReleaseGate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    closed: Mutex<bool>,
    cv: Condvar,
}

impl ReleaseGate {
    /// A new gate starts open.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn close(&self) {
        *self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner) = true;
    }

    /// Open the gate and wake every waiter. Idempotent.
    pub fn open(&self) {
        let mut closed = self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner);
        *closed = false;
        drop(closed);
        self.inner.cv.notify_all();
    }

    pub fn is_open(&self) -> bool {
        !*self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the gate is open.
    pub fn wait(&self) {
        let mut closed = self.inner.closed.lock().unwrap_or_else(PoisonError::into_inner);
        while *closed {
            closed = self
                .inner
                .cv
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Opens the gate when dropped, so a panicking release still unblocks `open`.
pub(crate) struct OpenOnDrop(pub ReleaseGate);

impl Drop for OpenOnDrop {
    fn drop(&mut self) {
        self.0.open();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn new_gate_is_open() {
        let gate = ReleaseGate::new();
        assert!(gate.is_open());
        gate.wait();
    }

    #[test]
    fn wait_blocks_until_opened_from_another_thread() {
        let gate = ReleaseGate::new();
        gate.close();
        let opened = Arc::new(AtomicBool::new(false));

        let handle = {
            let gate = gate.clone();
            let opened = opened.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                opened.store(true, Ordering::SeqCst);
                gate.open();
            })
        };

        gate.wait();
        assert!(opened.load(Ordering::SeqCst));
        handle.join().unwrap();
    }

    #[test]
    fn guard_opens_gate_on_panic() {
        let gate = ReleaseGate::new();
        gate.close();
        let guard_gate = gate.clone();
        let result = thread::spawn(move || {
            let _guard = OpenOnDrop(guard_gate);
            panic!("release failed");
        })
        .join();
        assert!(result.is_err());
        assert!(gate.is_open());
    }
}
