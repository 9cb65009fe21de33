//! Background release worker.
//!
//! `reset` hands a detached device to this worker, which flushes and releases it off the
//! owner thread and then reopens the gate the next `open` waits on.

use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::gate::{OpenOnDrop, ReleaseGate};
use crate::sink::OutputSink;

enum ReleaseJob<S> {
    /// Flush and release a session device, then open the gate.
    Device { sink: S, gate: ReleaseGate },
    /// Release a keep-alive device. Never gated.
    KeepAlive(S),
}

/// Handle to the release worker thread. Dropping it waits for queued releases.
pub(crate) struct ReleaseWorker<S: OutputSink> {
    tx: Option<Sender<ReleaseJob<S>>>,
    join: Option<JoinHandle<()>>,
}

impl<S: OutputSink> ReleaseWorker<S> {
    /// Spawn the worker. If the thread cannot be spawned, releases run inline.
    pub fn spawn() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        match std::thread::Builder::new()
            .name("audio-track-release".to_string())
            .spawn(move || release_thread_main(rx))
        {
            Ok(join) => Self {
                tx: Some(tx),
                join: Some(join),
            },
            Err(e) => {
                tracing::warn!("release worker spawn failed, releasing inline: {e}");
                Self { tx: None, join: None }
            }
        }
    }

    /// Close `gate` and release `sink` in the background.
    pub fn release_device(&self, sink: S, gate: &ReleaseGate) {
        gate.close();
        self.dispatch(ReleaseJob::Device {
            sink,
            gate: gate.clone(),
        });
    }

    pub fn release_keep_alive(&self, sink: S) {
        self.dispatch(ReleaseJob::KeepAlive(sink));
    }

    fn dispatch(&self, job: ReleaseJob<S>) {
        let job = match &self.tx {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                Err(err) => {
                    tracing::warn!("release worker gone, releasing inline");
                    err.into_inner()
                }
            },
            None => job,
        };
        run_job(job);
    }
}

impl<S: OutputSink> Drop for ReleaseWorker<S> {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn release_thread_main<S: OutputSink>(rx: Receiver<ReleaseJob<S>>) {
    while let Ok(job) = rx.recv() {
        run_job(job);
    }
    tracing::debug!("release worker exiting");
}

fn run_job<S: OutputSink>(job: ReleaseJob<S>) {
    match job {
        ReleaseJob::Device { mut sink, gate } => {
            let _open = OpenOnDrop(gate);
            let session_id = sink.session_id();
            sink.flush();
            sink.release();
            tracing::debug!(session_id, "device released");
        }
        ReleaseJob::KeepAlive(mut sink) => {
            sink.release();
            tracing::debug!(session_id = sink.session_id(), "keep-alive device released");
        }
    }
}
