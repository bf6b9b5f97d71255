//! Fixed pool of worker threads for blocking work off the caller's thread
//!
//! Used by `call_async` when no event loop is running: the blocking call
//! runs on a worker and its result is delivered through the pending-call
//! state machine. Jobs queue in a bounded channel; a full queue is reported
//! to the submitter instead of blocking it.

use crate::error::{RpcError, RpcResult};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct WorkerPool {
    sender: Mutex<Option<Sender<Job>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub(crate) fn new(threads: usize, capacity: usize) -> RpcResult<Self> {
        let (sender, receiver) = bounded::<Job>(capacity.max(1));
        let mut handles = Vec::with_capacity(threads);
        for index in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("bus-rpc-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                    debug!(worker = index, "Worker exiting");
                })
                .map_err(|e| RpcError::state("spawn_worker", e.to_string()))?;
            handles.push(handle);
        }
        debug!(threads = handles.len(), capacity, "Worker pool started");
        Ok(Self {
            sender: Mutex::new(Some(sender)),
            threads: Mutex::new(handles),
        })
    }

    pub(crate) fn submit(&self, job: impl FnOnce() + Send + 'static) -> RpcResult<()> {
        let guard = self.sender.lock();
        let sender = guard
            .as_ref()
            .ok_or_else(|| RpcError::state("submit", "worker pool is shut down"))?;
        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Worker queue full, rejecting job");
                Err(RpcError::state("submit", "worker queue is full"))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(RpcError::state("submit", "worker pool is shut down"))
            }
        }
    }

    /// Stop accepting jobs and join every worker once the queue drains
    pub(crate) fn shutdown(&self) {
        self.sender.lock().take();
        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // A job may drop the last connection handle from a worker thread
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
