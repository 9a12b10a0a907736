//! Per-run outbound queue for remote repositories.
//!
//! Mutations are applied by one worker in enqueue order. Readers call
//! [`RpcQueue::wait_for_finish`] before reading so they observe their own
//! writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::RemoteClient;
use crate::repo::block_on;
use crate::reporter::StatusRecord;
use crate::{Error, Result};

/// A deferred remote mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueueOp {
    /// Set a tree value.
    TreeSet {
        /// Absolute tree path.
        path: Vec<String>,
        /// New value.
        value: Value,
    },
    /// Delete a tree value.
    TreeDelete {
        /// Absolute tree path.
        path: Vec<String>,
    },
    /// Replace the run's check-in record.
    WriteCheckIn(StatusRecord),
}

enum QueueMessage {
    Op(QueueOp),
    Flush(oneshot::Sender<()>),
}

/// Ordered outbound queue of one run.
pub struct RpcQueue {
    run_hash: String,
    sender: Mutex<Option<mpsc::UnboundedSender<QueueMessage>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
    failed: Arc<AtomicU64>,
    applied: Arc<AtomicU64>,
}

impl RpcQueue {
    /// Start the queue worker for `run_hash` on `runtime`.
    #[must_use]
    pub fn new(run_hash: &str, client: Arc<dyn RemoteClient>, runtime: &Handle) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueueMessage>();
        let failed = Arc::new(AtomicU64::new(0));
        let applied = Arc::new(AtomicU64::new(0));

        let worker = runtime.spawn_blocking({
            let run_hash = run_hash.to_string();
            let failed = Arc::clone(&failed);
            let applied = Arc::clone(&applied);
            move || {
                while let Some(message) = receiver.blocking_recv() {
                    match message {
                        QueueMessage::Op(op) => match client.apply(&run_hash, &op) {
                            Ok(()) => {
                                applied.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                failed.fetch_add(1, Ordering::Relaxed);
                                tracing::error!(run_hash = %run_hash, error = %e, "remote queue op failed");
                            }
                        },
                        QueueMessage::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                tracing::debug!(run_hash = %run_hash, "remote queue drained");
            }
        });

        Self {
            run_hash: run_hash.to_string(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            runtime: runtime.clone(),
            failed,
            applied,
        }
    }

    /// Run this queue belongs to.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    fn send(&self, message: QueueMessage) -> Result<()> {
        self.sender
            .lock()
            .as_ref()
            .ok_or(Error::QueueClosed)?
            .send(message)
            .map_err(|_| Error::QueueClosed)
    }

    /// Append an operation.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueueClosed` after [`RpcQueue::stop`].
    pub fn enqueue(&self, op: QueueOp) -> Result<()> {
        self.send(QueueMessage::Op(op))
    }

    /// Block until every operation enqueued so far has been applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueueClosed` after [`RpcQueue::stop`].
    pub fn wait_for_finish(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.send(QueueMessage::Flush(ack))?;
        block_on(&self.runtime, done).map_err(|_| Error::QueueClosed)
    }

    /// Apply the remaining operations and stop the worker.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` if the worker panicked.
    pub fn stop(&self) -> Result<()> {
        drop(self.sender.lock().take());
        let Some(worker) = self.worker.lock().take() else {
            return Ok(());
        };
        block_on(&self.runtime, worker)
            .map_err(|e| Error::Remote(format!("queue worker for {} failed: {e}", self.run_hash)))
    }

    /// Whether [`RpcQueue::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Operations applied successfully.
    #[must_use]
    pub fn applied_ops(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Operations the remote rejected.
    #[must_use]
    pub fn failed_ops(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Drop for RpcQueue {
    fn drop(&mut self) {
        drop(self.sender.get_mut().take());
    }
}

/// Repository-wide map `run hash → queue`.
#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<RpcQueue>>,
}

impl QueueRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `queue` the registered queue of its run.
    ///
    /// Returns the queue it displaced, which stays with its previous owner.
    pub fn register(&self, queue: Arc<RpcQueue>) -> Option<Arc<RpcQueue>> {
        self.queues.insert(queue.run_hash().to_string(), queue)
    }

    /// Registered queue of `run_hash`.
    #[must_use]
    pub fn get(&self, run_hash: &str) -> Option<Arc<RpcQueue>> {
        self.queues.get(run_hash).map(|entry| Arc::clone(entry.value()))
    }

    /// Deregister `queue` if it is still the registered queue of its run.
    ///
    /// Returns whether it was removed.
    pub fn remove(&self, queue: &Arc<RpcQueue>) -> bool {
        self.queues
            .remove_if(queue.run_hash(), |_, registered| Arc::ptr_eq(registered, queue))
            .is_some()
    }

    /// Number of registered queues.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    /// Whether no queue is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
