//! Ordered, exactly-once teardown of a write-mode run.
//!
//! ```text
//! extra resources (reverse registration order)
//!   → drain outbound queue
//!   → stamp end_time (once)
//!   → stop heartbeat
//!   → close check-in writer
//!   → release write lock
//!   → stop and deregister outbound queue
//! ```
//!
//! A failing step is logged and recorded; the remaining steps still run.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use super::props::utc_timestamp;
use crate::backend::{BackendSelector, RpcQueue};
use crate::lock::RunLock;
use crate::repo::Repo;
use crate::reporter::{Heartbeat, ReporterState, RunStatusReporter};
use crate::tree::TreeView;
use crate::{Error, Result};

/// A caller-owned resource closed before the run's own resources.
pub trait Closable: Send {
    /// Release the resource.
    ///
    /// # Errors
    ///
    /// Returns error if the resource fails to close; teardown continues.
    fn close(&mut self) -> Result<()>;
}

impl<F> Closable for F
where
    F: FnMut() -> Result<()> + Send,
{
    fn close(&mut self) -> Result<()> {
        self()
    }
}

/// Flush the queue and report operations the server rejected.
fn drain(queue: &RpcQueue) -> Result<()> {
    queue.wait_for_finish()?;
    match queue.failed_ops() {
        0 => Ok(()),
        rejected => Err(Error::Remote(format!(
            "{rejected} queued operation(s) of run {} were rejected by the server",
            queue.run_hash()
        ))),
    }
}

pub(crate) struct RunAutoClean {
    run_hash: String,
    read_only: bool,
    repo: Repo,
    run_tree: TreeView,
    extra: Vec<Box<dyn Closable>>,
    pub(crate) reporter: Option<RunStatusReporter>,
    heartbeat: Option<Box<dyn Heartbeat>>,
    lock: Option<RunLock>,
    queue: Option<Arc<RpcQueue>>,
    finalized: Arc<AtomicBool>,
    closed: bool,
}

impl RunAutoClean {
    pub(crate) fn new(
        run_hash: &str,
        read_only: bool,
        repo: Repo,
        run_tree: TreeView,
        finalized: Arc<AtomicBool>,
    ) -> Self {
        Self {
            run_hash: run_hash.to_string(),
            read_only,
            repo,
            run_tree,
            extra: Vec::new(),
            reporter: None,
            heartbeat: None,
            lock: None,
            queue: None,
            finalized,
            closed: false,
        }
    }

    pub(crate) fn set_lock(&mut self, lock: RunLock) {
        self.lock = Some(lock);
    }

    pub(crate) fn set_queue(&mut self, queue: Option<Arc<RpcQueue>>) {
        self.queue = queue;
    }

    pub(crate) fn set_reporter(&mut self, reporter: RunStatusReporter, heartbeat: Box<dyn Heartbeat>) {
        self.reporter = Some(reporter);
        self.heartbeat = Some(heartbeat);
    }

    pub(crate) fn add_extra_resource(&mut self, resource: Box<dyn Closable>) {
        self.extra.push(resource);
    }

    pub(crate) const fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn reporter_state(&self) -> ReporterState {
        self.reporter
            .as_ref()
            .map_or(ReporterState::Inactive, RunStatusReporter::state)
    }

    /// Stamp `end_time` unless already done in this session.
    pub(crate) fn finalize_run(&self) -> Result<()> {
        if self.read_only || self.closed {
            return Ok(());
        }
        if self.finalized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let end_time = serde_json::Number::from_f64(utc_timestamp()).map_or(Value::Null, Value::Number);
        if let Err(e) = self.run_tree.set(&["end_time"], end_time) {
            self.finalized.store(false, Ordering::Release);
            return Err(e);
        }
        tracing::debug!(run_hash = %self.run_hash, "run finalized");
        Ok(())
    }

    /// Full teardown; idempotent.
    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.read_only {
            self.closed = true;
            tracing::debug!(run_hash = %self.run_hash, "run is read-only, skipping cleanup");
            return Ok(());
        }

        let mut failures = Vec::new();
        let mut step = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(run_hash = %self.run_hash, step = what, error = %e, "teardown step failed");
                failures.push(format!("{what}: {e}"));
            }
        };

        for (i, mut resource) in self.extra.drain(..).enumerate().rev() {
            tracing::debug!(run_hash = %self.run_hash, resource = i, "closing extra resource");
            step("extra resource", resource.close());
        }
        if let Some(queue) = &self.queue {
            step("drain queue", drain(queue));
        }
        step("finalize", self.finalize_run());
        self.closed = true;
        if let Some(mut heartbeat) = self.heartbeat.take() {
            step("heartbeat", heartbeat.stop());
        }
        if let Some(mut reporter) = self.reporter.take() {
            step("check-in writer", reporter.close());
        }
        if let Some(mut lock) = self.lock.take() {
            step("lock", lock.release());
        }
        if let Some(queue) = self.queue.take() {
            step("queue", BackendSelector::finalize_queue(&self.repo, &queue));
        }

        if failures.is_empty() {
            tracing::info!(run_hash = %self.run_hash, "run closed");
            Ok(())
        } else {
            Err(Error::Teardown {
                run_hash: self.run_hash.clone(),
                failures,
            })
        }
    }

    /// Release what a failed open already started, without finalizing.
    ///
    /// The lock is taken before anything else, so a failed lock acquisition
    /// never reaches here.
    pub(crate) fn abort(&mut self) {
        self.closed = true;
        self.extra.clear();
        let log_failure = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(run_hash = %self.run_hash, step = what, error = %e, "cleanup after failed open failed");
            }
        };
        if let Some(mut heartbeat) = self.heartbeat.take() {
            log_failure("heartbeat", heartbeat.stop());
        }
        if let Some(mut reporter) = self.reporter.take() {
            log_failure("check-in writer", reporter.close());
        }
        if let Some(mut lock) = self.lock.take() {
            log_failure("lock", lock.release());
        }
        if let Some(queue) = self.queue.take() {
            log_failure("queue", BackendSelector::finalize_queue(&self.repo, &queue));
        }
    }
}
