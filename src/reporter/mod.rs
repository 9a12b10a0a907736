//! Liveness and status reporting
//!
//! A write-mode run periodically persists a [`StatusRecord`] ("check-in")
//! through a [`FileManager`]. A monitor that only sees the persisted records
//! classifies the run:
//!
//! ```text
//! failed  ⇔  now > last_check_in_time + next_expected_in + grace
//!            and not successfully_finished
//! ```
//!
//! ## State machine
//!
//! ```text
//! Inactive ──arm──> Scheduled ──first record──> Reporting ──close──> Stopped
//! ```
//!
//! Read-only runs stay `Inactive`. All records are persisted by one writer
//! (a blocking task fed by an unbounded channel), so check-ins are written in
//! the order they were issued and closing drains the channel instead of
//! cancelling an in-flight write.

mod file_manager;
mod monitor;
mod scheduler;

pub(crate) use file_manager::write_atomic;
pub use file_manager::{FileManager, LocalFileManager, RemoteFileManager, CHECK_INS_DIR};
pub use monitor::StatusMonitor;
pub use scheduler::{Heartbeat, RemoteRunHeartbeatReporter, ScheduledStatusReporter};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::repo::block_on;
use crate::{Error, Result};

/// Persisted liveness record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Run the record belongs to.
    pub run_hash: String,
    /// Number of check-ins written so far (monotonic across sessions).
    pub check_in_idx: u64,
    /// Time of the most recent check-in.
    pub last_check_in_time: DateTime<Utc>,
    /// Seconds until the next check-in is due.
    pub next_expected_in: u64,
    /// Terminal flag set by `report_successful_finish`.
    pub successfully_finished: bool,
}

/// Health of a run as inferred from its status record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunHealth {
    /// Check-ins are arriving on time.
    Running,
    /// The run reported a successful finish.
    Finished,
    /// The last check-in expired (plus grace) without a finish report.
    Failed,
}

impl StatusRecord {
    /// Fresh record with no check-ins.
    #[must_use]
    pub fn new(run_hash: impl Into<String>) -> Self {
        Self {
            run_hash: run_hash.into(),
            check_in_idx: 0,
            last_check_in_time: Utc::now(),
            next_expected_in: 0,
            successfully_finished: false,
        }
    }

    /// Time after which the current expectation is overdue.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.next_expected_in).ok()?;
        let delta = chrono::Duration::try_seconds(secs)?;
        self.last_check_in_time.checked_add_signed(delta)
    }

    /// Classify the run at `now` with the given grace period.
    ///
    /// A finished run is never classified as failed.
    #[must_use]
    pub fn health_at(&self, now: DateTime<Utc>, grace: Duration) -> RunHealth {
        if self.successfully_finished {
            return RunHealth::Finished;
        }
        let deadline = self.expires_at().and_then(|expiry| {
            chrono::Duration::from_std(grace)
                .ok()
                .and_then(|grace| expiry.checked_add_signed(grace))
        });
        match deadline {
            Some(deadline) if now > deadline => RunHealth::Failed,
            _ => RunHealth::Running,
        }
    }
}

/// Lifecycle state of a run's reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReporterState {
    /// No reporter attached.
    Inactive = 0,
    /// Scheduler armed, nothing persisted yet.
    Scheduled = 1,
    /// At least one record persisted.
    Reporting = 2,
    /// Scheduler cancelled and writer drained.
    Stopped = 3,
}

impl ReporterState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scheduled,
            2 => Self::Reporting,
            3 => Self::Stopped,
            _ => Self::Inactive,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn get(&self) -> ReporterState {
        ReporterState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ReporterState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// `Scheduled → Reporting`, leaving other states untouched.
    fn mark_reporting(&self) {
        let _ = self.0.compare_exchange(
            ReporterState::Scheduled as u8,
            ReporterState::Reporting as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

enum ReporterCommand {
    CheckIn {
        expect_next_in: u64,
        finished: bool,
        ack: Option<oneshot::Sender<Result<()>>>,
    },
    Shutdown,
}

/// Cloneable sender used by heartbeat schedulers.
#[derive(Clone)]
pub struct CheckInHandle {
    sender: mpsc::UnboundedSender<ReporterCommand>,
}

impl CheckInHandle {
    /// Enqueue a non-blocking check-in.
    ///
    /// Returns `false` once the reporter has been closed.
    pub fn tick(&self, expect_next_in: u64) -> bool {
        self.sender
            .send(ReporterCommand::CheckIn {
                expect_next_in,
                finished: false,
                ack: None,
            })
            .is_ok()
    }
}

/// Check-in writer of one run.
pub struct RunStatusReporter {
    run_hash: String,
    sender: mpsc::UnboundedSender<ReporterCommand>,
    writer: Option<JoinHandle<()>>,
    runtime: Handle,
    state: SharedState,
}

impl RunStatusReporter {
    /// Start the writer for `run_hash` on `runtime`.
    ///
    /// A previous session's record is continued (its check-in counter is kept)
    /// but its finish flag is cleared: a resumed run is active again.
    #[must_use]
    pub fn new(run_hash: &str, file_manager: Arc<dyn FileManager>, runtime: &Handle) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let state = SharedState::default();
        state.set(ReporterState::Scheduled);

        let writer = runtime.spawn_blocking({
            let run_hash = run_hash.to_string();
            let state = state.clone();
            move || write_loop(&run_hash, file_manager.as_ref(), receiver, &state)
        });

        Self {
            run_hash: run_hash.to_string(),
            sender,
            writer: Some(writer),
            runtime: runtime.clone(),
            state,
        }
    }

    /// Run this reporter writes for.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ReporterState {
        self.state.get()
    }

    /// Handle for schedulers that issue periodic check-ins.
    #[must_use]
    pub fn handle(&self) -> CheckInHandle {
        CheckInHandle {
            sender: self.sender.clone(),
        }
    }

    /// Manual check-in: the next one is expected within `expect_next_in`
    /// seconds.
    ///
    /// With `block` the call returns once the record is persisted.
    ///
    /// # Errors
    ///
    /// Returns `Error::QueueClosed` after close, or the file manager's error
    /// when blocking.
    pub fn check_in(&self, expect_next_in: u64, block: bool) -> Result<()> {
        self.send(expect_next_in, false, block)
    }

    /// Persist the terminal `successfully_finished` flag.
    ///
    /// # Errors
    ///
    /// Same as [`RunStatusReporter::check_in`].
    pub fn report_successful_finish(&self, block: bool) -> Result<()> {
        self.send(0, true, block)
    }

    fn send(&self, expect_next_in: u64, finished: bool, block: bool) -> Result<()> {
        let (ack, done) = if block {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        self.sender
            .send(ReporterCommand::CheckIn {
                expect_next_in,
                finished,
                ack,
            })
            .map_err(|_| Error::QueueClosed)?;

        match done {
            Some(done) => block_on(&self.runtime, done).map_err(|_| Error::QueueClosed)?,
            None => Ok(()),
        }
    }

    /// Drain pending check-ins and stop the writer.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` if the writer task panicked.
    pub fn close(&mut self) -> Result<()> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        // Shutdown is queued behind pending check-ins, so they are written first.
        let _ = self.sender.send(ReporterCommand::Shutdown);
        let joined = block_on(&self.runtime, writer);
        self.state.set(ReporterState::Stopped);
        tracing::debug!(run_hash = %self.run_hash, "check-in writer stopped");
        joined.map_err(|e| Error::Storage(format!("check-in writer failed: {e}")))
    }
}

impl Drop for RunStatusReporter {
    fn drop(&mut self) {
        if self.writer.is_some() {
            let _ = self.sender.send(ReporterCommand::Shutdown);
        }
    }
}

fn write_loop(
    run_hash: &str,
    file_manager: &dyn FileManager,
    mut receiver: mpsc::UnboundedReceiver<ReporterCommand>,
    state: &SharedState,
) {
    let mut record = match file_manager.read() {
        Ok(Some(previous)) if previous.run_hash == run_hash => StatusRecord {
            successfully_finished: false,
            ..previous
        },
        Ok(_) => StatusRecord::new(run_hash),
        Err(e) => {
            tracing::warn!(run_hash, error = %e, "could not read previous check-in, starting fresh");
            StatusRecord::new(run_hash)
        }
    };

    while let Some(command) = receiver.blocking_recv() {
        let ReporterCommand::CheckIn {
            expect_next_in,
            finished,
            ack,
        } = command
        else {
            break;
        };

        record.check_in_idx += 1;
        record.last_check_in_time = Utc::now();
        record.next_expected_in = expect_next_in;
        record.successfully_finished |= finished;

        let result = file_manager.write(&record);
        if result.is_ok() {
            state.mark_reporting();
        }
        match ack {
            Some(ack) => {
                let _ = ack.send(result);
            }
            None => {
                if let Err(e) = result {
                    tracing::warn!(run_hash, check_in_idx = record.check_in_idx, error = %e, "check-in write failed");
                }
            }
        }
    }
}
