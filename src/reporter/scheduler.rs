//! Periodic heartbeat scheduling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::CheckInHandle;
use crate::backend::RemoteClient;
use crate::config::ReporterConfig;
use crate::repo::block_on;
use crate::Result;

/// A running heartbeat that can be cancelled.
pub trait Heartbeat: Send {
    /// Cancel future ticks and wait for an in-flight tick to finish.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the heartbeat's shutdown call fails.
    fn stop(&mut self) -> Result<()>;
}

/// Interval task on the repository runtime.
struct Ticker {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    runtime: Handle,
}

impl Ticker {
    fn spawn<F, Fut>(runtime: &Handle, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        if !tick().await {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            stop: Some(stop_tx),
            task: Some(task),
            runtime: runtime.clone(),
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = block_on(&self.runtime, task) {
                tracing::warn!(error = %e, "heartbeat task ended abnormally");
            }
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Local heartbeat: every interval, a check-in expecting the next one within
/// the interval.
pub struct ScheduledStatusReporter {
    ticker: Ticker,
}

impl ScheduledStatusReporter {
    /// Start ticking into `handle`. The first tick fires immediately.
    #[must_use]
    pub fn start(handle: CheckInHandle, config: &ReporterConfig, runtime: &Handle) -> Self {
        let expect_next_in = config.heartbeat_expect_next_in();
        let ticker = Ticker::spawn(runtime, config.heartbeat_interval(), move || {
            let alive = handle.tick(expect_next_in);
            async move { alive }
        });
        Self { ticker }
    }
}

impl Heartbeat for ScheduledStatusReporter {
    fn stop(&mut self) -> Result<()> {
        self.ticker.stop();
        Ok(())
    }
}

enum RemoteHeartbeat {
    Local(Ticker),
    Delegated { active: bool },
}

/// Heartbeat of a run on a remote repository.
///
/// Servers that track liveness themselves get a start/stop pair; otherwise
/// the client pings on a local schedule.
pub struct RemoteRunHeartbeatReporter {
    run_hash: String,
    client: Arc<dyn RemoteClient>,
    mode: RemoteHeartbeat,
}

impl RemoteRunHeartbeatReporter {
    /// Start the heartbeat for `run_hash`.
    ///
    /// # Errors
    ///
    /// Returns error if a server-side heartbeat cannot be started.
    pub fn start(
        run_hash: &str,
        client: Arc<dyn RemoteClient>,
        config: &ReporterConfig,
        runtime: &Handle,
    ) -> Result<Self> {
        let mode = if client.capabilities().server_side_heartbeat {
            client.start_heartbeat(run_hash)?;
            tracing::debug!(run_hash, "heartbeat delegated to server");
            RemoteHeartbeat::Delegated { active: true }
        } else {
            let expect_next_in = config.heartbeat_expect_next_in();
            let tick_client = Arc::clone(&client);
            let tick_hash = run_hash.to_string();
            RemoteHeartbeat::Local(Ticker::spawn(runtime, config.heartbeat_interval(), move || {
                let client = Arc::clone(&tick_client);
                let run_hash = tick_hash.clone();
                async move {
                    let sent = tokio::task::spawn_blocking(move || client.heartbeat(&run_hash, expect_next_in)).await;
                    match sent {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::warn!(error = %e, "remote heartbeat failed"),
                        Err(e) => tracing::warn!(error = %e, "remote heartbeat task failed"),
                    }
                    true
                }
            }))
        };
        Ok(Self {
            run_hash: run_hash.to_string(),
            client,
            mode,
        })
    }

    /// Whether the server drives this heartbeat.
    #[must_use]
    pub const fn is_delegated(&self) -> bool {
        matches!(self.mode, RemoteHeartbeat::Delegated { .. })
    }
}

impl Heartbeat for RemoteRunHeartbeatReporter {
    fn stop(&mut self) -> Result<()> {
        match &mut self.mode {
            RemoteHeartbeat::Local(ticker) => {
                ticker.stop();
                Ok(())
            }
            RemoteHeartbeat::Delegated { active } => {
                if !*active {
                    return Ok(());
                }
                *active = false;
                self.client.stop_heartbeat(&self.run_hash)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{FileManager, ReporterState, RunStatusReporter, StatusRecord};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingFileManager {
        written: Mutex<Vec<StatusRecord>>,
    }

    impl FileManager for RecordingFileManager {
        fn write(&self, record: &StatusRecord) -> Result<()> {
            self.written.lock().push(record.clone());
            Ok(())
        }

        fn read(&self) -> Result<Option<StatusRecord>> {
            Ok(None)
        }
    }

    #[test]
    fn test_scheduled_reporter_ticks_until_stopped() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let fm = Arc::new(RecordingFileManager::default());
        let mut reporter = RunStatusReporter::new("r1", fm.clone(), rt.handle());
        let config = ReporterConfig::new().with_heartbeat_interval(Duration::from_millis(10));

        let mut heartbeat = ScheduledStatusReporter::start(reporter.handle(), &config, rt.handle());
        std::thread::sleep(Duration::from_millis(80));
        heartbeat.stop().unwrap();
        heartbeat.stop().unwrap();
        reporter.close().unwrap();

        let count = fm.written.lock().len();
        assert!(count >= 2, "expected several ticks, got {count}");
        assert!(fm.written.lock().iter().all(|r| r.next_expected_in == 1));
        assert_eq!(reporter.state(), ReporterState::Stopped);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(fm.written.lock().len(), count);
    }
}
