//! Reader-side run health classification.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{FileManager, RunHealth, StatusRecord};
use crate::Result;

/// Classifies a run from its persisted check-in record alone.
pub struct StatusMonitor {
    file_manager: Arc<dyn FileManager>,
    grace: Duration,
}

impl StatusMonitor {
    /// Monitor reading through `file_manager`.
    #[must_use]
    pub fn new(file_manager: Arc<dyn FileManager>, grace: Duration) -> Self {
        Self { file_manager, grace }
    }

    /// Latest persisted record.
    ///
    /// # Errors
    ///
    /// Propagates file manager failures.
    pub fn record(&self) -> Result<Option<StatusRecord>> {
        self.file_manager.read()
    }

    /// Health right now; `None` if the run never checked in.
    ///
    /// # Errors
    ///
    /// Propagates file manager failures.
    pub fn health(&self) -> Result<Option<RunHealth>> {
        self.health_at(Utc::now())
    }

    /// Health at `now`; `None` if the run never checked in.
    ///
    /// # Errors
    ///
    /// Propagates file manager failures.
    pub fn health_at(&self, now: DateTime<Utc>) -> Result<Option<RunHealth>> {
        Ok(self
            .record()?
            .map(|record| record.health_at(now, self.grace)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::LocalFileManager;
    use tempfile::TempDir;

    #[test]
    fn test_monitor_without_record() {
        let dir = TempDir::new().unwrap();
        let fm = Arc::new(LocalFileManager::new(dir.path(), "r1"));
        let monitor = StatusMonitor::new(fm, Duration::from_secs(1));
        assert_eq!(monitor.health().unwrap(), None);
    }

    #[test]
    fn test_monitor_detects_stale_run() {
        let dir = TempDir::new().unwrap();
        let fm = Arc::new(LocalFileManager::new(dir.path(), "r1"));
        let mut record = StatusRecord::new("r1");
        record.next_expected_in = 2;
        fm.write(&record).unwrap();
        let monitor = StatusMonitor::new(fm, Duration::from_secs(1));

        let checked_in = record.last_check_in_time;
        assert_eq!(
            monitor.health_at(checked_in).unwrap(),
            Some(RunHealth::Running)
        );
        assert_eq!(
            monitor
                .health_at(checked_in + chrono::Duration::seconds(4))
                .unwrap(),
            Some(RunHealth::Failed)
        );
    }
}
