//! Liveness reporting: check-ins, finish flag, health classification

use std::fs;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use trueno_tracker::reporter::{LocalFileManager, StatusRecord, CHECK_INS_DIR};
use trueno_tracker::{Repo, ReporterConfig, ReporterState, Run, RunHealth};

fn fast_reporter() -> ReporterConfig {
    ReporterConfig::new()
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_grace_period(Duration::from_secs(1))
}

fn read_record(dir: &TempDir, hash: &str) -> StatusRecord {
    let bytes = fs::read(dir.path().join(CHECK_INS_DIR).join(format!("{hash}.json"))).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[test]
fn test_manual_check_in_is_persisted() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();

    run.report_progress(120, true).unwrap();

    assert_eq!(run.reporter_state(), ReporterState::Reporting);
    let record = read_record(&dir, run.hash());
    assert_eq!(record.run_hash, run.hash());
    assert!(record.check_in_idx >= 1);
    assert!(!record.successfully_finished);
    assert_eq!(
        repo.run_health(run.hash(), Duration::from_secs(1)).unwrap(),
        Some(RunHealth::Running)
    );
}

#[test]
fn test_successful_finish_survives_close() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();
    let hash = run.hash().to_string();

    run.report_successful_finish(true).unwrap();
    run.close().unwrap();

    assert_eq!(run.reporter_state(), ReporterState::Stopped);
    assert!(read_record(&dir, &hash).successfully_finished);
    assert_eq!(
        repo.run_health(&hash, Duration::ZERO).unwrap(),
        Some(RunHealth::Finished)
    );
}

#[test]
fn test_heartbeat_ticks_without_manual_reports() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();

    std::thread::sleep(Duration::from_millis(150));
    let monitor = repo.status_monitor(run.hash(), Duration::from_secs(1));
    let record = monitor.record().unwrap().expect("heartbeat wrote a record");

    assert!(record.check_in_idx >= 2);
    assert_eq!(record.next_expected_in, 1);
    assert_eq!(run.reporter_state(), ReporterState::Reporting);
}

#[test]
fn test_stalled_run_is_failed() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let fm = LocalFileManager::new(dir.path(), "stalled");
    let mut record = StatusRecord::new("stalled");
    record.check_in_idx = 4;
    record.next_expected_in = 5;
    record.last_check_in_time = Utc::now() - chrono::Duration::seconds(60);
    fs::write(fm.path(), serde_json::to_vec(&record).unwrap()).unwrap();

    assert_eq!(
        repo.run_health("stalled", Duration::from_secs(10)).unwrap(),
        Some(RunHealth::Failed)
    );
    assert_eq!(
        repo.run_health("stalled", Duration::from_secs(120)).unwrap(),
        Some(RunHealth::Running)
    );
}

#[test]
fn test_resume_continues_check_in_counter_and_clears_finish() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let hash = {
        let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();
        run.report_successful_finish(true).unwrap();
        run.hash().to_string()
    };
    let before = read_record(&dir, &hash).check_in_idx;

    let resumed = Run::builder(&repo).hash(&hash).reporter(fast_reporter()).open().unwrap();
    resumed.report_progress(60, true).unwrap();

    let after = read_record(&dir, &hash);
    assert!(after.check_in_idx > before);
    assert!(!after.successfully_finished);
}

#[test]
fn test_disabled_reporter_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo)
        .reporter(ReporterConfig::new().with_enabled(false))
        .open()
        .unwrap();
    let hash = run.hash().to_string();
    run.close().unwrap();

    assert_eq!(run.reporter_state(), ReporterState::Inactive);
    assert_eq!(repo.run_health(&hash, Duration::ZERO).unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_from_async_context() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();
    let hash = run.hash().to_string();

    run.report_progress(60, true).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    run.close().unwrap();

    assert_eq!(run.reporter_state(), ReporterState::Stopped);
    assert!(read_record(&dir, &hash).check_in_idx >= 1);
}

#[tokio::test]
async fn test_drop_from_current_thread_runtime() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo).reporter(fast_reporter()).open().unwrap();
    let hash = run.hash().to_string();

    run.report_successful_finish(true).unwrap();
    drop(run);

    let record = read_record(&dir, &hash);
    assert!(record.successfully_finished);
    assert!(!dir.path().join("locks").join(format!("{hash}.lock")).exists());
}
