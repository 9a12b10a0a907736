//! Run open/close lifecycle: locking, finalization, teardown ordering

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use trueno_tracker::tree::{MemoryTree, TreeStore};
use trueno_tracker::{Context, Error, Repo, ReporterConfig, ReporterState, Run};

fn quiet() -> ReporterConfig {
    ReporterConfig::new().with_enabled(false)
}

fn local_repo() -> (TempDir, Repo) {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    (dir, repo)
}

#[test]
fn test_close_is_idempotent_and_stamps_end_time_once() {
    let (_dir, repo) = local_repo();
    let run = Run::builder(&repo).reporter(quiet()).open().unwrap();
    run.track("loss", 0.5, None, None, &Context::new()).unwrap();

    run.close().unwrap();
    let end_time = run.props().end_time().unwrap();
    run.close().unwrap();

    assert!(end_time.is_some());
    assert_eq!(run.props().end_time().unwrap(), end_time);
    assert!(run.is_closed());
    assert!(!run.props().active().unwrap());
}

#[test]
fn test_writes_after_close_rejected() {
    let (_dir, repo) = local_repo();
    let run = Run::builder(&repo).reporter(quiet()).open().unwrap();
    run.close().unwrap();

    assert!(matches!(
        run.track("loss", 0.1, None, None, &Context::new()).unwrap_err(),
        Error::RunFinalized(_)
    ));
    assert!(matches!(run.set("k", &1).unwrap_err(), Error::RunFinalized(_)));
}

#[test]
fn test_second_writer_is_locked_out() {
    let (_dir, repo) = local_repo();
    let first = Run::builder(&repo).reporter(quiet()).open().unwrap();

    let err = Run::builder(&repo)
        .hash(first.hash())
        .reporter(quiet())
        .open()
        .unwrap_err();

    assert!(matches!(err, Error::Locked { ref run_hash, .. } if run_hash == first.hash()));
    assert!(err.to_string().contains("force_resume"));
}

#[test]
fn test_force_resume_reclaims_lock() {
    let (_dir, repo) = local_repo();
    let stalled = Run::builder(&repo).reporter(quiet()).open().unwrap();
    let hash = stalled.hash().to_string();

    let resumed = Run::builder(&repo)
        .hash(&hash)
        .force_resume(true)
        .reporter(quiet())
        .open()
        .unwrap();
    resumed.set("owner", &"resumed").unwrap();

    // Closing the stalled writer must not release the reclaimed lock.
    stalled.close().unwrap();
    assert!(matches!(
        Run::builder(&repo).hash(&hash).reporter(quiet()).open().unwrap_err(),
        Error::Locked { .. }
    ));

    resumed.close().unwrap();
    assert!(Run::builder(&repo).hash(&hash).reporter(quiet()).open().is_ok());
}

#[test]
fn test_drop_closes_run() {
    let (_dir, repo) = local_repo();
    let hash = {
        let run = Run::builder(&repo).reporter(quiet()).open().unwrap();
        run.set("epochs", &3).unwrap();
        run.hash().to_string()
    };

    let reader = Run::builder(&repo).hash(&hash).read_only(true).open().unwrap();
    assert!(reader.props().end_time().unwrap().is_some());
    assert_eq!(reader.get("epochs").unwrap(), Some(json!(3)));
    assert!(Run::builder(&repo).hash(&hash).reporter(quiet()).open().is_ok());
}

#[test]
fn test_resume_clears_end_time_and_keeps_attrs() {
    let (_dir, repo) = local_repo();
    let hash = {
        let run = Run::builder(&repo).experiment("exp-a").reporter(quiet()).open().unwrap();
        run.set("hparams", &json!({"lr": 0.1})).unwrap();
        run.hash().to_string()
    };

    let resumed = Run::builder(&repo).hash(&hash).reporter(quiet()).open().unwrap();

    assert_eq!(resumed.props().end_time().unwrap(), None);
    assert_eq!(resumed.get_path(&["hparams", "lr"]).unwrap(), Some(json!(0.1)));
    assert_eq!(resumed.props().experiment().unwrap().as_deref(), Some("exp-a"));
}

#[test]
fn test_read_only_open() {
    let (_dir, repo) = local_repo();
    assert!(Run::builder(&repo)
        .hash("missing")
        .read_only(true)
        .open()
        .unwrap_err()
        .is_not_found());

    let writer = Run::builder(&repo).reporter(quiet()).open().unwrap();
    writer.set("k", &"v").unwrap();

    // A reader never takes the lock, even while the writer is open.
    let reader = Run::builder(&repo).hash(writer.hash()).read_only(true).open().unwrap();
    assert_eq!(reader.get("k").unwrap(), Some(json!("v")));
    assert!(matches!(reader.set("k", &"w").unwrap_err(), Error::ReadOnly(_)));
    assert!(matches!(
        reader.track("loss", 1.0, None, None, &Context::new()).unwrap_err(),
        Error::ReadOnly(_)
    ));
    assert_eq!(reader.reporter_state(), ReporterState::Inactive);

    reader.close().unwrap();
    assert_eq!(writer.props().end_time().unwrap(), None);
}

#[test]
fn test_extra_resources_close_before_lock_release() {
    let (dir, repo) = local_repo();
    let run = Run::builder(&repo).reporter(quiet()).open().unwrap();
    let lock_path = dir.path().join("locks").join(format!("{}.lock", run.hash()));
    let seen = Arc::new(Mutex::new(Vec::new()));

    {
        let seen = Arc::clone(&seen);
        let lock_path = lock_path.clone();
        run.add_extra_resource(move || -> trueno_tracker::Result<()> {
            seen.lock().push(lock_path.exists());
            Ok(())
        });
    }
    run.close().unwrap();

    assert_eq!(*seen.lock(), vec![true]);
    assert!(!lock_path.exists());
}

/// Tree store that rejects every write.
struct RejectingTree(MemoryTree);

impl TreeStore for RejectingTree {
    fn get(&self, path: &[String]) -> trueno_tracker::Result<Option<Value>> {
        self.0.get(path)
    }

    fn set(&self, _path: &[String], _value: Value) -> trueno_tracker::Result<()> {
        Err(Error::Storage("disk full".into()))
    }

    fn delete(&self, path: &[String]) -> trueno_tracker::Result<()> {
        self.0.delete(path)
    }

    fn keys(&self, path: &[String]) -> trueno_tracker::Result<Vec<String>> {
        self.0.keys(path)
    }
}

#[test]
fn test_failed_open_releases_lock() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local_with_tree(dir.path(), Arc::new(RejectingTree(MemoryTree::new()))).unwrap();

    let err = Run::builder(&repo).hash("r1").reporter(quiet()).open().unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert!(!dir.path().join("locks").join("r1.lock").exists());
}

#[test]
fn test_system_params_recorded() {
    let (_dir, repo) = local_repo();
    let run = Run::builder(&repo)
        .log_system_params(true)
        .reporter(quiet())
        .open()
        .unwrap();

    let params = run.get("__system_params").unwrap().unwrap();
    for key in ["packages", "env_variables", "git_info", "executable", "arguments"] {
        assert!(params.get(key).is_some(), "missing {key}");
    }
}
