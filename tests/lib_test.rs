//! Tests for top-level Repo / Run API

use std::time::Duration;

use tempfile::TempDir;
use trueno_tracker::run::generate_run_hash;
use trueno_tracker::{Context, Repo, ReporterConfig, Run, SequenceKind, SequenceRegistry};

#[test]
fn test_run_new_generates_hash() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();

    let run = Run::new(&repo).unwrap();

    assert_eq!(run.hash().len(), generate_run_hash().len());
    assert!(!run.read_only());
    assert!(repo.run_exists(run.hash()).unwrap());
}

#[test]
fn test_run_open_with_hash() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();

    let run = Run::open(&repo, "my-run").unwrap();

    assert_eq!(run.hash(), "my-run");
    assert_eq!(repo.run_hashes().unwrap(), vec!["my-run"]);
}

#[test]
fn test_builder_chain() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let mut registry = SequenceRegistry::with_builtin_kinds();
    registry.register("metrics", SequenceKind::Metric);

    let run = Run::builder(&repo)
        .hash("chained")
        .experiment("ablation")
        .force_resume(false)
        .log_system_params(false)
        .reporter(
            ReporterConfig::new()
                .with_heartbeat_interval(Duration::from_secs(30))
                .with_grace_period(Duration::from_secs(5)),
        )
        .sequences(registry)
        .open()
        .unwrap();
    run.track("loss", 0.5, None, None, &Context::new()).unwrap();

    assert_eq!(run.props().experiment().unwrap().as_deref(), Some("ablation"));
    assert!(run.resolve("metrics", "loss", &Context::new()).unwrap().is_some());
    assert!(run.sequence_registry().names().contains(&"metrics"));
}

#[test]
fn test_repo_clone_shares_state() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let other = repo.clone();

    let run = Run::builder(&repo)
        .reporter(ReporterConfig::new().with_enabled(false))
        .open()
        .unwrap();

    assert!(other.run_exists(run.hash()).unwrap());
    assert_eq!(format!("{other:?}"), format!("{repo:?}"));
}

#[test]
fn test_props_roundtrip() {
    let dir = TempDir::new().unwrap();
    let repo = Repo::local(dir.path()).unwrap();
    let run = Run::builder(&repo)
        .reporter(ReporterConfig::new().with_enabled(false))
        .open()
        .unwrap();
    let props = run.props();

    props.set_name(Some("baseline")).unwrap();
    props.set_description(Some("first try")).unwrap();
    props.set_archived(true).unwrap();
    assert!(props.add_tag("gpu").unwrap());
    assert!(!props.add_tag("gpu").unwrap());

    assert_eq!(props.name().unwrap().as_deref(), Some("baseline"));
    assert_eq!(props.description().unwrap().as_deref(), Some("first try"));
    assert!(props.archived().unwrap());
    assert_eq!(props.tags().unwrap(), vec!["gpu"]);
    assert!(props.created_at().unwrap().is_some());
    assert!(props.duration().unwrap() >= 0.0);
}
