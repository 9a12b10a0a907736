//! Training Loop Example
//!
//! Demonstrates a run's lifecycle in a simulated training loop: hyperparameters,
//! per-subset metrics, liveness reporting and a final sequence overview.
//!
//! Run with: RUST_LOG=trueno_tracker=debug cargo run --example training_loop

use std::time::Duration;

use anyhow::Context as _;
use serde_json::json;
use tracing_subscriber::EnvFilter;
use trueno_tracker::{Context, Repo, ReporterConfig, Run, RunHealth};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Trueno-Tracker Training Loop ===\n");

    let dir = tempfile_dir()?;
    let repo = Repo::local(&dir).context("opening repository")?;

    // -------------------------------------------------------------------------
    // 1. Open a run
    // -------------------------------------------------------------------------
    let run = Run::builder(&repo)
        .experiment("resnet-ablation")
        .log_system_params(true)
        .reporter(ReporterConfig::new().with_heartbeat_interval(Duration::from_secs(1)))
        .open()
        .context("opening run")?;
    println!("1. Run {} opened in {}", run.hash(), dir.display());

    run.set(
        "hparams",
        &json!({"model": "resnet50", "lr": 0.001, "batch_size": 32, "epochs": 5}),
    )?;
    run.props().add_tag("demo")?;

    // -------------------------------------------------------------------------
    // 2. Simulate training
    // -------------------------------------------------------------------------
    println!("\n2. Training (5 epochs x 20 steps)...");
    let train = Context::new().with("subset", "train");
    let val = Context::new().with("subset", "val");

    for epoch in 0..5u32 {
        for batch in 0..20u32 {
            let step = u64::from(epoch * 20 + batch);
            let loss = 2.5 / f64::from(epoch * 20 + batch + 1) + 0.1;
            run.track("loss", loss, Some(step), Some(epoch.into()), &train)?;
        }
        let val_acc = 0.5 + 0.08 * f64::from(epoch);
        run.track("accuracy", val_acc, None, Some(epoch.into()), &val)?;
        run.report_progress(30, false)?;
        println!("   epoch {epoch}: val accuracy {val_acc:.2}");
    }

    // -------------------------------------------------------------------------
    // 3. Inspect what was tracked
    // -------------------------------------------------------------------------
    println!("\n3. Sequence overview:");
    for (kind, entries) in run.collect_sequence_info(&["metric", "images"], false)? {
        for entry in entries {
            println!("   [{kind}] {} {} last={:?}", entry.name, entry.context, entry.last_value);
        }
    }

    let loss = run.metric("loss", &train)?.context("loss sequence missing")?;
    println!("   loss: {} records, last step {:?}", loss.len(), loss.last_step());

    // -------------------------------------------------------------------------
    // 4. Finish
    // -------------------------------------------------------------------------
    run.report_successful_finish(true)?;
    run.close()?;
    let health = repo.run_health(run.hash(), Duration::from_secs(10))?;
    println!("\n4. Run closed, health: {health:?}");
    assert_eq!(health, Some(RunHealth::Finished));

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

fn tempfile_dir() -> anyhow::Result<std::path::PathBuf> {
    let dir = std::env::temp_dir().join(format!("trueno-tracker-demo-{}", std::process::id()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
