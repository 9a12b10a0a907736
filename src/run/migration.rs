//! Metric format migration
//!
//! Format 1 stored each sequence as parallel arrays:
//!
//! ```text
//! series/v1/{ctx}/{name} = {"val": [..], "step": [..], "epoch": [..], "time": [..]}
//! ```
//!
//! Format 2 stores one record per key under `series/v2/{ctx}/{name}/{n}`.
//! Migration rewrites every v1 sequence as v2 records, refreshes the trace
//! metadata and only then drops the v1 entry, so an interrupted migration
//! can be re-run: already-written v2 keys are overwritten with the same data.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::reporter::write_atomic;
use crate::sequence::{record_key, SequenceRecord, TraceInfo, SERIES_V2};
use crate::tree::TreeView;
use crate::{Error, Result};

/// Current metric format version.
pub const METRIC_FORMAT_VERSION: u64 = 2;

/// Directory (relative to the repository root) holding run backups.
pub const BACKUP_DIR: &str = "bcp";

const SERIES_V1: [&str; 2] = ["series", "v1"];
const FORMAT_VERSION_PATH: [&str; 2] = ["info", "metric_format_version"];

/// Outcome of a migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Sequences converted.
    pub sequences: usize,
    /// Records written.
    pub records: usize,
}

#[derive(Debug, Default, Deserialize)]
struct LegacySeries {
    #[serde(default)]
    val: Vec<Value>,
    #[serde(default)]
    step: Vec<Option<u64>>,
    #[serde(default)]
    epoch: Vec<Option<u64>>,
    #[serde(default)]
    time: Vec<Option<f64>>,
}

/// Stored metric format version; `None` if never recorded.
///
/// # Errors
///
/// Propagates storage failures.
pub fn metric_format_version(run_tree: &TreeView) -> Result<Option<u64>> {
    run_tree.get_as(&FORMAT_VERSION_PATH)
}

/// Whether the run still holds format-1 series.
///
/// # Errors
///
/// Propagates storage failures.
pub fn needs_migration(run_tree: &TreeView) -> Result<bool> {
    if metric_format_version(run_tree)?.unwrap_or(0) >= METRIC_FORMAT_VERSION {
        return Ok(false);
    }
    Ok(!run_tree.subtree(&SERIES_V1).is_empty()?)
}

/// Record the current format version.
pub(crate) fn mark_current(run_tree: &TreeView) -> Result<()> {
    run_tree.set_as(&FORMAT_VERSION_PATH, &METRIC_FORMAT_VERSION)
}

/// Location of the backup of `run_hash`.
#[must_use]
pub fn backup_path(root: &Path, run_hash: &str) -> PathBuf {
    root.join(BACKUP_DIR).join(format!("{run_hash}.json"))
}

/// Write the whole run subtree to `<root>/bcp/<hash>.json`.
///
/// The file is replaced atomically, so a crash leaves either the previous
/// backup or the new one.
///
/// # Errors
///
/// Returns error if the run subtree cannot be read or the file written.
pub fn backup_run(root: &Path, run_hash: &str, run_tree: &TreeView) -> Result<PathBuf> {
    let snapshot = run_tree.collect_all()?;
    let path = backup_path(root, run_hash);
    write_atomic(&path, &serde_json::to_vec(&snapshot)?)?;
    tracing::debug!(run_hash, path = %path.display(), "run backup written");
    Ok(path)
}

/// Replace the run subtree with its backup.
///
/// # Errors
///
/// Returns `Error::NotFound` if there is no backup for the run.
pub fn restore_run(root: &Path, run_hash: &str, run_tree: &TreeView) -> Result<()> {
    let path = backup_path(root, run_hash);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::NotFound(format!("backup of run {run_hash} at {}", path.display())));
        }
        Err(e) => return Err(e.into()),
    };
    let snapshot: Value = serde_json::from_slice(&bytes)?;
    run_tree.set::<&str>(&[], snapshot)?;
    tracing::info!(run_hash, path = %path.display(), "run restored from backup");
    Ok(())
}

/// Convert every format-1 sequence of the run to format 2.
///
/// # Errors
///
/// Returns the first storage or decoding failure; sequences converted before
/// it stay converted.
pub fn migrate_metrics(run_tree: &TreeView) -> Result<MigrationReport> {
    let legacy = run_tree.subtree(&SERIES_V1);
    let traces = run_tree.subtree(&["traces"]);
    let series = run_tree.subtree(&SERIES_V2);
    let mut report = MigrationReport::default();

    for ctx_key in legacy.keys::<&str>(&[])? {
        for name in legacy.keys(&[ctx_key.as_str()])? {
            let path = [ctx_key.as_str(), name.as_str()];
            let arrays: LegacySeries = legacy.get_as(&path)?.unwrap_or_default();
            let written = convert_sequence(&arrays, &series.subtree(&path))?;

            let mut info: TraceInfo = traces.get_as(&path)?.unwrap_or_default();
            apply_summary(&mut info, &arrays);
            traces.set_as(&path, &info)?;

            legacy.delete(&path)?;
            report.sequences += 1;
            report.records += written;
        }
    }

    run_tree.delete(&SERIES_V1)?;
    mark_current(run_tree)?;
    Ok(report)
}

fn legacy_record(arrays: &LegacySeries, i: usize) -> SequenceRecord {
    SequenceRecord {
        step: arrays.step.get(i).copied().flatten().unwrap_or(i as u64),
        epoch: arrays.epoch.get(i).copied().flatten(),
        time: arrays.time.get(i).copied().flatten().unwrap_or(0.0),
        value: arrays.val[i].clone(),
    }
}

fn convert_sequence(arrays: &LegacySeries, target: &TreeView) -> Result<usize> {
    for i in 0..arrays.val.len() {
        target.set_as(&[record_key(i as u64)], &legacy_record(arrays, i))?;
    }
    Ok(arrays.val.len())
}

fn apply_summary(info: &mut TraceInfo, arrays: &LegacySeries) {
    let count = arrays.val.len();
    info.count = count as u64;
    if count == 0 {
        return;
    }
    info.first_step = Some(legacy_record(arrays, 0).step);
    let last = legacy_record(arrays, count - 1);
    info.last_step = Some(last.step);
    info.last = Some(last.value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MemoryTree;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn legacy_run() -> TreeView {
        let run_tree = TreeView::new(Arc::new(MemoryTree::new())).subtree(&["runs", "r1"]);
        run_tree
            .set(
                &["series", "v1", "7", "loss"],
                json!({"val": [0.9, 0.5, 0.2], "step": [0, 5, 10], "epoch": [0, 0, 1], "time": [1.0, 2.0, 3.0]}),
            )
            .unwrap();
        run_tree.set(&["traces", "7", "loss"], json!({"last": 0.2})).unwrap();
        run_tree
    }

    #[test]
    fn test_needs_migration() {
        let run_tree = legacy_run();
        assert!(needs_migration(&run_tree).unwrap());

        let fresh = TreeView::new(Arc::new(MemoryTree::new())).subtree(&["runs", "r2"]);
        assert!(!needs_migration(&fresh).unwrap());
    }

    #[test]
    fn test_migrate_converts_parallel_arrays() {
        let run_tree = legacy_run();

        let report = migrate_metrics(&run_tree).unwrap();

        assert_eq!(report, MigrationReport { sequences: 1, records: 3 });
        assert!(!needs_migration(&run_tree).unwrap());
        assert_eq!(metric_format_version(&run_tree).unwrap(), Some(2));
        assert_eq!(run_tree.get(&["series", "v1"]).unwrap(), None);

        let second: SequenceRecord = run_tree
            .get_as(&["series", "v2", "7", "loss", record_key(1).as_str()])
            .unwrap()
            .unwrap();
        assert_eq!(second.step, 5);
        assert_eq!(second.epoch, Some(0));
        assert_eq!(second.value, json!(0.5));

        let info: TraceInfo = run_tree.get_as(&["traces", "7", "loss"]).unwrap().unwrap();
        assert_eq!(info.count, 3);
        assert_eq!(info.first_step, Some(0));
        assert_eq!(info.last_step, Some(10));
        assert_eq!(info.effective_dtype(), "float");
    }

    #[test]
    fn test_missing_steps_fall_back_to_position() {
        let run_tree = TreeView::new(Arc::new(MemoryTree::new())).subtree(&["runs", "r1"]);
        run_tree
            .set(&["series", "v1", "0", "acc"], json!({"val": [1, 2]}))
            .unwrap();

        migrate_metrics(&run_tree).unwrap();

        let info: TraceInfo = run_tree.get_as(&["traces", "0", "acc"]).unwrap().unwrap();
        assert_eq!(info.last_step, Some(1));
    }

    #[test]
    fn test_backup_and_restore() {
        let dir = TempDir::new().unwrap();
        let run_tree = legacy_run();
        let original = run_tree.collect_all().unwrap();

        let path = backup_run(dir.path(), "r1", &run_tree).unwrap();
        assert!(path.ends_with("bcp/r1.json"));

        migrate_metrics(&run_tree).unwrap();
        assert_ne!(run_tree.collect_all().unwrap(), original);

        restore_run(dir.path(), "r1", &run_tree).unwrap();
        assert_eq!(run_tree.collect_all().unwrap(), original);
    }

    #[test]
    fn test_restore_without_backup() {
        let dir = TempDir::new().unwrap();
        let run_tree = legacy_run();
        assert!(restore_run(dir.path(), "r1", &run_tree).unwrap_err().is_not_found());
    }
}
