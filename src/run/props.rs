//! Structured run properties
//!
//! Stored under `runs/{hash}/props`, except `end_time` which lives at the run
//! root so finalization is a single key write.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::tree::TreeView;
use crate::{Error, Result};

/// Experiment assigned to runs created without one.
pub const DEFAULT_EXPERIMENT: &str = "default";

/// Current time as UTC epoch seconds.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn utc_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Convert UTC epoch seconds to a `DateTime`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn from_timestamp(timestamp: f64) -> Option<DateTime<Utc>> {
    if !timestamp.is_finite() {
        return None;
    }
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

/// Name, tags, timestamps and other user-facing properties of a run.
#[derive(Debug, Clone)]
pub struct RunProps {
    run_hash: String,
    props: TreeView,
    run_tree: TreeView,
    writable: bool,
}

impl RunProps {
    pub(crate) fn new(run_hash: &str, run_tree: &TreeView, writable: bool) -> Self {
        Self {
            run_hash: run_hash.to_string(),
            props: run_tree.subtree(&["props"]),
            run_tree: run_tree.clone(),
            writable,
        }
    }

    fn guard(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::ReadOnly(self.run_hash.clone()))
        }
    }

    fn text(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .props
            .get_as::<Option<String>, _>(&[key])?
            .flatten())
    }

    fn set_text(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.guard()?;
        self.props
            .set(&[key], value.map_or(Value::Null, |v| Value::String(v.to_string())))
    }

    /// Record `creation_time` unless already set.
    pub(crate) fn init_creation_time(&self) -> Result<()> {
        if self.creation_time()?.is_none() {
            self.props.set_as(&["creation_time"], &utc_timestamp())?;
        }
        Ok(())
    }

    /// Run name.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn name(&self) -> Result<Option<String>> {
        self.text("name")
    }

    /// Set or clear the run name.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn set_name(&self, name: Option<&str>) -> Result<()> {
        self.set_text("name", name)
    }

    /// Run description.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn description(&self) -> Result<Option<String>> {
        self.text("description")
    }

    /// Set or clear the run description.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn set_description(&self, description: Option<&str>) -> Result<()> {
        self.set_text("description", description)
    }

    /// Experiment label.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn experiment(&self) -> Result<Option<String>> {
        self.text("experiment")
    }

    /// Set the experiment label.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn set_experiment(&self, experiment: &str) -> Result<()> {
        self.set_text("experiment", Some(experiment))
    }

    /// Whether the run is archived.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn archived(&self) -> Result<bool> {
        Ok(self.props.get_as::<bool, _>(&["archived"])?.unwrap_or(false))
    }

    /// Archive or un-archive the run.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn set_archived(&self, archived: bool) -> Result<()> {
        self.guard()?;
        self.props.set(&["archived"], Value::Bool(archived))
    }

    /// Tags in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn tags(&self) -> Result<Vec<String>> {
        Ok(self.props.get_as(&["tags"])?.unwrap_or_default())
    }

    /// Add a tag; returns `false` if it was already present.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn add_tag(&self, tag: &str) -> Result<bool> {
        self.guard()?;
        let mut tags = self.tags()?;
        if tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        tags.push(tag.to_string());
        self.props.set_as(&["tags"], &tags)?;
        Ok(true)
    }

    /// Remove a tag; returns `false` if it was not present.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs.
    pub fn remove_tag(&self, tag: &str) -> Result<bool> {
        self.guard()?;
        let mut tags = self.tags()?;
        let before = tags.len();
        tags.retain(|t| t != tag);
        if tags.len() == before {
            return Ok(false);
        }
        self.props.set_as(&["tags"], &tags)?;
        Ok(true)
    }

    /// Creation time (UTC epoch seconds).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn creation_time(&self) -> Result<Option<f64>> {
        self.props.get_as(&["creation_time"])
    }

    /// Creation time as a `DateTime`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn created_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.creation_time()?.and_then(from_timestamp))
    }

    /// Finalization time (UTC epoch seconds); `None` while active.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn end_time(&self) -> Result<Option<f64>> {
        Ok(self
            .run_tree
            .get_as::<Option<f64>, _>(&["end_time"])?
            .flatten())
    }

    /// Finalization time as a `DateTime`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn finalized_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.end_time()?.and_then(from_timestamp))
    }

    /// Whether the run has not been finalized.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn active(&self) -> Result<bool> {
        Ok(self.end_time()?.is_none())
    }

    /// Seconds between creation and finalization (or now, while active).
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the run has no creation time.
    pub fn duration(&self) -> Result<f64> {
        let created = self
            .creation_time()?
            .ok_or_else(|| Error::NotFound(format!("creation_time of run {}", self.run_hash)))?;
        let end = self.end_time()?.unwrap_or_else(utc_timestamp);
        Ok(end - created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::MemoryTree;
    use std::sync::Arc;

    fn props(writable: bool) -> (TreeView, RunProps) {
        let run_tree = TreeView::new(Arc::new(MemoryTree::new())).subtree(&["runs", "r1"]);
        let props = RunProps::new("r1", &run_tree, writable);
        (run_tree, props)
    }

    #[test]
    fn test_text_props() {
        let (_, props) = props(true);
        assert_eq!(props.name().unwrap(), None);

        props.set_name(Some("baseline")).unwrap();
        props.set_description(Some("lr sweep")).unwrap();
        assert_eq!(props.name().unwrap().as_deref(), Some("baseline"));
        assert_eq!(props.description().unwrap().as_deref(), Some("lr sweep"));

        props.set_name(None).unwrap();
        assert_eq!(props.name().unwrap(), None);
    }

    #[test]
    fn test_tags_add_remove() {
        let (_, props) = props(true);
        assert!(props.add_tag("gpu").unwrap());
        assert!(props.add_tag("sweep").unwrap());
        assert!(!props.add_tag("gpu").unwrap());
        assert_eq!(props.tags().unwrap(), vec!["gpu", "sweep"]);

        assert!(props.remove_tag("gpu").unwrap());
        assert!(!props.remove_tag("gpu").unwrap());
        assert_eq!(props.tags().unwrap(), vec!["sweep"]);
    }

    #[test]
    fn test_active_and_duration() {
        let (run_tree, props) = props(true);
        props.props.set_as(&["creation_time"], &100.0).unwrap();
        run_tree.set(&["end_time"], Value::Null).unwrap();
        assert!(props.active().unwrap());

        run_tree.set_as(&["end_time"], &160.5).unwrap();
        assert!(!props.active().unwrap());
        assert!((props.duration().unwrap() - 60.5).abs() < f64::EPSILON);
        assert_eq!(props.finalized_at().unwrap().unwrap().timestamp(), 160);
    }

    #[test]
    fn test_creation_time_set_once() {
        let (_, props) = props(true);
        props.init_creation_time().unwrap();
        let first = props.creation_time().unwrap().unwrap();
        props.init_creation_time().unwrap();
        assert_eq!(props.creation_time().unwrap().unwrap(), first);
        assert!(props.created_at().unwrap().is_some());
    }

    #[test]
    fn test_read_only_props_reject_writes() {
        let (_, props) = props(false);
        assert!(matches!(props.set_archived(true).unwrap_err(), Error::ReadOnly(_)));
        assert!(matches!(props.add_tag("x").unwrap_err(), Error::ReadOnly(_)));
        assert!(!props.archived().unwrap());
    }

    #[test]
    fn test_from_timestamp() {
        let dt = from_timestamp(1.5).unwrap();
        assert_eq!(dt.timestamp(), 1);
        assert_eq!(dt.timestamp_subsec_millis(), 500);
        assert!(from_timestamp(f64::NAN).is_none());
    }
}
