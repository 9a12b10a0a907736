//! Typed sequences and sequence-kind dispatch
//!
//! A sequence is the append-only log of values tracked under one
//! `(name, context)` pair of a run. Two areas of the run tree hold it:
//!
//! ```text
//! traces/{context_idx}/{name}          TraceInfo (dtype, count, steps, last value)
//! series/v2/{context_idx}/{name}/{n}   SequenceRecord n (zero-padded append index)
//! ```
//!
//! Sequences written before dtypes were recorded have no `dtype` entry; they
//! are treated as `float` sequences.

mod kind;
mod values;

pub use kind::{SequenceKind, SequenceRegistry};
pub use values::{Audio, DType, Distribution, Image, TrackedValue};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Context;
use crate::run::Run;
use crate::tree::TreeView;
use crate::Result;

/// Dtype assumed for sequences with no stored dtype.
pub const DEFAULT_DTYPE: DType = DType::Float;

/// Path of the current series layout inside a run tree.
pub(crate) const SERIES_V2: [&str; 2] = ["series", "v2"];

/// Width of the zero-padded append index so keys sort in append order.
const RECORD_KEY_WIDTH: usize = 12;

/// Formats a record key so lexical and append order agree.
pub(crate) fn record_key(seq_no: u64) -> String {
    format!("{seq_no:0width$}", width = RECORD_KEY_WIDTH)
}

/// Per-sequence metadata stored under `traces/{context_idx}/{name}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceInfo {
    /// Declared dtype name; absent for legacy sequences.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtype: Option<String>,
    /// Number of records appended.
    #[serde(default)]
    pub count: u64,
    /// Step of the first record.
    #[serde(default)]
    pub first_step: Option<u64>,
    /// Step of the most recent record.
    #[serde(default)]
    pub last_step: Option<u64>,
    /// Most recent value.
    #[serde(default)]
    pub last: Option<Value>,
}

impl TraceInfo {
    /// Dtype name with the legacy default applied.
    #[must_use]
    pub fn effective_dtype(&self) -> &str {
        self.dtype.as_deref().unwrap_or(DEFAULT_DTYPE.as_str())
    }
}

/// One tracked record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceRecord {
    /// Caller-supplied or auto-incremented step.
    pub step: u64,
    /// Optional training epoch.
    #[serde(default)]
    pub epoch: Option<u64>,
    /// Wall-clock time (UTC epoch seconds).
    pub time: f64,
    /// Stored value.
    pub value: Value,
}

/// Read/write helper over a run's `traces` and `series` areas.
#[derive(Debug, Clone)]
pub(crate) struct TraceArea {
    run_hash: String,
    traces: TreeView,
    series: TreeView,
}

impl TraceArea {
    pub(crate) fn new(run_hash: &str, run_tree: &TreeView) -> Self {
        Self {
            run_hash: run_hash.to_string(),
            traces: run_tree.subtree(&["traces"]),
            series: run_tree.subtree(&SERIES_V2),
        }
    }

    pub(crate) fn run_hash(&self) -> &str {
        &self.run_hash
    }

    pub(crate) fn info(&self, context_idx: u64, name: &str) -> Result<Option<TraceInfo>> {
        self.traces.get_as(&[context_idx.to_string().as_str(), name])
    }

    pub(crate) fn set_info(&self, context_idx: u64, name: &str, info: &TraceInfo) -> Result<()> {
        self.traces
            .set_as(&[context_idx.to_string().as_str(), name], info)
    }

    pub(crate) fn append(
        &self,
        context_idx: u64,
        name: &str,
        seq_no: u64,
        record: &SequenceRecord,
    ) -> Result<()> {
        self.series.set_as(
            &[context_idx.to_string().as_str(), name, record_key(seq_no).as_str()],
            record,
        )
    }

    pub(crate) fn series(&self, context_idx: u64, name: &str) -> TreeView {
        self.series.subtree(&[context_idx.to_string().as_str(), name])
    }

    /// Snapshot of all `(context_idx, name)` pairs present right now.
    pub(crate) fn keys(&self) -> Result<Vec<(u64, String)>> {
        let mut pairs = Vec::new();
        for ctx_key in self.traces.keys::<&str>(&[])? {
            let Ok(idx) = ctx_key.parse::<u64>() else {
                tracing::debug!(run_hash = %self.run_hash, key = %ctx_key, "skipping non-index trace key");
                continue;
            };
            for name in self.traces.keys(&[ctx_key.as_str()])? {
                pairs.push((idx, name));
            }
        }
        Ok(pairs)
    }
}

/// Typed view of one sequence.
#[derive(Debug, Clone)]
pub struct Sequence {
    kind: SequenceKind,
    name: String,
    context: Context,
    context_idx: u64,
    run_hash: String,
    info: TraceInfo,
    series: TreeView,
}

impl Sequence {
    fn new(
        kind: SequenceKind,
        name: &str,
        context: Context,
        context_idx: u64,
        info: TraceInfo,
        area: &TraceArea,
    ) -> Self {
        Self {
            kind,
            name: name.to_string(),
            context,
            context_idx,
            run_hash: area.run_hash().to_string(),
            info,
            series: area.series(context_idx, name),
        }
    }

    /// Kind this view was resolved through.
    #[must_use]
    pub const fn kind(&self) -> SequenceKind {
        self.kind
    }

    /// Sequence name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sequence context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Context index under which the sequence is stored.
    #[must_use]
    pub const fn context_idx(&self) -> u64 {
        self.context_idx
    }

    /// Hash of the owning run.
    #[must_use]
    pub fn run_hash(&self) -> &str {
        &self.run_hash
    }

    /// Stored dtype name (legacy default applied).
    #[must_use]
    pub fn dtype(&self) -> &str {
        self.info.effective_dtype()
    }

    /// Number of tracked records.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.info.count
    }

    /// Whether no value has been tracked.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.info.count == 0
    }

    /// Step of the most recent record.
    #[must_use]
    pub const fn last_step(&self) -> Option<u64> {
        self.info.last_step
    }

    /// Most recently tracked value, as stored.
    #[must_use]
    pub fn last_value(&self) -> Option<&Value> {
        self.info.last.as_ref()
    }

    /// Metadata snapshot taken when the view was resolved.
    #[must_use]
    pub const fn info(&self) -> &TraceInfo {
        &self.info
    }

    /// All records in append order.
    ///
    /// # Errors
    ///
    /// Propagates storage and decoding failures.
    pub fn records(&self) -> Result<Vec<SequenceRecord>> {
        let mut records = Vec::new();
        for key in self.series.keys::<&str>(&[])? {
            if let Some(record) = self.series.get_as(&[key.as_str()])? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// All values decoded with the sequence dtype, in append order.
    ///
    /// # Errors
    ///
    /// Propagates storage and decoding failures.
    pub fn values(&self) -> Result<Vec<TrackedValue>> {
        let dtype = DType::parse(self.dtype()).unwrap_or(DEFAULT_DTYPE);
        self.records()?
            .into_iter()
            .map(|record| TrackedValue::from_json(dtype, record.value))
            .collect()
    }

    /// All steps, in append order.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn steps(&self) -> Result<Vec<u64>> {
        Ok(self.records()?.into_iter().map(|record| record.step).collect())
    }
}

/// Which dtypes a sequence listing includes.
///
/// Matching is on stored dtype names, so names this crate has no [`DType`]
/// for (e.g. `list(image)`) can still be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DTypeFilter {
    /// Every sequence, including unknown dtypes.
    Any,
    /// Only the listed dtype names.
    Only(Vec<String>),
}

impl DTypeFilter {
    /// Filter over known dtypes.
    #[must_use]
    pub fn dtypes(dtypes: &[DType]) -> Self {
        Self::Only(dtypes.iter().map(|dtype| dtype.as_str().to_string()).collect())
    }

    /// Filter over dtype names; `*` selects everything.
    #[must_use]
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        if names.iter().any(|name| name.as_ref() == "*") {
            return Self::Any;
        }
        Self::Only(names.iter().map(|name| name.as_ref().to_string()).collect())
    }

    /// Whether a stored dtype name passes the filter.
    #[must_use]
    pub fn matches(&self, dtype: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Only(names) => names.iter().any(|name| name == dtype),
        }
    }
}

/// `(name, context, run)` triple yielded by sequence listings.
#[derive(Debug, Clone)]
pub struct SequenceInfo<'r> {
    /// Sequence name.
    pub name: String,
    /// Sequence context.
    pub context: Context,
    /// Owning run.
    pub run: &'r Run,
}

/// Lazy listing over the `(context, name)` pairs present at creation time.
///
/// Pairs added while iterating are not yielded; create a new iterator to
/// rescan.
pub struct SequenceInfoIter<'r> {
    run: &'r Run,
    area: TraceArea,
    filter: DTypeFilter,
    pending: std::vec::IntoIter<(u64, String)>,
}

impl<'r> SequenceInfoIter<'r> {
    pub(crate) fn new(run: &'r Run, area: TraceArea, filter: DTypeFilter) -> Result<Self> {
        let pending = area.keys()?.into_iter();
        Ok(Self {
            run,
            area,
            filter,
            pending,
        })
    }

    fn next_match(&mut self) -> Result<Option<SequenceInfo<'r>>> {
        for (context_idx, name) in self.pending.by_ref() {
            let info = self.area.info(context_idx, &name)?.unwrap_or_default();
            if !self.filter.matches(info.effective_dtype()) {
                continue;
            }
            let context = self.run.idx_to_ctx(context_idx)?;
            return Ok(Some(SequenceInfo {
                name,
                context,
                run: self.run,
            }));
        }
        Ok(None)
    }
}

impl<'r> Iterator for SequenceInfoIter<'r> {
    type Item = Result<SequenceInfo<'r>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_match().transpose()
    }
}

/// Entry of a run's sequence overview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceSummary {
    /// Sequence context as a mapping.
    pub context: Value,
    /// Sequence name.
    pub name: String,
    /// Most recently tracked value; absent when skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_value: Option<Value>,
}
