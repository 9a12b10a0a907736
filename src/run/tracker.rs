//! Append path of `Run::track`.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::props::utc_timestamp;
use crate::context::{Context, ContextRegistry};
use crate::sequence::{DType, SequenceRecord, TraceArea, TraceInfo, TrackedValue};
use crate::{Error, Result};

/// Appends values to a run's sequences.
///
/// Trace metadata is cached per `(context index, name)` after the first
/// lookup. One lock covers the whole append so records of a sequence are
/// written in call order and `count` always matches the series keys.
pub(crate) struct RunTracker {
    area: TraceArea,
    infos: Mutex<FxHashMap<(u64, String), TraceInfo>>,
}

impl RunTracker {
    pub(crate) fn new(area: TraceArea) -> Self {
        Self {
            area,
            infos: Mutex::new(FxHashMap::default()),
        }
    }

    pub(crate) fn track(
        &self,
        contexts: &ContextRegistry,
        name: &str,
        value: TrackedValue,
        step: Option<u64>,
        epoch: Option<u64>,
        context: &Context,
    ) -> Result<()> {
        let context_idx = contexts.context_to_index(context)?;
        let mut infos = self.infos.lock();
        let key = (context_idx, name.to_string());

        let mut info = match infos.get(&key) {
            Some(info) => info.clone(),
            None => self.area.info(context_idx, name)?.unwrap_or_default(),
        };

        let (dtype, value) = reconcile(name, &info, value)?;
        let step = step.unwrap_or_else(|| info.last_step.map_or(0, |last| last + 1));
        let stored = value.to_json()?;

        let record = SequenceRecord {
            step,
            epoch,
            time: utc_timestamp(),
            value: stored.clone(),
        };
        self.area.append(context_idx, name, info.count, &record)?;

        info.dtype = Some(dtype.as_str().to_string());
        info.count += 1;
        info.first_step.get_or_insert(step);
        info.last_step = Some(step);
        info.last = Some(stored);
        self.area.set_info(context_idx, name, &info)?;

        infos.insert(key, info);
        Ok(())
    }

    /// Forget cached metadata (on close).
    pub(crate) fn clear(&self) {
        self.infos.lock().clear();
    }
}

/// Dtype the sequence has after appending `value`, and the value to store.
///
/// Numeric sequences widen: an `int` sequence receiving a float becomes a
/// `float` sequence, and ints appended to a `float` sequence are stored as
/// floats. Any other mismatch is rejected.
#[allow(clippy::cast_precision_loss)]
fn reconcile(name: &str, info: &TraceInfo, value: TrackedValue) -> Result<(DType, TrackedValue)> {
    let value_dtype = value.dtype();
    let sequence_dtype = match info.dtype.as_deref() {
        Some(stored) => DType::parse(stored),
        // Metadata without a dtype belongs to a legacy float sequence.
        None if info.count > 0 => Some(DType::Float),
        None => return Ok((value_dtype, value)),
    };

    match (sequence_dtype, value) {
        (Some(seq), value) if seq == value_dtype => Ok((seq, value)),
        (Some(DType::Float), TrackedValue::Int(v)) => Ok((DType::Float, TrackedValue::Float(v as f64))),
        (Some(DType::Int), value @ TrackedValue::Float(_)) => Ok((DType::Float, value)),
        _ => Err(Error::IncompatibleValue {
            name: name.to_string(),
            sequence_dtype: info.effective_dtype().to_string(),
            value_dtype: value_dtype.to_string(),
        }),
    }
}
