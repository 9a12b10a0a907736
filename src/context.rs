//! Context registry: content-addressed indices for sequence contexts.
//!
//! A [`Context`] is an immutable mapping of string keys to scalars (for example
//! `{"subset": "train"}`) qualifying a sequence. Sequences are stored under
//! `traces/{index}/{name}`, where `index` is derived from the context content
//! by hashing its canonical (sorted-key) JSON encoding with `trueno::hash_key`.
//!
//! ## Invariants
//!
//! - The same context content always maps to the same index within one run.
//! - An index that already holds a different context is never reused: on a
//!   hash collision the registry probes the next free index.
//! - Lookups are structural, so repeated calls with equal contexts do not grow
//!   the cache.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tree::TreeView;
use crate::{Error, Result};

fn check_scalar(key: &str, value: &Value) -> Result<()> {
    if value.is_object() || value.is_array() {
        return Err(Error::InvalidContext(format!(
            "value for '{key}' must be a scalar, got {value}"
        )));
    }
    Ok(())
}

/// Immutable attribute mapping qualifying a sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(BTreeMap<String, Value>);

impl Context {
    /// Empty context (`{}`).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object of scalars.
    ///
    /// `null` is accepted as the empty context.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidContext` for non-objects and for nested values.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                let mut entries = BTreeMap::new();
                for (key, value) in map {
                    check_scalar(&key, &value)?;
                    entries.insert(key, value);
                }
                Ok(Self(entries))
            }
            other => Err(Error::InvalidContext(format!(
                "expected a mapping, got {other}"
            ))),
        }
    }

    /// Return a copy with one more entry.
    ///
    /// `value` must be a scalar; use [`Context::try_with`] when it may not be.
    /// A non-scalar context is rejected when it is indexed.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let (key, value) = (key.into(), value.into());
        debug_assert!(
            check_scalar(&key, &value).is_ok(),
            "context value for '{key}' must be a scalar"
        );
        self.0.insert(key, value);
        self
    }

    /// Return a copy with one more entry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidContext` if `value` is an array or an object.
    pub fn try_with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        let (key, value) = (key.into(), value.into());
        check_scalar(&key, &value)?;
        self.0.insert(key, value);
        Ok(self)
    }

    /// Check that every entry is a scalar.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidContext` for the first nested value.
    pub fn validate(&self) -> Result<()> {
        self.0.iter().try_for_each(|(key, value)| check_scalar(key, value))
    }

    /// Entry for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this is the empty context.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Context as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Canonical encoding: compact JSON with sorted keys.
    #[must_use]
    pub fn canonical(&self) -> String {
        // BTreeMap iteration is sorted, so the encoding is content-addressed.
        serde_json::to_string(&self.0).unwrap_or_else(|_| String::from("{}"))
    }

    /// Initial index before collision probing.
    #[must_use]
    pub fn index_hint(&self) -> u64 {
        trueno::hash_key(&self.canonical())
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<BTreeMap<String, Value>> for Context {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self(entries)
    }
}

#[derive(Default)]
struct RegistryCache {
    by_canonical: FxHashMap<String, u64>,
    by_index: FxHashMap<u64, Context>,
}

/// Bidirectional `index ⇄ context` mapping scoped to one run.
///
/// Persisted under the run's `contexts` subtree so that resumed runs and
/// readers resolve the same indices.
pub struct ContextRegistry {
    tree: TreeView,
    writable: bool,
    cache: RwLock<RegistryCache>,
}

impl ContextRegistry {
    /// Registry backed by `tree` (the run's `contexts` subtree).
    ///
    /// Read-only registries resolve indices without persisting new contexts.
    #[must_use]
    pub fn new(tree: TreeView, writable: bool) -> Self {
        Self {
            tree,
            writable,
            cache: RwLock::new(RegistryCache::default()),
        }
    }

    /// Index of `context`, registering it on first use.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidContext` for non-scalar values, and propagates
    /// storage failures.
    pub fn context_to_index(&self, context: &Context) -> Result<u64> {
        let canonical = context.canonical();
        if let Some(idx) = self.cache.read().by_canonical.get(&canonical) {
            return Ok(*idx);
        }
        context.validate()?;

        let mut cache = self.cache.write();
        if let Some(idx) = cache.by_canonical.get(&canonical) {
            return Ok(*idx);
        }

        let mut idx = context.index_hint();
        loop {
            let existing = match cache.by_index.get(&idx) {
                Some(stored) => Some(stored.clone()),
                None => self.load(idx)?,
            };
            match existing {
                Some(stored) if stored == *context => break,
                Some(_) => {
                    tracing::debug!(index = idx, context = %context, "context index collision, probing");
                    idx = idx.wrapping_add(1);
                }
                None => {
                    if self.writable {
                        self.tree.set_as(&[idx.to_string()], context)?;
                    }
                    break;
                }
            }
        }

        cache.by_canonical.insert(canonical, idx);
        cache.by_index.insert(idx, context.clone());
        Ok(idx)
    }

    /// Context registered under `idx`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no context holds `idx`.
    pub fn index_to_context(&self, idx: u64) -> Result<Context> {
        if let Some(context) = self.cache.read().by_index.get(&idx) {
            return Ok(context.clone());
        }

        let context = self
            .load(idx)?
            .ok_or_else(|| Error::NotFound(format!("context index {idx}")))?;

        let mut cache = self.cache.write();
        cache.by_canonical.insert(context.canonical(), idx);
        cache.by_index.insert(idx, context.clone());
        Ok(context)
    }

    /// Number of contexts resolved so far by this registry.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.cache.read().by_index.len()
    }

    /// Drop cached entries (persisted contexts are kept).
    pub fn clear_cache(&self) {
        *self.cache.write() = RegistryCache::default();
    }

    fn load(&self, idx: u64) -> Result<Option<Context>> {
        self.tree.get_as(&[idx.to_string()])
    }
}
