//! Hierarchical metadata tree interface
//!
//! The tree store is an external collaborator: a nested, key-ordered mapping
//! addressed by paths of string segments. The tracking core treats it as the
//! single source of truth for all persisted run state and only relies on the
//! narrow [`TreeStore`] contract below.
//!
//! [`TreeView`] scopes a store to a path prefix, which is how a run sees its
//! own `runs/{hash}` area and how sub-areas (`attrs`, `traces`, ...) are
//! addressed.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use trueno_tracker::tree::{MemoryTree, TreeView};
//!
//! # fn example() -> trueno_tracker::Result<()> {
//! let root = TreeView::new(Arc::new(MemoryTree::new()));
//! let attrs = root.subtree(&["runs", "abc", "attrs"]);
//!
//! attrs.set(&["hparams"], json!({"lr": 0.01}))?;
//! assert_eq!(attrs.collect(&["hparams", "lr"])?, json!(0.01));
//! assert_eq!(attrs.first_key()?, "hparams");
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryTree;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::{Error, Result};

/// Tree store contract consumed by the tracking core.
///
/// Every mutation is atomic at the granularity of one key path: concurrent
/// readers observe either the previous or the new value, never a partial one.
pub trait TreeStore: Send + Sync {
    /// Get the value stored under `path` (the whole subtree for inner nodes).
    ///
    /// Returns `None` if the path doesn't exist.
    fn get(&self, path: &[String]) -> Result<Option<Value>>;

    /// Set a value under `path`, creating intermediate nodes.
    ///
    /// Overwrites any existing value.
    fn set(&self, path: &[String], value: Value) -> Result<()>;

    /// Delete the value under `path`.
    ///
    /// No-op if the path doesn't exist.
    fn delete(&self, path: &[String]) -> Result<()>;

    /// Ordered snapshot of the child keys under `path`.
    ///
    /// Returns an empty list for missing paths and leaf values.
    fn keys(&self, path: &[String]) -> Result<Vec<String>>;
}

/// A [`TreeStore`] scoped to a path prefix.
#[derive(Clone)]
pub struct TreeView {
    store: Arc<dyn TreeStore>,
    prefix: Vec<String>,
}

impl std::fmt::Debug for TreeView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeView")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl TreeView {
    /// View the whole store.
    #[must_use]
    pub fn new(store: Arc<dyn TreeStore>) -> Self {
        Self {
            store,
            prefix: Vec::new(),
        }
    }

    /// Scope this view further down the tree.
    #[must_use]
    pub fn subtree<S: AsRef<str>>(&self, path: &[S]) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.full_path(path),
        }
    }

    /// Absolute path of this view inside the store.
    #[must_use]
    pub fn prefix(&self) -> &[String] {
        &self.prefix
    }

    /// Underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TreeStore> {
        &self.store
    }

    fn full_path<S: AsRef<str>>(&self, path: &[S]) -> Vec<String> {
        let mut full = Vec::with_capacity(self.prefix.len() + path.len());
        full.extend(self.prefix.iter().cloned());
        full.extend(path.iter().map(|segment| segment.as_ref().to_string()));
        full
    }

    /// Optional lookup: `None` if the path doesn't exist.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<Value>> {
        self.store.get(&self.full_path(path))
    }

    /// Optional typed lookup.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure or if the stored value doesn't decode
    /// as `T`.
    pub fn get_as<T: DeserializeOwned, S: AsRef<str>>(&self, path: &[S]) -> Result<Option<T>> {
        self.get(path)?
            .map(serde_json::from_value)
            .transpose()
            .map_err(Error::from)
    }

    /// Required lookup.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the path doesn't exist.
    pub fn collect<S: AsRef<str>>(&self, path: &[S]) -> Result<Value> {
        let full = self.full_path(path);
        self.store
            .get(&full)?
            .ok_or_else(|| Error::NotFound(full.join("/")))
    }

    /// Collect the whole subtree this view points at.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the subtree doesn't exist.
    pub fn collect_all(&self) -> Result<Value> {
        self.collect::<&str>(&[])
    }

    /// Set a value below this view.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn set<S: AsRef<str>>(&self, path: &[S], value: Value) -> Result<()> {
        self.store.set(&self.full_path(path), value)
    }

    /// Serialize and set a value below this view.
    ///
    /// # Errors
    ///
    /// Returns error on serialization or storage failure.
    pub fn set_as<T: Serialize, S: AsRef<str>>(&self, path: &[S], value: &T) -> Result<()> {
        self.set(path, serde_json::to_value(value)?)
    }

    /// Delete a value below this view (no-op if missing).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn delete<S: AsRef<str>>(&self, path: &[S]) -> Result<()> {
        self.store.delete(&self.full_path(path))
    }

    /// Ordered child keys below `path`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn keys<S: AsRef<str>>(&self, path: &[S]) -> Result<Vec<String>> {
        self.store.keys(&self.full_path(path))
    }

    /// First child key of this view.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the view has no children.
    pub fn first_key(&self) -> Result<String> {
        self.keys::<&str>(&[])?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound(format!("{} is empty", self.prefix.join("/"))))
    }

    /// Whether this view has no children.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.keys::<&str>(&[])?.is_empty())
    }
}
