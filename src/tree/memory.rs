//! In-memory tree store.
//!
//! This is the default backend - data is lost on process restart.
//! Durable stores implement [`TreeStore`] outside this crate.

use parking_lot::RwLock;
use serde_json::{Map, Value};

use super::TreeStore;
use crate::Result;

/// In-memory hierarchical store holding one JSON document.
///
/// A single `RwLock` guards the document, so every `set`/`delete` is atomic
/// and readers never observe a half-written path.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use trueno_tracker::tree::{MemoryTree, TreeStore};
///
/// # fn example() -> trueno_tracker::Result<()> {
/// let tree = MemoryTree::new();
/// let path = vec!["runs".to_string(), "abc".to_string()];
/// tree.set(&path, json!({"end_time": null}))?;
/// assert_eq!(tree.keys(&path)?, vec!["end_time".to_string()]);
/// # Ok(())
/// # }
/// ```
pub struct MemoryTree {
    root: RwLock<Value>,
}

impl MemoryTree {
    /// Create a new empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Clone of the whole document.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        *self.root.write() = Value::Object(Map::new());
    }
}

impl Default for MemoryTree {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(mut node: &'a Value, path: &[String]) -> Option<&'a Value> {
    for segment in path {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Turn `node` into an object (replacing a leaf) and borrow its map.
fn force_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced by an object"),
    }
}

impl TreeStore for MemoryTree {
    fn get(&self, path: &[String]) -> Result<Option<Value>> {
        Ok(lookup(&self.root.read(), path).cloned())
    }

    fn set(&self, path: &[String], value: Value) -> Result<()> {
        let mut root = self.root.write();
        let Some((last, parents)) = path.split_last() else {
            *root = value;
            return Ok(());
        };

        let mut node = &mut *root;
        for segment in parents {
            node = force_object(node)
                .entry(segment.clone())
                .or_insert(Value::Null);
        }
        force_object(node).insert(last.clone(), value);
        Ok(())
    }

    fn delete(&self, path: &[String]) -> Result<()> {
        let mut root = self.root.write();
        let Some((last, parents)) = path.split_last() else {
            *root = Value::Object(Map::new());
            return Ok(());
        };

        let mut node = &mut *root;
        for segment in parents {
            match node.as_object_mut().and_then(|map| map.get_mut(segment)) {
                Some(child) => node = child,
                None => return Ok(()),
            }
        }
        if let Some(map) = node.as_object_mut() {
            map.remove(last);
        }
        Ok(())
    }

    fn keys(&self, path: &[String]) -> Result<Vec<String>> {
        let root = self.root.read();
        let mut keys: Vec<String> = lookup(&root, path)
            .and_then(Value::as_object)
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        // Map ordering depends on serde_json features; keep key order explicit.
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn p(segments: &[&str]) -> Vec<String> {
        segments.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_memory_tree_set_get() {
        let tree = MemoryTree::new();

        tree.set(&p(&["a", "b", "c"]), json!("v")).unwrap();

        assert_eq!(tree.get(&p(&["a", "b", "c"])).unwrap(), Some(json!("v")));
        assert_eq!(tree.get(&p(&["a", "b"])).unwrap(), Some(json!({"c": "v"})));
    }

    #[test]
    fn test_memory_tree_overwrite_leaf_with_subtree() {
        let tree = MemoryTree::new();

        tree.set(&p(&["a"]), json!(1)).unwrap();
        tree.set(&p(&["a", "b"]), json!(2)).unwrap();

        assert_eq!(tree.get(&p(&["a"])).unwrap(), Some(json!({"b": 2})));
    }

    #[test]
    fn test_memory_tree_delete() {
        let tree = MemoryTree::new();

        tree.set(&p(&["a", "b"]), json!(1)).unwrap();
        tree.delete(&p(&["a", "b"])).unwrap();

        assert_eq!(tree.get(&p(&["a", "b"])).unwrap(), None);
        assert_eq!(tree.get(&p(&["a"])).unwrap(), Some(json!({})));
    }

    #[test]
    fn test_memory_tree_keys_sorted() {
        let tree = MemoryTree::new();

        tree.set(&p(&["t", "b"]), json!(1)).unwrap();
        tree.set(&p(&["t", "a"]), json!(1)).unwrap();
        tree.set(&p(&["t", "c"]), json!(1)).unwrap();

        assert_eq!(tree.keys(&p(&["t"])).unwrap(), p(&["a", "b", "c"]));
        assert!(tree.keys(&p(&["missing"])).unwrap().is_empty());
        assert!(tree.keys(&p(&["t", "a"])).unwrap().is_empty());
    }

    #[test]
    fn test_memory_tree_clear() {
        let tree = MemoryTree::new();
        tree.set(&p(&["x"]), json!(1)).unwrap();

        tree.clear();
        assert_eq!(tree.snapshot(), json!({}));
    }

    #[test]
    fn test_memory_tree_concurrent_writers() {
        let tree = Arc::new(MemoryTree::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tree = Arc::clone(&tree);
                std::thread::spawn(move || {
                    for j in 0..50 {
                        tree.set(&p(&["w", i.to_string().as_str(), j.to_string().as_str()]), json!(j))
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        for i in 0..8 {
            assert_eq!(tree.keys(&p(&["w", i.to_string().as_str()])).unwrap().len(), 50);
        }
    }
}
