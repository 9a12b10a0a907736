//! Remote repository client contract and the queued tree adapter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{QueueOp, RpcQueue};
use crate::lock::LockOwner;
use crate::reporter::StatusRecord;
use crate::tree::TreeStore;
use crate::{Error, Result};

/// Features a remote server advertises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCapabilities {
    /// The server tracks run liveness itself once asked to.
    pub server_side_heartbeat: bool,
}

/// Client side of a remote repository.
///
/// All calls are synchronous; the transport behind them is out of scope.
pub trait RemoteClient: Send + Sync {
    /// Features of the server.
    fn capabilities(&self) -> RemoteCapabilities;

    /// Apply one queued mutation for `run_hash`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` if the server rejects the operation.
    fn apply(&self, run_hash: &str, op: &QueueOp) -> Result<()>;

    /// Read a tree value.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn tree_get(&self, path: &[String]) -> Result<Option<Value>>;

    /// Ordered child keys of a tree path.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn tree_keys(&self, path: &[String]) -> Result<Vec<String>>;

    /// Latest check-in record of `run_hash`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn read_check_in(&self, run_hash: &str) -> Result<Option<StatusRecord>>;

    /// Client-driven heartbeat: the next one is expected within
    /// `expect_next_in` seconds.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn heartbeat(&self, run_hash: &str, expect_next_in: u64) -> Result<()>;

    /// Ask the server to keep `run_hash` alive on its own schedule.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` if unsupported or on transport failure.
    fn start_heartbeat(&self, run_hash: &str) -> Result<()>;

    /// Stop a server-side heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn stop_heartbeat(&self, run_hash: &str) -> Result<()>;

    /// Take the write lock of `run_hash`; `force` reclaims a held lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::Locked` if another owner holds the lock and `force` is
    /// false.
    fn acquire_lock(&self, run_hash: &str, owner: &LockOwner, force: bool) -> Result<()>;

    /// Release the lock if `owner` still holds it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Remote` on transport failure.
    fn release_lock(&self, run_hash: &str, owner: &LockOwner) -> Result<()>;
}

/// [`TreeStore`] of one run on a remote repository.
///
/// Writes become queued operations; reads first wait for the queue so they
/// observe every write issued before them. Without a queue (read-only runs)
/// writes are rejected and reads go straight to the client.
pub struct RemoteTree {
    run_hash: String,
    client: Arc<dyn RemoteClient>,
    queue: Option<Arc<RpcQueue>>,
}

impl RemoteTree {
    /// Tree adapter for `run_hash`.
    #[must_use]
    pub fn new(run_hash: &str, client: Arc<dyn RemoteClient>, queue: Option<Arc<RpcQueue>>) -> Self {
        Self {
            run_hash: run_hash.to_string(),
            client,
            queue,
        }
    }

    fn sync(&self) -> Result<()> {
        match &self.queue {
            Some(queue) => queue.wait_for_finish(),
            None => Ok(()),
        }
    }

    fn push(&self, op: QueueOp) -> Result<()> {
        self.queue
            .as_ref()
            .ok_or_else(|| Error::ReadOnly(self.run_hash.clone()))?
            .enqueue(op)
    }
}

impl TreeStore for RemoteTree {
    fn get(&self, path: &[String]) -> Result<Option<Value>> {
        self.sync()?;
        self.client.tree_get(path)
    }

    fn set(&self, path: &[String], value: Value) -> Result<()> {
        self.push(QueueOp::TreeSet {
            path: path.to_vec(),
            value,
        })
    }

    fn delete(&self, path: &[String]) -> Result<()> {
        self.push(QueueOp::TreeDelete {
            path: path.to_vec(),
        })
    }

    fn keys(&self, path: &[String]) -> Result<Vec<String>> {
        self.sync()?;
        self.client.tree_keys(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LoopbackClient;
    use serde_json::json;

    fn path(segments: &[&str]) -> Vec<String> {
        segments.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_remote_tree_reads_own_writes() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let client = Arc::new(LoopbackClient::new());
        let queue = Arc::new(RpcQueue::new("r1", client.clone(), rt.handle()));
        let tree = RemoteTree::new("r1", client, Some(Arc::clone(&queue)));

        tree.set(&path(&["runs", "r1", "b"]), json!(2)).unwrap();
        tree.set(&path(&["runs", "r1", "a"]), json!(1)).unwrap();
        assert_eq!(tree.get(&path(&["runs", "r1", "a"])).unwrap(), Some(json!(1)));
        assert_eq!(tree.keys(&path(&["runs", "r1"])).unwrap(), vec!["a", "b"]);

        tree.delete(&path(&["runs", "r1", "a"])).unwrap();
        assert_eq!(tree.get(&path(&["runs", "r1", "a"])).unwrap(), None);
        queue.stop().unwrap();
    }

    #[test]
    fn test_remote_tree_without_queue_is_read_only() {
        let client = Arc::new(LoopbackClient::new());
        let tree = RemoteTree::new("r1", client, None);

        assert!(matches!(
            tree.set(&path(&["x"]), json!(1)).unwrap_err(),
            Error::ReadOnly(hash) if hash == "r1"
        ));
        assert_eq!(tree.get(&path(&["x"])).unwrap(), None);
    }
}
