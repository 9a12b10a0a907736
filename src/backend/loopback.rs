//! In-process [`RemoteClient`] backed by a [`MemoryTree`].
//!
//! Stands in for a tracking server so the remote protocol (queued writes,
//! server locks, delegated heartbeats) runs end to end without a transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;

use super::{QueueOp, RemoteCapabilities, RemoteClient};
use crate::lock::LockOwner;
use crate::reporter::StatusRecord;
use crate::tree::{MemoryTree, TreeStore};
use crate::{Error, Result};

/// Next check-in expected by a server-driven heartbeat, in seconds.
const SERVER_HEARTBEAT_EXPECT_NEXT_IN: u64 = 10;

/// In-process remote repository.
#[derive(Default)]
pub struct LoopbackClient {
    tree: MemoryTree,
    check_ins: DashMap<String, StatusRecord>,
    locks: DashMap<String, LockOwner>,
    server_heartbeats: DashMap<String, u64>,
    capabilities: RemoteCapabilities,
    reject_ops: AtomicBool,
    applied: AtomicU64,
}

impl LoopbackClient {
    /// Client whose server expects client-driven heartbeats.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Client whose server keeps runs alive itself.
    #[must_use]
    pub fn with_server_side_heartbeat() -> Self {
        Self {
            capabilities: RemoteCapabilities {
                server_side_heartbeat: true,
            },
            ..Self::default()
        }
    }

    /// Make the server reject (or accept again) queued operations.
    pub fn set_reject_ops(&self, reject: bool) {
        self.reject_ops.store(reject, Ordering::Relaxed);
    }

    /// Copy of the server tree.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        self.tree.snapshot()
    }

    /// Server-side tree, e.g. to seed legacy data.
    #[must_use]
    pub const fn tree(&self) -> &MemoryTree {
        &self.tree
    }

    /// Operations applied so far.
    #[must_use]
    pub fn applied_ops(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Whether the server is driving a heartbeat for `run_hash`.
    #[must_use]
    pub fn has_server_heartbeat(&self, run_hash: &str) -> bool {
        self.server_heartbeats.contains_key(run_hash)
    }

    /// Current lock holder of `run_hash`.
    #[must_use]
    pub fn lock_owner(&self, run_hash: &str) -> Option<LockOwner> {
        self.locks.get(run_hash).map(|owner| owner.clone())
    }

    fn touch_check_in(&self, run_hash: &str, expect_next_in: u64) {
        let mut record = self
            .check_ins
            .entry(run_hash.to_string())
            .or_insert_with(|| StatusRecord::new(run_hash));
        record.check_in_idx += 1;
        record.last_check_in_time = Utc::now();
        record.next_expected_in = expect_next_in;
    }
}

impl RemoteClient for LoopbackClient {
    fn capabilities(&self) -> RemoteCapabilities {
        self.capabilities
    }

    fn apply(&self, run_hash: &str, op: &QueueOp) -> Result<()> {
        if self.reject_ops.load(Ordering::Relaxed) {
            return Err(Error::Remote(format!("server rejected operation for run {run_hash}")));
        }
        match op {
            QueueOp::TreeSet { path, value } => self.tree.set(path, value.clone())?,
            QueueOp::TreeDelete { path } => self.tree.delete(path)?,
            QueueOp::WriteCheckIn(record) => {
                self.check_ins.insert(run_hash.to_string(), record.clone());
            }
        }
        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn tree_get(&self, path: &[String]) -> Result<Option<Value>> {
        self.tree.get(path)
    }

    fn tree_keys(&self, path: &[String]) -> Result<Vec<String>> {
        self.tree.keys(path)
    }

    fn read_check_in(&self, run_hash: &str) -> Result<Option<StatusRecord>> {
        Ok(self.check_ins.get(run_hash).map(|record| record.clone()))
    }

    fn heartbeat(&self, run_hash: &str, expect_next_in: u64) -> Result<()> {
        self.touch_check_in(run_hash, expect_next_in);
        Ok(())
    }

    fn start_heartbeat(&self, run_hash: &str) -> Result<()> {
        if !self.capabilities.server_side_heartbeat {
            return Err(Error::Remote("server-side heartbeat is not supported".into()));
        }
        self.server_heartbeats
            .insert(run_hash.to_string(), SERVER_HEARTBEAT_EXPECT_NEXT_IN);
        self.touch_check_in(run_hash, SERVER_HEARTBEAT_EXPECT_NEXT_IN);
        Ok(())
    }

    fn stop_heartbeat(&self, run_hash: &str) -> Result<()> {
        self.server_heartbeats.remove(run_hash);
        Ok(())
    }

    fn acquire_lock(&self, run_hash: &str, owner: &LockOwner, force: bool) -> Result<()> {
        match self.locks.entry(run_hash.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut held) => {
                if held.get().owner_id != owner.owner_id && !force {
                    return Err(Error::Locked {
                        run_hash: run_hash.to_string(),
                        owner: held.get().to_string(),
                    });
                }
                held.insert(owner.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(owner.clone());
            }
        }
        Ok(())
    }

    fn release_lock(&self, run_hash: &str, owner: &LockOwner) -> Result<()> {
        self.locks
            .remove_if(run_hash, |_, held| held.owner_id == owner.owner_id);
        Ok(())
    }
}
