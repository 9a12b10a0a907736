//! Single-writer run locks
//!
//! A write-mode run holds its lock from open until teardown. Local locks are
//! files created with `create_new` under `<repo>/locks`; remote locks are
//! owned by the server.
//!
//! `force_resume` is last-writer-wins: the new owner overwrites the lock and
//! the displaced writer is not notified. Releasing only removes a lock the
//! releasing owner still holds, so a displaced writer's teardown leaves the
//! new owner's lock in place.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::RemoteClient;
use crate::reporter::write_atomic;
use crate::{Error, Result};

/// Directory (relative to the repository root) holding lock files.
pub const LOCKS_DIR: &str = "locks";

/// Identity of a lock holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    /// Random id of the owning session.
    pub owner_id: String,
    /// Process id of the owner.
    pub pid: u32,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockOwner {
    /// Fresh owner for the current process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            owner_id: Uuid::new_v4().simple().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "owner {} pid {} since {}",
            self.owner_id,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

enum LockTarget {
    Local(PathBuf),
    Remote(Arc<dyn RemoteClient>),
}

/// Write lock held by an open run.
pub struct RunLock {
    run_hash: String,
    owner: LockOwner,
    target: LockTarget,
    held: bool,
}

impl RunLock {
    /// Take the local lock of `run_hash` in the repository at `root`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Locked` if another owner holds it and `force` is false.
    pub fn acquire_local(root: &Path, run_hash: &str, force: bool) -> Result<Self> {
        let path = root.join(LOCKS_DIR).join(format!("{run_hash}.lock"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let owner = LockOwner::current();
        let bytes = serde_json::to_vec(&owner)?;

        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&bytes)?;
                file.sync_all()?;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                let holder = read_owner(&path)
                    .map_or_else(|| "unknown owner".to_string(), |holder| holder.to_string());
                if !force {
                    return Err(Error::Locked {
                        run_hash: run_hash.to_string(),
                        owner: holder,
                    });
                }
                tracing::warn!(run_hash, previous = %holder, "force-resuming run, reclaiming lock");
                write_atomic(&path, &bytes)?;
            }
            Err(e) => return Err(e.into()),
        }

        tracing::debug!(run_hash, owner = %owner.owner_id, "run lock acquired");
        Ok(Self {
            run_hash: run_hash.to_string(),
            owner,
            target: LockTarget::Local(path),
            held: true,
        })
    }

    /// Take the server-side lock of `run_hash`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Locked` if another owner holds it and `force` is false.
    pub fn acquire_remote(client: Arc<dyn RemoteClient>, run_hash: &str, force: bool) -> Result<Self> {
        let owner = LockOwner::current();
        client.acquire_lock(run_hash, &owner, force)?;
        if force {
            tracing::warn!(run_hash, "force-resume requested on remote run");
        }
        Ok(Self {
            run_hash: run_hash.to_string(),
            owner,
            target: LockTarget::Remote(client),
            held: true,
        })
    }

    /// Owner recorded by this lock.
    #[must_use]
    pub const fn owner(&self) -> &LockOwner {
        &self.owner
    }

    /// Whether the lock has not been released yet.
    #[must_use]
    pub const fn is_held(&self) -> bool {
        self.held
    }

    /// Release the lock if this owner still holds it.
    ///
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns error if the lock file or server cannot be updated.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        match &self.target {
            LockTarget::Local(path) => match read_owner(path) {
                Some(holder) if holder.owner_id == self.owner.owner_id => match fs::remove_file(path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
                _ => {
                    tracing::warn!(run_hash = %self.run_hash, "run lock was reclaimed by another writer, leaving it");
                }
            },
            LockTarget::Remote(client) => client.release_lock(&self.run_hash, &self.owner)?,
        }
        tracing::debug!(run_hash = %self.run_hash, "run lock released");
        Ok(())
    }
}

fn read_owner(path: &Path) -> Option<LockOwner> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}
