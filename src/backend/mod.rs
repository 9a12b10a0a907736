//! Storage/queue backend selection
//!
//! A run is bound to either a local repository (tree store plus check-in files
//! on disk) or a remote one (every write goes through the run's [`RpcQueue`]).
//! [`BackendSelector`] makes the choice once, at open, from the repository
//! binding, so no other part of the run needs to know which side it is on.
//!
//! ```text
//!             ┌─────────── local ───────────┐   ┌────────── remote ──────────┐
//! tree        │ repo tree store             │   │ RemoteTree → RpcQueue      │
//! check-ins   │ <repo>/check_ins/<hash>.json│   │ RemoteFileManager → queue  │
//! queue       │ none                        │   │ QueueRegistry[hash]        │
//!             └─────────────────────────────┘   └────────────────────────────┘
//! ```

mod loopback;
mod queue;
mod remote;

pub use loopback::LoopbackClient;
pub use queue::{QueueOp, QueueRegistry, RpcQueue};
pub use remote::{RemoteCapabilities, RemoteClient, RemoteTree};

use std::sync::Arc;

use crate::repo::{Repo, RepoBinding};
use crate::reporter::{FileManager, LocalFileManager, RemoteFileManager};
use crate::tree::TreeView;
use crate::Result;

/// Which side of the local/remote split a run is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Repository on the local filesystem.
    Local,
    /// Repository behind a [`RemoteClient`].
    Remote,
}

/// Storage collaborators of one open run.
pub struct RunBackend {
    /// Local or remote.
    pub kind: BackendKind,
    /// Repository tree as seen by the run (root view).
    pub tree: TreeView,
    /// Check-in persistence.
    pub file_manager: Arc<dyn FileManager>,
    /// Outbound queue; remote write-mode runs only.
    pub queue: Option<Arc<RpcQueue>>,
}

impl std::fmt::Debug for RunBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunBackend")
            .field("kind", &self.kind)
            .field("tree", &self.tree)
            .field("queued", &self.queue.is_some())
            .finish_non_exhaustive()
    }
}

/// Picks a run's backend from the repository binding.
pub struct BackendSelector {
    _private: (),
}

impl BackendSelector {
    /// Backend for `run_hash` in `repo`.
    ///
    /// Every remote write-mode open registers a fresh queue in the repository's
    /// [`QueueRegistry`], displacing one a reclaimed writer left behind.
    /// Read-only runs never create one.
    #[must_use]
    pub fn select(repo: &Repo, run_hash: &str, read_only: bool) -> RunBackend {
        match repo.binding() {
            RepoBinding::Local { root, .. } => {
                tracing::debug!(run_hash, read_only, "selected local backend");
                RunBackend {
                    kind: BackendKind::Local,
                    tree: repo.tree(),
                    file_manager: Arc::new(LocalFileManager::new(root, run_hash)),
                    queue: None,
                }
            }
            RepoBinding::Remote { client } => {
                let queue = (!read_only).then(|| {
                    let queue = Arc::new(RpcQueue::new(run_hash, Arc::clone(client), repo.runtime()));
                    if repo.queues().register(Arc::clone(&queue)).is_some() {
                        tracing::warn!(run_hash, "displaced the queue of a previous writer");
                    }
                    queue
                });
                tracing::debug!(run_hash, read_only, "selected remote backend");
                RunBackend {
                    kind: BackendKind::Remote,
                    tree: TreeView::new(Arc::new(RemoteTree::new(
                        run_hash,
                        Arc::clone(client),
                        queue.clone(),
                    ))),
                    file_manager: Arc::new(RemoteFileManager::new(
                        run_hash,
                        Arc::clone(client),
                        queue.clone(),
                    )),
                    queue,
                }
            }
        }
    }

    /// Apply remaining operations of `queue` and stop its worker.
    ///
    /// The registry entry is removed only while it still points at `queue`, so
    /// a displaced writer never deregisters the queue of the run's new owner.
    ///
    /// # Errors
    ///
    /// Returns error if the worker failed.
    pub fn finalize_queue(repo: &Repo, queue: &Arc<RpcQueue>) -> Result<()> {
        if !repo.queues().remove(queue) {
            tracing::debug!(run_hash = %queue.run_hash(), "queue already displaced");
        }
        queue.stop()
    }
}
