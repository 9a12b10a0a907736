//! Repository binding
//!
//! A [`Repo`] is where runs live: a local directory plus a tree store, or a
//! remote server behind a [`RemoteClient`]. It also owns the tokio runtime
//! that drives heartbeats, check-in writers and outbound queues of its runs.
//!
//! ```text
//! <root>/
//!   check_ins/<hash>.json   liveness records
//!   locks/<hash>.lock       write locks
//!   bcp/<hash>.json         pre-migration backups
//! ```

use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime, RuntimeFlavor};

use crate::backend::{QueueRegistry, RemoteClient, RemoteTree};
use crate::lock::{RunLock, LOCKS_DIR};
use crate::reporter::{
    FileManager, LocalFileManager, RemoteFileManager, RunHealth, StatusMonitor, CHECK_INS_DIR,
};
use crate::run::migration::{self, BACKUP_DIR};
use crate::tree::{MemoryTree, TreeStore, TreeView};
use crate::{Error, Result};

/// Where a repository's data lives.
pub(crate) enum RepoBinding {
    Local {
        root: PathBuf,
        tree: Arc<dyn TreeStore>,
    },
    Remote {
        client: Arc<dyn RemoteClient>,
    },
}

struct RepoInner {
    binding: RepoBinding,
    queues: QueueRegistry,
    handle: Handle,
    // Dropped last: queue workers and writers run on it.
    runtime: Option<Runtime>,
}

impl RepoInner {
    fn new(binding: RepoBinding) -> Result<Self> {
        let runtime = build_runtime()?;
        Ok(Self {
            binding,
            queues: QueueRegistry::new(),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }
}

impl Drop for RepoInner {
    fn drop(&mut self) {
        // A runtime cannot be dropped from async context; shut it down without waiting.
        if Handle::try_current().is_ok() {
            if let Some(runtime) = self.runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

/// Handle to a repository; cheap to clone.
#[derive(Clone)]
pub struct Repo {
    inner: Arc<RepoInner>,
}

impl std::fmt::Debug for Repo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Repo");
        match &self.inner.binding {
            RepoBinding::Local { root, .. } => s.field("root", root),
            RepoBinding::Remote { .. } => s.field("remote", &true),
        };
        s.finish_non_exhaustive()
    }
}

/// Wait for `future` on `runtime` from synchronous code.
///
/// Callers already inside a multi-threaded runtime hand their worker off with
/// `block_in_place`. Inside a current-thread runtime the wait moves to a
/// scoped thread.
pub(crate) fn block_on<F>(runtime: &Handle, future: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    match Handle::try_current().map(|current| current.runtime_flavor()) {
        Err(_) => runtime.block_on(future),
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| runtime.block_on(future)),
        Ok(_) => std::thread::scope(|scope| {
            scope
                .spawn(|| runtime.block_on(future))
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        }),
    }
}

fn build_runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("run-tracker")
        .enable_all()
        .build()?)
}

impl Repo {
    /// Local repository at `root` with an in-memory tree store.
    ///
    /// # Errors
    ///
    /// Returns error if the repository directories cannot be created.
    pub fn local(root: impl AsRef<Path>) -> Result<Self> {
        Self::local_with_tree(root, Arc::new(MemoryTree::new()))
    }

    /// Local repository at `root` storing run metadata in `tree`.
    ///
    /// # Errors
    ///
    /// Returns error if the repository directories cannot be created.
    pub fn local_with_tree(root: impl AsRef<Path>, tree: Arc<dyn TreeStore>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [CHECK_INS_DIR, LOCKS_DIR, BACKUP_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        tracing::debug!(root = %root.display(), "opened local repository");
        Ok(Self {
            inner: Arc::new(RepoInner::new(RepoBinding::Local { root, tree })?),
        })
    }

    /// Remote repository reached through `client`.
    ///
    /// # Errors
    ///
    /// Returns error if the background runtime cannot start.
    pub fn remote(client: Arc<dyn RemoteClient>) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(RepoInner::new(RepoBinding::Remote { client })?),
        })
    }

    pub(crate) fn binding(&self) -> &RepoBinding {
        &self.inner.binding
    }

    /// Whether runs of this repository go through a remote client.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self.inner.binding, RepoBinding::Remote { .. })
    }

    /// Root directory of a local repository.
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        match &self.inner.binding {
            RepoBinding::Local { root, .. } => Some(root),
            RepoBinding::Remote { .. } => None,
        }
    }

    /// Client of a remote repository.
    #[must_use]
    pub fn remote_client(&self) -> Option<&Arc<dyn RemoteClient>> {
        match &self.inner.binding {
            RepoBinding::Local { .. } => None,
            RepoBinding::Remote { client } => Some(client),
        }
    }

    /// Runtime driving background work of this repository's runs.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.inner.handle
    }

    /// Outbound queues of open remote runs.
    #[must_use]
    pub fn queues(&self) -> &QueueRegistry {
        &self.inner.queues
    }

    /// Root view of the repository tree.
    ///
    /// For remote repositories this view reads through the client and rejects
    /// writes; runs write through their own queue.
    #[must_use]
    pub fn tree(&self) -> TreeView {
        match &self.inner.binding {
            RepoBinding::Local { tree, .. } => TreeView::new(Arc::clone(tree)),
            RepoBinding::Remote { client } => {
                TreeView::new(Arc::new(RemoteTree::new("", Arc::clone(client), None)))
            }
        }
    }

    fn run_tree(&self, run_hash: &str) -> TreeView {
        self.tree().subtree(&["runs", run_hash])
    }

    /// Hashes of all runs, sorted.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn run_hashes(&self) -> Result<Vec<String>> {
        self.tree().keys(&["runs"])
    }

    /// Whether a run with `run_hash` exists.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn run_exists(&self, run_hash: &str) -> Result<bool> {
        Ok(!self.run_tree(run_hash).is_empty()?)
    }

    fn status_reader(&self, run_hash: &str) -> Arc<dyn FileManager> {
        match &self.inner.binding {
            RepoBinding::Local { root, .. } => Arc::new(LocalFileManager::new(root, run_hash)),
            RepoBinding::Remote { client } => {
                Arc::new(RemoteFileManager::new(run_hash, Arc::clone(client), None))
            }
        }
    }

    /// Health of `run_hash` from its last check-in; `None` if it never
    /// checked in.
    ///
    /// # Errors
    ///
    /// Propagates check-in read failures.
    pub fn run_health(&self, run_hash: &str, grace: Duration) -> Result<Option<RunHealth>> {
        StatusMonitor::new(self.status_reader(run_hash), grace).health()
    }

    /// Monitor over the check-ins of `run_hash`.
    #[must_use]
    pub fn status_monitor(&self, run_hash: &str, grace: Duration) -> StatusMonitor {
        StatusMonitor::new(self.status_reader(run_hash), grace)
    }

    fn local_root(&self, action: &str) -> Result<&Path> {
        self.root().ok_or_else(|| {
            Error::Remote(format!(
                "{action} must be run against the server's local repository"
            ))
        })
    }

    /// Migrate a legacy run in place, taking a backup first.
    ///
    /// Returns the backup location, or `None` if the run was already current.
    ///
    /// # Errors
    ///
    /// Returns `Error::Locked` while a writer holds the run,
    /// `Error::MigrationFailed` if conversion fails after the backup.
    pub fn upgrade_run(&self, run_hash: &str) -> Result<Option<PathBuf>> {
        let root = self.local_root("upgrade_run")?;
        let run_tree = self.run_tree(run_hash);
        if !migration::needs_migration(&run_tree)? {
            return Ok(None);
        }

        let mut lock = RunLock::acquire_local(root, run_hash, false)?;
        let result = migrate_with_backup(root, run_hash, &run_tree);
        lock.release()?;
        result.map(Some)
    }

    /// Replace a run with its pre-migration backup.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no backup exists, `Error::Locked` while a
    /// writer holds the run.
    pub fn restore_run(&self, run_hash: &str) -> Result<()> {
        let root = self.local_root("restore_run")?;
        let mut lock = RunLock::acquire_local(root, run_hash, false)?;
        let result = migration::restore_run(root, run_hash, &self.run_tree(run_hash));
        lock.release()?;
        result
    }
}

/// Backup then migrate; a migration error keeps the backup and reports it.
pub(crate) fn migrate_with_backup(root: &Path, run_hash: &str, run_tree: &TreeView) -> Result<PathBuf> {
    tracing::warn!(run_hash, "detected legacy metric format, upgrading");
    let backup_path = migration::backup_run(root, run_hash, run_tree)?;
    match migration::migrate_metrics(run_tree) {
        Ok(report) => {
            tracing::warn!(
                run_hash,
                sequences = report.sequences,
                records = report.records,
                backup = %backup_path.display(),
                "converted run metrics; restore with Repo::restore_run if needed"
            );
            Ok(backup_path)
        }
        Err(e) => {
            tracing::error!(run_hash, error = %e, backup = %backup_path.display(), "failed to convert metrics");
            Err(Error::MigrationFailed {
                backup_path,
                source: Box::new(e),
            })
        }
    }
}
