//! Check-in record persistence.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::StatusRecord;
use crate::backend::{QueueOp, RemoteClient, RpcQueue};
use crate::{Error, Result};

/// Directory (relative to the repository root) holding check-in records.
pub const CHECK_INS_DIR: &str = "check_ins";

/// Persists and reads the check-in record of one run.
pub trait FileManager: Send + Sync {
    /// Replace the stored record.
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be persisted.
    fn write(&self, record: &StatusRecord) -> Result<()>;

    /// Stored record, `None` if the run never checked in.
    ///
    /// # Errors
    ///
    /// Returns error if the record exists but cannot be read.
    fn read(&self) -> Result<Option<StatusRecord>>;
}

/// Stores `<repo>/check_ins/<hash>.json`, replaced atomically.
#[derive(Debug, Clone)]
pub struct LocalFileManager {
    path: PathBuf,
}

impl LocalFileManager {
    /// File manager for `run_hash` inside the repository at `root`.
    #[must_use]
    pub fn new(root: &Path, run_hash: &str) -> Self {
        Self {
            path: root.join(CHECK_INS_DIR).join(format!("{run_hash}.json")),
        }
    }

    /// Record location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileManager for LocalFileManager {
    fn write(&self, record: &StatusRecord) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        write_atomic(&self.path, &bytes)
    }

    fn read(&self) -> Result<Option<StatusRecord>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename over `path`.
///
/// Readers never observe a partially written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(format!(".{}.tmp", std::process::id()));
    let tmp = PathBuf::from(tmp_name);

    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Sends check-ins through the run's outbound queue.
///
/// Without a queue the manager only reads (monitoring a remote run).
pub struct RemoteFileManager {
    run_hash: String,
    client: Arc<dyn RemoteClient>,
    queue: Option<Arc<RpcQueue>>,
}

impl RemoteFileManager {
    /// File manager writing through `queue` and reading through `client`.
    #[must_use]
    pub fn new(run_hash: &str, client: Arc<dyn RemoteClient>, queue: Option<Arc<RpcQueue>>) -> Self {
        Self {
            run_hash: run_hash.to_string(),
            client,
            queue,
        }
    }
}

impl FileManager for RemoteFileManager {
    fn write(&self, record: &StatusRecord) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| Error::ReadOnly(self.run_hash.clone()))?;
        queue.enqueue(QueueOp::WriteCheckIn(record.clone()))?;
        // A check-in only counts once the server has it.
        queue.wait_for_finish()
    }

    fn read(&self) -> Result<Option<StatusRecord>> {
        if let Some(queue) = &self.queue {
            queue.wait_for_finish()?;
        }
        self.client.read_check_in(&self.run_hash)
    }
}
