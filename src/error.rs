//! Error types for trueno-tracker
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-tracker error types
#[derive(Error, Debug)]
pub enum Error {
    /// Missing key, context, or run
    #[error("Not found: {0}")]
    NotFound(String),

    /// Legacy metric format on a backend that cannot migrate in place
    #[error("Run {run_hash} uses a legacy metric format that cannot be migrated on this backend\nUpgrade the repository first: {hint}")]
    VersionMismatch {
        /// Hash of the run being opened
        run_hash: String,
        /// How to perform the explicit upgrade
        hint: String,
    },

    /// Another writer holds the run
    #[error("Run {run_hash} is locked by another writer ({owner})\nUse force_resume to reclaim a stalled run")]
    Locked {
        /// Hash of the locked run
        run_hash: String,
        /// Description of the current lock owner
        owner: String,
    },

    /// Liveness call on a run without a status reporter
    #[error("Progress reports are not enabled for run {0}")]
    NotEnabled(String),

    /// Backup succeeded but the migration step raised
    #[error("Failed to convert metrics: {source}\nRun backup can be found at {}", backup_path.display())]
    MigrationFailed {
        /// Location of the backup taken before migrating
        backup_path: PathBuf,
        /// Error raised by the migration step
        #[source]
        source: Box<Error>,
    },

    /// Supplied run hash is unusable
    #[error("Invalid run hash '{0}'\nRun hashes must be non-empty and must not contain '/'")]
    InvalidRunHash(String),

    /// Write attempted on a read-only run
    #[error("Run {0} is opened in read-only mode")]
    ReadOnly(String),

    /// Tracking attempted after the run was finalized or closed
    #[error("Run {0} is finalized; tracking is no longer accepted")]
    RunFinalized(String),

    /// Sequence kind name is not registered
    #[error("'{0}' is not a valid Sequence")]
    UnknownSequenceKind(String),

    /// Context holds a non-scalar value
    #[error("Invalid context: {0}")]
    InvalidContext(String),

    /// Appended value does not match the sequence dtype
    #[error("Cannot track {value_dtype} value on sequence '{name}' with dtype {sequence_dtype}")]
    IncompatibleValue {
        /// Sequence name
        name: String,
        /// Declared sequence dtype
        sequence_dtype: String,
        /// Dtype of the rejected value
        value_dtype: String,
    },

    /// Outbound queue or writer already stopped
    #[error("Queue closed (worker stopped)")]
    QueueClosed,

    /// Remote client failure
    #[error("Remote error: {0}")]
    Remote(String),

    /// Storage collaborator failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// One or more resources failed to close
    #[error("Teardown of run {run_hash} incomplete: {}", failures.join("; "))]
    Teardown {
        /// Hash of the run being closed
        run_hash: String,
        /// One message per failed resource
        failures: Vec<String>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
