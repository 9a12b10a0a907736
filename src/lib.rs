//! # Trueno-Tracker: Run Lifecycle & Liveness Tracking
//!
//! **Version**: 0.1.0
//!
//! Trueno-Tracker is the core of an ML experiment tracker: it opens training
//! runs against a local or remote repository, records parameters and
//! sequences of tracked values, and reports liveness so a stalled writer is
//! told apart from one that finished.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Poka-Yoke safety**: One writer per run (lock), exactly-once teardown
//! - **Jidoka**: Failed migrations stop the line and keep a backup
//! - **Genchi Genbutsu**: Health is read from actual check-ins, never assumed
//! - **Muda elimination**: Remote writes batched through one ordered queue
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_tracker::{Context, Repo, ReporterConfig, Run};
//!
//! # fn main() -> trueno_tracker::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let repo = Repo::local(dir.path())?;
//!
//! let run = Run::builder(&repo)
//!     .experiment("mnist")
//!     .reporter(ReporterConfig::new().with_enabled(false))
//!     .open()?;
//! let train = Context::new().with("subset", "train");
//! run.track("loss", 0.25, None, None, &train)?;
//!
//! let loss = run.metric("loss", &train)?.expect("tracked");
//! assert_eq!(loss.len(), 1);
//! run.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod lock;
pub mod repo;
pub mod reporter;
pub mod run;
pub mod sequence;
pub mod sysinfo;
pub mod tree;

pub use backend::{BackendKind, LoopbackClient, RemoteClient};
pub use config::ReporterConfig;
pub use context::Context;
pub use error::{Error, Result};
pub use repo::Repo;
pub use reporter::{ReporterState, RunHealth, StatusRecord};
pub use run::{Closable, Run, RunBuilder, RunProps};
pub use sequence::{Sequence, SequenceKind, SequenceRegistry, TrackedValue};
