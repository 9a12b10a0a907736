//! Run lifecycle
//!
//! A [`Run`] is one tracked session. Opening it for write takes the run's
//! lock, upgrades a legacy metric format, resets `end_time` and starts the
//! liveness reporter; closing it (explicitly or on drop) tears everything
//! down exactly once, in a fixed order.
//!
//! ```text
//!            open(write)                       close / drop
//! ┌──────┐ ─────────────> ┌────────┐ ────────────────────────> ┌────────┐
//! │ none │                │ active │   finalize                │ closed │
//! └──────┘ ─────────────> └────────┘ ──────────> ┌──────────┐ ─┘        │
//!            open(read)      │  ▲                │finalized │ ─────────>┘
//!                            └──┘ track          └──────────┘  close
//! ```
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//! use trueno_tracker::{Context, Repo, Run};
//!
//! # fn example() -> trueno_tracker::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let repo = Repo::local(dir.path())?;
//!
//! let run = Run::builder(&repo).experiment("baseline").open()?;
//! run.set("hparams", &json!({"lr": 0.01}))?;
//! for step in 0..10u32 {
//!     run.track("loss", 1.0 / f64::from(step + 1), Some(step.into()), None, &Context::new())?;
//! }
//! run.report_successful_finish(true)?;
//! run.close()?;
//! # Ok(())
//! # }
//! ```

pub mod autoclean;
pub mod migration;
pub mod props;
mod tracker;

pub use autoclean::Closable;
pub use props::RunProps;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use self::autoclean::RunAutoClean;
use self::props::DEFAULT_EXPERIMENT;
use self::tracker::RunTracker;
use crate::backend::{BackendKind, BackendSelector, RunBackend};
use crate::config::ReporterConfig;
use crate::context::{Context, ContextRegistry};
use crate::lock::RunLock;
use crate::repo::{migrate_with_backup, Repo, RepoBinding};
use crate::reporter::{
    Heartbeat, RemoteRunHeartbeatReporter, ReporterState, RunStatusReporter,
    ScheduledStatusReporter,
};
use crate::sequence::{
    DType, DTypeFilter, Sequence, SequenceInfoIter, SequenceKind, SequenceRegistry,
    SequenceSummary, TraceArea, TrackedValue,
};
use crate::sysinfo::{collect_system_params, ProcessSystemInfo, SystemInfoProvider, SYSTEM_PARAMS_KEY};
use crate::tree::TreeView;
use crate::{Error, Result};

/// Length of generated run hashes.
const RUN_HASH_LEN: usize = 24;

/// Fresh random run hash (24 lowercase hex characters).
#[must_use]
pub fn generate_run_hash() -> String {
    let mut hash = Uuid::new_v4().simple().to_string();
    hash.truncate(RUN_HASH_LEN);
    hash
}

/// Options for opening a [`Run`].
pub struct RunBuilder<'r> {
    repo: &'r Repo,
    hash: Option<String>,
    read_only: bool,
    experiment: Option<String>,
    force_resume: bool,
    reporter: ReporterConfig,
    log_system_params: bool,
    system_info: Option<Arc<dyn SystemInfoProvider>>,
    sequences: Option<SequenceRegistry>,
}

impl<'r> RunBuilder<'r> {
    fn new(repo: &'r Repo) -> Self {
        Self {
            repo,
            hash: None,
            read_only: false,
            experiment: None,
            force_resume: false,
            reporter: ReporterConfig::default(),
            log_system_params: false,
            system_info: None,
            sequences: None,
        }
    }

    /// Resume (or create) the run with this hash.
    #[must_use]
    pub fn hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Open without write access.
    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Experiment label to set on the run.
    #[must_use]
    pub fn experiment(mut self, experiment: impl Into<String>) -> Self {
        self.experiment = Some(experiment.into());
        self
    }

    /// Reclaim the write lock from a stalled writer.
    #[must_use]
    pub const fn force_resume(mut self, force_resume: bool) -> Self {
        self.force_resume = force_resume;
        self
    }

    /// Liveness reporter settings.
    #[must_use]
    pub fn reporter(mut self, config: ReporterConfig) -> Self {
        self.reporter = config;
        self
    }

    /// Record packages, environment, git info and command line at creation.
    #[must_use]
    pub const fn log_system_params(mut self, enabled: bool) -> Self {
        self.log_system_params = enabled;
        self
    }

    /// Collaborator used when `log_system_params` is enabled.
    #[must_use]
    pub fn system_info(mut self, provider: Arc<dyn SystemInfoProvider>) -> Self {
        self.system_info = Some(provider);
        self
    }

    /// Sequence kinds the run resolves (built-ins by default).
    #[must_use]
    pub fn sequences(mut self, registry: SequenceRegistry) -> Self {
        self.sequences = Some(registry);
        self
    }

    /// Open the run.
    ///
    /// On failure nothing stays acquired: a taken lock is released and a
    /// started reporter or queue is stopped.
    ///
    /// # Errors
    ///
    /// * `Error::NotFound` - read-only open of a missing run
    /// * `Error::Locked` - another writer holds the run
    /// * `Error::VersionMismatch` - legacy run on a remote repository
    /// * `Error::MigrationFailed` - legacy run could not be upgraded (backup kept)
    pub fn open(self) -> Result<Run> {
        let hash = match self.hash {
            Some(hash) if hash.is_empty() || hash.contains('/') => return Err(Error::InvalidRunHash(hash)),
            Some(hash) => hash,
            None => generate_run_hash(),
        };
        tracing::info!(run_hash = %hash, read_only = self.read_only, "opening run");

        // Locked runs never touch the queue registry.
        let lock = if self.read_only {
            None
        } else {
            Some(match self.repo.binding() {
                RepoBinding::Local { root, .. } => RunLock::acquire_local(root, &hash, self.force_resume)?,
                RepoBinding::Remote { client } => {
                    RunLock::acquire_remote(Arc::clone(client), &hash, self.force_resume)?
                }
            })
        };

        let backend = BackendSelector::select(self.repo, &hash, self.read_only);
        let run_tree = backend.tree.subtree(&["runs", hash.as_str()]);
        let finalized = Arc::new(AtomicBool::new(false));
        let mut resources = RunAutoClean::new(
            &hash,
            self.read_only,
            self.repo.clone(),
            run_tree.clone(),
            Arc::clone(&finalized),
        );
        if let Some(lock) = lock {
            resources.set_lock(lock);
        }

        if self.read_only {
            if run_tree.is_empty()? {
                return Err(Error::NotFound(format!("run {hash}")));
            }
            if let Some(experiment) = &self.experiment {
                tracing::debug!(run_hash = %hash, experiment, "ignoring experiment on read-only open");
            }
        } else {
            resources.set_queue(backend.queue.clone());
            let opened = OpenWrite {
                repo: self.repo,
                hash: &hash,
                run_tree: &run_tree,
                backend: &backend,
                experiment: self.experiment.as_deref(),
                reporter: &self.reporter,
                system_params: self.log_system_params.then(|| {
                    self.system_info
                        .clone()
                        .unwrap_or_else(|| Arc::new(ProcessSystemInfo::new()) as Arc<dyn SystemInfoProvider>)
                }),
            }
            .run(&mut resources);
            if let Err(e) = opened {
                resources.abort();
                return Err(e);
            }
        }

        let writable = !self.read_only;
        let area = TraceArea::new(&hash, &run_tree);
        Ok(Run {
            contexts: ContextRegistry::new(run_tree.subtree(&["contexts"]), writable),
            sequences: self.sequences.unwrap_or_default(),
            tracker: writable.then(|| RunTracker::new(area.clone())),
            props: RunProps::new(&hash, &run_tree, writable),
            attrs: run_tree.subtree(&["attrs"]),
            area,
            backend_kind: backend.kind,
            repo: self.repo.clone(),
            run_tree,
            read_only: self.read_only,
            reporter_enabled: writable && self.reporter.enabled(),
            hash,
            resources: Mutex::new(resources),
            finalized,
        })
    }
}

/// Write-mode open steps, in order.
struct OpenWrite<'a> {
    repo: &'a Repo,
    hash: &'a str,
    run_tree: &'a TreeView,
    backend: &'a RunBackend,
    experiment: Option<&'a str>,
    reporter: &'a ReporterConfig,
    system_params: Option<Arc<dyn SystemInfoProvider>>,
}

impl OpenWrite<'_> {
    fn run(self, resources: &mut RunAutoClean) -> Result<()> {
        if migration::needs_migration(self.run_tree)? {
            match self.repo.binding() {
                RepoBinding::Remote { .. } => {
                    tracing::warn!(run_hash = self.hash, "cannot track legacy run on a remote repository");
                    return Err(Error::VersionMismatch {
                        run_hash: self.hash.to_string(),
                        hint: format!(
                            "call Repo::upgrade_run(\"{}\") on the server's local repository",
                            self.hash
                        ),
                    });
                }
                RepoBinding::Local { root, .. } => {
                    migrate_with_backup(root, self.hash, self.run_tree)?;
                }
            }
        }

        let attrs = self.run_tree.subtree(&["attrs"]);
        if attrs.get::<&str>(&[])?.is_none() {
            attrs.set::<&str>(&[], json!({}))?;
        }
        self.run_tree.set(&["end_time"], Value::Null)?;
        if migration::metric_format_version(self.run_tree)?.is_none() {
            migration::mark_current(self.run_tree)?;
        }

        let props = RunProps::new(self.hash, self.run_tree, true);
        props.init_creation_time()?;
        match self.experiment {
            Some(experiment) => props.set_experiment(experiment)?,
            None if props.experiment()?.is_none() => props.set_experiment(DEFAULT_EXPERIMENT)?,
            None => {}
        }

        if let Some(provider) = &self.system_params {
            attrs.set(&[SYSTEM_PARAMS_KEY], collect_system_params(provider.as_ref()))?;
        }

        if self.reporter.enabled() {
            let runtime = self.repo.runtime();
            let reporter = RunStatusReporter::new(self.hash, Arc::clone(&self.backend.file_manager), runtime);
            let heartbeat: Box<dyn Heartbeat> = match self.repo.binding() {
                RepoBinding::Local { .. } => Box::new(ScheduledStatusReporter::start(
                    reporter.handle(),
                    self.reporter,
                    runtime,
                )),
                RepoBinding::Remote { client } => Box::new(RemoteRunHeartbeatReporter::start(
                    self.hash,
                    Arc::clone(client),
                    self.reporter,
                    runtime,
                )?),
            };
            resources.set_reporter(reporter, heartbeat);
        }
        Ok(())
    }
}

/// A tracked session.
pub struct Run {
    hash: String,
    read_only: bool,
    repo: Repo,
    backend_kind: BackendKind,
    run_tree: TreeView,
    attrs: TreeView,
    contexts: ContextRegistry,
    sequences: SequenceRegistry,
    area: TraceArea,
    tracker: Option<RunTracker>,
    props: RunProps,
    reporter_enabled: bool,
    resources: Mutex<RunAutoClean>,
    finalized: Arc<AtomicBool>,
}

impl std::fmt::Debug for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Run")
            .field("hash", &self.hash)
            .field("read_only", &self.read_only)
            .field("backend", &self.backend_kind)
            .finish_non_exhaustive()
    }
}

impl Run {
    /// Options for opening a run in `repo`.
    #[must_use]
    pub fn builder(repo: &Repo) -> RunBuilder<'_> {
        RunBuilder::new(repo)
    }

    /// Create a new run with a generated hash.
    ///
    /// # Errors
    ///
    /// See [`RunBuilder::open`].
    pub fn new(repo: &Repo) -> Result<Self> {
        Self::builder(repo).open()
    }

    /// Resume (or create) the run `hash` for writing.
    ///
    /// # Errors
    ///
    /// See [`RunBuilder::open`].
    pub fn open(repo: &Repo, hash: &str) -> Result<Self> {
        Self::builder(repo).hash(hash).open()
    }

    /// Run hash.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Whether the run was opened without write access.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Repository the run belongs to.
    #[must_use]
    pub const fn repo(&self) -> &Repo {
        &self.repo
    }

    /// Local or remote backend.
    #[must_use]
    pub const fn backend_kind(&self) -> BackendKind {
        self.backend_kind
    }

    /// Structured properties.
    #[must_use]
    pub const fn props(&self) -> &RunProps {
        &self.props
    }

    /// The run's `runs/{hash}` subtree.
    #[must_use]
    pub const fn tree(&self) -> &TreeView {
        &self.run_tree
    }

    /// Context index registry of this run.
    #[must_use]
    pub const fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Sequence kinds this run resolves.
    #[must_use]
    pub const fn sequence_registry(&self) -> &SequenceRegistry {
        &self.sequences
    }

    /// Whether `close` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.resources.lock().is_closed()
    }

    /// Whether `end_time` was stamped in this session.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly(self.hash.clone()));
        }
        if self.is_closed() {
            return Err(Error::RunFinalized(self.hash.clone()));
        }
        Ok(())
    }

    // ---- attributes ----

    /// Set the top-level attribute `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ReadOnly` on read-only runs, `Error::RunFinalized`
    /// after close.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        self.set_path(&[key], value)
    }

    /// Set the attribute at a nested path.
    ///
    /// # Errors
    ///
    /// Same as [`Run::set`].
    pub fn set_path<T: Serialize, S: AsRef<str>>(&self, path: &[S], value: &T) -> Result<()> {
        self.ensure_writable()?;
        self.attrs.set_as(path, value)
    }

    /// Replace every attribute at once.
    ///
    /// # Errors
    ///
    /// Same as [`Run::set`].
    pub fn set_attrs<T: Serialize>(&self, attrs: &T) -> Result<()> {
        self.ensure_writable()?;
        self.attrs.set_as::<T, &str>(&[], attrs)
    }

    /// Attribute `key`, `None` if missing.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.attrs.get(&[key])
    }

    /// Attribute at a nested path, `None` if missing.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Result<Option<Value>> {
        self.attrs.get(path)
    }

    /// Attribute `key`, or `default` if missing.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Attribute `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if missing.
    pub fn collect(&self, key: &str) -> Result<Value> {
        self.attrs.collect(&[key])
    }

    /// All attributes.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the run has no attribute mapping.
    pub fn attrs(&self) -> Result<Value> {
        self.attrs.collect_all()
    }

    /// Remove attribute `key`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if missing, plus the errors of [`Run::set`].
    pub fn delete(&self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.attrs.get(&[key])?.is_none() {
            return Err(Error::NotFound(format!("attribute '{key}' of run {}", self.hash)));
        }
        self.attrs.delete(&[key])
    }

    // ---- tracking ----

    /// Append `value` to the sequence `(name, context)`.
    ///
    /// `step` defaults to the previous step plus one (0 for a new sequence).
    ///
    /// # Errors
    ///
    /// * `Error::ReadOnly` - read-only run
    /// * `Error::RunFinalized` - run finalized or closed
    /// * `Error::IncompatibleValue` - value dtype doesn't match the sequence
    pub fn track(
        &self,
        name: &str,
        value: impl Into<TrackedValue>,
        step: Option<u64>,
        epoch: Option<u64>,
        context: &Context,
    ) -> Result<()> {
        let tracker = self.tracker()?;
        tracker.track(&self.contexts, name, value.into(), step, epoch, context)
    }

    /// Track several sequences under one step and context.
    ///
    /// Stops at the first failure; earlier values stay tracked.
    ///
    /// # Errors
    ///
    /// Same as [`Run::track`].
    pub fn track_many<K, V, I>(&self, values: I, step: Option<u64>, epoch: Option<u64>, context: &Context) -> Result<()>
    where
        K: AsRef<str>,
        V: Into<TrackedValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let tracker = self.tracker()?;
        for (name, value) in values {
            tracker.track(&self.contexts, name.as_ref(), value.into(), step, epoch, context)?;
        }
        Ok(())
    }

    fn tracker(&self) -> Result<&RunTracker> {
        self.ensure_writable()?;
        if self.is_finalized() {
            return Err(Error::RunFinalized(self.hash.clone()));
        }
        self.tracker
            .as_ref()
            .ok_or_else(|| Error::ReadOnly(self.hash.clone()))
    }

    // ---- sequences ----

    /// Context registered under `idx` in this run.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for unknown indices.
    pub fn idx_to_ctx(&self, idx: u64) -> Result<Context> {
        self.contexts.index_to_context(idx)
    }

    /// Typed view of `(name, context)` through the kind registered as
    /// `kind_name`.
    ///
    /// Returns `None` if the sequence is empty or its dtype is outside the
    /// kind's set.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSequenceKind` if `kind_name` is not registered.
    pub fn resolve(&self, kind_name: &str, name: &str, context: &Context) -> Result<Option<Sequence>> {
        let kind = self.sequences.get(kind_name)?;
        self.sequence(kind, name, context)
    }

    /// Typed view of `(name, context)` as `kind`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn sequence(&self, kind: SequenceKind, name: &str, context: &Context) -> Result<Option<Sequence>> {
        let context_idx = self.contexts.context_to_index(context)?;
        let Some(info) = self.area.info(context_idx, name)? else {
            return Ok(None);
        };
        if !kind.accepts(info.effective_dtype()) {
            return Ok(None);
        }
        let sequence = kind.wrap(name, context.clone(), context_idx, &self.area)?;
        Ok((!sequence.is_empty()).then_some(sequence))
    }

    /// Metric sequence `(name, context)`.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn metric(&self, name: &str, context: &Context) -> Result<Option<Sequence>> {
        self.sequence(SequenceKind::Metric, name, context)
    }

    /// `(name, context, run)` of every sequence readable by one of `kinds`.
    ///
    /// The listing covers the sequences present when it is created.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSequenceKind` for unregistered kind names.
    pub fn iter_sequence_info<S: AsRef<str>>(&self, kinds: &[S]) -> Result<SequenceInfoIter<'_>> {
        let mut dtypes: Vec<DType> = Vec::new();
        for kind in kinds {
            for dtype in self.sequences.get(kind.as_ref())?.allowed_dtypes() {
                if !dtypes.contains(dtype) {
                    dtypes.push(*dtype);
                }
            }
        }
        SequenceInfoIter::new(self, self.area.clone(), DTypeFilter::dtypes(&dtypes))
    }

    /// `(name, context, run)` of every sequence whose dtype name is in
    /// `dtypes`; `*` matches any dtype.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn iter_sequence_info_by_type<S: AsRef<str>>(&self, dtypes: &[S]) -> Result<SequenceInfoIter<'_>> {
        SequenceInfoIter::new(self, self.area.clone(), DTypeFilter::names(dtypes))
    }

    /// `(name, context, run)` of every metric sequence.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn iter_metrics_info(&self) -> Result<SequenceInfoIter<'_>> {
        SequenceInfoIter::new(
            self,
            self.area.clone(),
            DTypeFilter::dtypes(SequenceKind::Metric.allowed_dtypes()),
        )
    }

    /// Overview `kind → [(context, name, last value)]` for the listed kinds.
    ///
    /// Every requested kind appears in the result, possibly with no entries.
    /// A sequence readable by several requested kinds is listed under each.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSequenceKind` for unregistered kind names.
    pub fn collect_sequence_info<S: AsRef<str>>(
        &self,
        kinds: &[S],
        skip_last_value: bool,
    ) -> Result<BTreeMap<String, Vec<SequenceSummary>>> {
        let dtype_to_kinds = self.sequences.dtype_to_kinds(kinds)?;
        let mut overview: BTreeMap<String, Vec<SequenceSummary>> = kinds
            .iter()
            .map(|kind| (kind.as_ref().to_string(), Vec::new()))
            .collect();

        for (context_idx, name) in self.area.keys()? {
            let info = self.area.info(context_idx, &name)?.unwrap_or_default();
            let Some(kind_names) = DType::parse(info.effective_dtype()).and_then(|d| dtype_to_kinds.get(&d)) else {
                continue;
            };
            let summary = SequenceSummary {
                context: self.idx_to_ctx(context_idx)?.to_value(),
                name,
                last_value: if skip_last_value { None } else { info.last },
            };
            for kind in kind_names {
                if let Some(entries) = overview.get_mut(kind) {
                    entries.push(summary.clone());
                }
            }
        }
        Ok(overview)
    }

    // ---- liveness ----

    /// Manual check-in: the next one is expected within `expect_next_in`
    /// seconds, or the run is considered failed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotEnabled` when the run has no reporter.
    pub fn report_progress(&self, expect_next_in: u64, block: bool) -> Result<()> {
        let resources = self.resources.lock();
        let reporter = resources
            .reporter
            .as_ref()
            .ok_or_else(|| Error::NotEnabled(self.hash.clone()))?;
        reporter.check_in(expect_next_in, block)
    }

    /// Mark the run as successfully finished; it is never classified as
    /// failed afterwards.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotEnabled` when the run has no reporter.
    pub fn report_successful_finish(&self, block: bool) -> Result<()> {
        let resources = self.resources.lock();
        let reporter = resources
            .reporter
            .as_ref()
            .ok_or_else(|| Error::NotEnabled(self.hash.clone()))?;
        reporter.report_successful_finish(block)
    }

    /// Lifecycle state of the liveness reporter.
    #[must_use]
    pub fn reporter_state(&self) -> ReporterState {
        let resources = self.resources.lock();
        if resources.is_closed() && self.reporter_enabled {
            return ReporterState::Stopped;
        }
        resources.reporter_state()
    }

    // ---- teardown ----

    /// Close `resource` before the run's own resources at teardown.
    ///
    /// Resources close in reverse registration order.
    pub fn add_extra_resource(&self, resource: impl Closable + 'static) {
        self.resources.lock().add_extra_resource(Box::new(resource));
    }

    /// Stamp `end_time`; further tracking fails with `Error::RunFinalized`.
    ///
    /// No-op on read-only runs, after close and after a previous finalize.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub fn finalize(&self) -> Result<()> {
        self.resources.lock().finalize_run()
    }

    /// Tear the run down. Idempotent; read-only runs have nothing to tear
    /// down.
    ///
    /// # Errors
    ///
    /// Returns `Error::Teardown` listing every step that failed; all steps
    /// are attempted regardless.
    pub fn close(&self) -> Result<()> {
        let mut resources = self.resources.lock();
        if resources.is_closed() {
            return Ok(());
        }
        let result = resources.close();
        if let Some(tracker) = &self.tracker {
            tracker.clear();
        }
        result
    }
}

impl Drop for Run {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(run_hash = %self.hash, error = %e, "run teardown on drop failed");
        }
    }
}
