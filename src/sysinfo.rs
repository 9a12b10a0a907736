//! System parameters recorded at run creation
//!
//! Collection is best-effort: a collector that fails yields an empty value
//! and never fails the run.

use std::collections::BTreeMap;
use std::process::Command;

use serde_json::{json, Value};

/// Attribute under which system parameters are stored.
pub const SYSTEM_PARAMS_KEY: &str = "__system_params";

/// Environment collaborator consulted once per run when
/// `log_system_params` is enabled.
pub trait SystemInfoProvider: Send + Sync {
    /// Installed packages as `name → version`.
    fn installed_packages(&self) -> BTreeMap<String, String>;

    /// Environment variables of the process.
    fn environment_variables(&self) -> BTreeMap<String, String>;

    /// Version-control details of the working directory.
    fn git_info(&self) -> Value;

    /// Executable path and command-line arguments.
    fn executable_and_args(&self) -> (String, Vec<String>);
}

/// Collects from the current process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSystemInfo {
    packages: BTreeMap<String, String>,
}

impl ProcessSystemInfo {
    /// Provider without a package list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `packages` as the installed package list.
    #[must_use]
    pub fn with_packages(mut self, packages: BTreeMap<String, String>) -> Self {
        self.packages = packages;
        self
    }
}

impl SystemInfoProvider for ProcessSystemInfo {
    fn installed_packages(&self) -> BTreeMap<String, String> {
        self.packages.clone()
    }

    fn environment_variables(&self) -> BTreeMap<String, String> {
        std::env::vars().collect()
    }

    fn git_info(&self) -> Value {
        let branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
        let commit = git(&["rev-parse", "HEAD"]);
        let remote = git(&["config", "--get", "remote.origin.url"]);
        if branch.is_none() && commit.is_none() {
            return json!({});
        }
        json!({
            "branch": branch,
            "commit": commit,
            "remote_origin_url": remote,
        })
    }

    fn executable_and_args(&self) -> (String, Vec<String>) {
        let executable = std::env::current_exe()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        (executable, std::env::args().collect())
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// The `__system_params` attribute value.
#[must_use]
pub fn collect_system_params(provider: &dyn SystemInfoProvider) -> Value {
    let (executable, arguments) = provider.executable_and_args();
    json!({
        "packages": provider.installed_packages(),
        "env_variables": provider.environment_variables(),
        "git_info": provider.git_info(),
        "executable": executable,
        "arguments": arguments,
    })
}
