//! Run configuration for the trellis engine.
//!
//! Configuration is layered: built-in defaults, then `.trellis/trellis.toml`
//! project defaults, then the `execution:` section of the graph document,
//! then CLI overrides. The resolved [`ExecutionConfig`] is immutable for the
//! duration of a run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How merge conflicts are handled after a feature's workflow completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Park the feature in an awaiting-resolution state and keep its worktree.
    #[default]
    Manual,
    /// Invoke the runner's conflict resolver, falling back to manual when the
    /// retry budget is spent.
    Agent,
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictPolicy::Manual => write!(f, "manual"),
            ConflictPolicy::Agent => write!(f, "agent"),
        }
    }
}

impl std::str::FromStr for ConflictPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(ConflictPolicy::Manual),
            "agent" => Ok(ConflictPolicy::Agent),
            _ => anyhow::bail!("Invalid conflict policy '{}'. Valid values: manual, agent", s),
        }
    }
}

fn default_workflow() -> Vec<String> {
    ["specify", "plan", "tasks", "implement"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// The `execution:` section of a graph document, and the `[execution]` table
/// of `.trellis/trellis.toml`. Every field is optional so the layers can be
/// merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionSection {
    #[serde(default)]
    pub max_parallel: Option<usize>,
    /// Overall run deadline in seconds. Absent means no deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub base_branch: Option<String>,
    #[serde(default)]
    pub on_conflict: Option<ConflictPolicy>,
    /// Retries allowed per phase beyond the first attempt.
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub max_log_size: Option<u64>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Ordered phase names every feature is driven through.
    #[serde(default)]
    pub workflow: Option<Vec<String>>,
    /// Shell command run inside each new worktree before the first phase.
    #[serde(default)]
    pub setup_script: Option<String>,
    /// Command the process-backed phase runner spawns.
    #[serde(default)]
    pub runner_cmd: Option<String>,
}

impl ExecutionSection {
    /// Merge `self` over `base`: fields present in `self` win.
    pub fn merged_over(&self, base: &ExecutionSection) -> ExecutionSection {
        ExecutionSection {
            max_parallel: self.max_parallel.or(base.max_parallel),
            timeout_secs: self.timeout_secs.or(base.timeout_secs),
            base_branch: self.base_branch.clone().or_else(|| base.base_branch.clone()),
            on_conflict: self.on_conflict.or(base.on_conflict),
            max_retries: self.max_retries.or(base.max_retries),
            max_log_size: self.max_log_size.or(base.max_log_size),
            log_dir: self.log_dir.clone().or_else(|| base.log_dir.clone()),
            workflow: self.workflow.clone().or_else(|| base.workflow.clone()),
            setup_script: self
                .setup_script
                .clone()
                .or_else(|| base.setup_script.clone()),
            runner_cmd: self.runner_cmd.clone().or_else(|| base.runner_cmd.clone()),
        }
    }
}

/// The `.trellis/trellis.toml` project defaults file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrellisToml {
    #[serde(default)]
    pub execution: ExecutionSection,
}

impl TrellisToml {
    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse trellis.toml")
    }

    /// Load from `<trellis_dir>/trellis.toml`, returning defaults if the file
    /// doesn't exist.
    pub fn load_or_default(trellis_dir: &Path) -> Result<Self> {
        let path = trellis_dir.join("trellis.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }
}

/// CLI overrides, applied on top of every file-based layer.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub max_parallel: Option<usize>,
    pub base_branch: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Resolved, immutable configuration for one run.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Project (repository) root directory.
    pub project_dir: PathBuf,
    /// Maximum features running concurrently.
    pub max_parallel: usize,
    /// Overall run deadline; `None` means run to completion.
    pub timeout: Option<Duration>,
    /// Branch features branch from and merge back into.
    pub base_branch: String,
    pub on_conflict: ConflictPolicy,
    /// Retries allowed per (feature, phase) beyond the first attempt.
    pub max_retries: u32,
    /// Per-feature log cap in bytes.
    pub max_log_size: u64,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
    pub worktree_dir: PathBuf,
    pub runs_dir: PathBuf,
    /// Ordered phase names every feature is driven through.
    pub workflow: Vec<String>,
    pub setup_script: Option<String>,
    pub runner_cmd: String,
}

impl ExecutionConfig {
    /// Resolve the effective configuration for a project directory.
    ///
    /// Layering, lowest to highest precedence: built-in defaults,
    /// `.trellis/trellis.toml`, the graph document's `execution:` section,
    /// CLI overrides.
    pub fn resolve(
        project_dir: &Path,
        toml: &TrellisToml,
        document: &ExecutionSection,
        cli: &CliOverrides,
    ) -> Self {
        let section = document.merged_over(&toml.execution);
        let trellis_dir = project_dir.join(".trellis");

        let runner_cmd = section
            .runner_cmd
            .clone()
            .or_else(|| std::env::var("TRELLIS_RUNNER").ok())
            .unwrap_or_else(|| "claude".to_string());

        Self {
            project_dir: project_dir.to_path_buf(),
            max_parallel: cli.max_parallel.or(section.max_parallel).unwrap_or(4),
            timeout: cli
                .timeout_secs
                .or(section.timeout_secs)
                .map(Duration::from_secs),
            base_branch: cli
                .base_branch
                .clone()
                .or(section.base_branch)
                .unwrap_or_else(|| "main".to_string()),
            on_conflict: section.on_conflict.unwrap_or_default(),
            max_retries: section.max_retries.unwrap_or(2),
            max_log_size: section.max_log_size.unwrap_or(1024 * 1024),
            log_dir: section
                .log_dir
                .map(|p| if p.is_absolute() { p } else { project_dir.join(p) })
                .unwrap_or_else(|| trellis_dir.join("logs")),
            state_dir: trellis_dir.join("state"),
            worktree_dir: trellis_dir.join("worktrees"),
            runs_dir: trellis_dir.join("runs"),
            workflow: section.workflow.unwrap_or_else(default_workflow),
            setup_script: section.setup_script,
            runner_cmd,
        }
    }

    /// Set the parallelism cap.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max;
        self
    }

    /// Set the per-phase retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.on_conflict = policy;
        self
    }
}
