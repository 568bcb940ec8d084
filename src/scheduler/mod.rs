//! Dependency-aware scheduling and dispatch.
//!
//! The scheduler walks a validated feature graph, dispatching ready features
//! into a bounded worker pool and collecting completions until the graph is
//! exhausted. Each worker drives one feature end to end: isolated worktree,
//! phase workflow through the runner, merge-back into the base branch.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use trellis::config::{CliOverrides, ExecutionConfig, TrellisToml};
//! use trellis::graph::GraphFile;
//! use trellis::logs::LogManager;
//! use trellis::runner::ProcessRunner;
//! use trellis::scheduler::Scheduler;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let file = GraphFile::load(std::path::Path::new("trellis.yaml"))?;
//! let (graph, execution) = file.into_parts();
//! let config = ExecutionConfig::resolve(
//!     std::path::Path::new("."),
//!     &TrellisToml::default(),
//!     &execution,
//!     &CliOverrides::default(),
//! );
//!
//! let logs = Arc::new(LogManager::open(&config.log_dir, config.max_log_size)?);
//! let runner = Arc::new(ProcessRunner::new(&config.runner_cmd, logs));
//! let report = Scheduler::new(config).run(&graph, runner).await?;
//! println!("completed: {}", report.count("completed"));
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod state;

pub use dispatcher::Scheduler;
pub use state::{
    ExecutionReport, FeatureEvent, FeatureReport, FeatureStatus, SchedulerState,
};
