//! Graph model, indexing, and validation.
//!
//! A graph document declares layers of features with dependencies. This
//! module parses the document, validates it (cycles, dangling references,
//! layer consistency), and builds the indexed [`FeatureGraph`] the scheduler
//! dispatches from.
//!
//! ## Example
//!
//! ```no_run
//! use trellis::graph::{FeatureGraph, GraphFile, validate};
//!
//! # fn example() -> anyhow::Result<()> {
//! let file = GraphFile::load(std::path::Path::new("trellis.yaml"))?;
//! let (graph, _execution) = file.into_parts();
//!
//! let report = validate(&graph);
//! if report.has_errors() {
//!     for issue in report.errors() {
//!         eprintln!("{issue}");
//!     }
//!     anyhow::bail!("graph is invalid");
//! }
//!
//! let index = FeatureGraph::build(&graph)?;
//! for wave in index.compute_waves() {
//!     println!("{wave:?}");
//! }
//! # Ok(())
//! # }
//! ```

mod builder;
mod model;
mod validate;

pub use builder::{FeatureGraph, FeatureIdx};
pub use model::{Feature, Graph, GraphFile, Layer, SCHEMA_VERSION};
pub use validate::{ValidationIssue, ValidationReport, validate};
