//! CLI command implementations.
//!
//! Thin wrappers over the library: load the graph document, resolve
//! configuration, invoke the engine, print results. All exit-code policy
//! lives in `main`.

pub mod logs;
pub mod run;
pub mod validate;
pub mod visualize;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use trellis::graph::GraphFile;

pub const DEFAULT_GRAPH_FILE: &str = "trellis.yaml";

/// Resolve the graph document path relative to the project directory.
pub fn graph_path(project_dir: &Path, graph: Option<&PathBuf>) -> PathBuf {
    match graph {
        Some(path) if path.is_absolute() => path.clone(),
        Some(path) => project_dir.join(path),
        None => project_dir.join(DEFAULT_GRAPH_FILE),
    }
}

/// Load and parse the graph document.
pub fn load_graph_file(project_dir: &Path, graph: Option<&PathBuf>) -> Result<GraphFile> {
    let path = graph_path(project_dir, graph);
    GraphFile::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_path_defaults_to_trellis_yaml() {
        let path = graph_path(Path::new("/proj"), None);
        assert_eq!(path, PathBuf::from("/proj/trellis.yaml"));
    }

    #[test]
    fn graph_path_anchors_relative_paths() {
        let custom = PathBuf::from("graphs/other.yaml");
        let path = graph_path(Path::new("/proj"), Some(&custom));
        assert_eq!(path, PathBuf::from("/proj/graphs/other.yaml"));
    }

    #[test]
    fn graph_path_keeps_absolute_paths() {
        let custom = PathBuf::from("/elsewhere/graph.yaml");
        let path = graph_path(Path::new("/proj"), Some(&custom));
        assert_eq!(path, custom);
    }
}
