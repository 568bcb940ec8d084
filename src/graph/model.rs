//! Graph document types and YAML loading.
//!
//! A graph document declares a named DAG of layers, each containing features
//! with free-text descriptions and optional dependency lists. The `execution:`
//! section carries run configuration and is handed to [`crate::config`].

use crate::config::ExecutionSection;
use crate::errors::GraphError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Graph document schema version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

/// One independently schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    /// Globally unique id across the whole graph.
    pub id: String,
    /// Free-text description consumed by the phase runner.
    pub description: String,
    /// Ids of features that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Feature {
    pub fn new(id: &str, description: &str, depends_on: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            depends_on,
        }
    }
}

/// A named grouping of features sharing a dependency tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Layer {
    pub id: String,
    pub name: String,
    /// Advisory layer-level dependencies; feature-level `depends_on` is
    /// authoritative for scheduling.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub features: Vec<Feature>,
}

/// The in-memory dependency graph: a name plus ordered layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    pub name: String,
    pub layers: Vec<Layer>,
}

impl Graph {
    /// All features in declaration order (layer order, then within-layer).
    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.layers.iter().flat_map(|l| l.features.iter())
    }

    pub fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.len()).sum()
    }

    /// The layer a feature is declared in.
    pub fn layer_of(&self, feature_id: &str) -> Option<&Layer> {
        self.layers
            .iter()
            .find(|l| l.features.iter().any(|f| f.id == feature_id))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct DagSection {
    name: String,
}

/// The on-disk graph document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphFile {
    pub schema_version: u32,
    dag: DagSection,
    #[serde(default)]
    pub execution: ExecutionSection,
    #[serde(default)]
    pub layers: Vec<Layer>,
}

impl GraphFile {
    /// Parse a graph document from YAML.
    pub fn parse(content: &str) -> Result<Self, GraphError> {
        let file: GraphFile = serde_yaml::from_str(content)?;
        if file.schema_version != SCHEMA_VERSION {
            return Err(GraphError::UnsupportedSchema {
                found: file.schema_version,
                expected: SCHEMA_VERSION,
            });
        }
        Ok(file)
    }

    /// Load a graph document from disk.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let content = std::fs::read_to_string(path).map_err(|source| GraphError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Split the document into the graph and its execution section.
    pub fn into_parts(self) -> (Graph, ExecutionSection) {
        (
            Graph {
                name: self.dag.name,
                layers: self.layers,
            },
            self.execution,
        )
    }
}
