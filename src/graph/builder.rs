//! Index structure over a validated graph.
//!
//! The builder flattens a [`Graph`] into an indexed feature list with forward
//! and reverse dependency edges, used by the scheduler for ready-set
//! computation and blocked propagation.

use crate::errors::GraphError;
use crate::graph::model::{Feature, Graph};
use std::collections::{HashMap, HashSet};

/// Index into the flattened feature list (declaration order).
pub type FeatureIdx = usize;

/// A directed acyclic graph of features with dependency edges.
#[derive(Debug)]
pub struct FeatureGraph {
    /// Features in declaration order (layer order, then within-layer order).
    features: Vec<Feature>,
    /// Map from feature id to index.
    index_map: HashMap<String, FeatureIdx>,
    /// index -> features that depend on it.
    forward_edges: Vec<Vec<FeatureIdx>>,
    /// index -> features it depends on.
    reverse_edges: Vec<Vec<FeatureIdx>>,
}

impl FeatureGraph {
    /// Build the index from a graph.
    ///
    /// Fails on duplicate feature ids and unresolved dependency references.
    /// Cycle detection is the validator's job; a graph that passed
    /// [`crate::graph::validate`] always builds.
    pub fn build(graph: &Graph) -> Result<Self, GraphError> {
        let features: Vec<Feature> = graph.features().cloned().collect();

        let mut index_map = HashMap::new();
        for (i, feature) in features.iter().enumerate() {
            if index_map.insert(feature.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateFeature {
                    id: feature.id.clone(),
                });
            }
        }

        let mut forward_edges: Vec<Vec<FeatureIdx>> = vec![Vec::new(); features.len()];
        let mut reverse_edges: Vec<Vec<FeatureIdx>> = vec![Vec::new(); features.len()];

        for (to_idx, feature) in features.iter().enumerate() {
            for dep in &feature.depends_on {
                let from_idx =
                    *index_map
                        .get(dep)
                        .ok_or_else(|| GraphError::UnknownDependency {
                            feature: feature.id.clone(),
                            dependency: dep.clone(),
                        })?;
                forward_edges[from_idx].push(to_idx);
                reverse_edges[to_idx].push(from_idx);
            }
        }

        Ok(Self {
            features,
            index_map,
            forward_edges,
            reverse_edges,
        })
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, index: FeatureIdx) -> Option<&Feature> {
        self.features.get(index)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&Feature> {
        self.index_map.get(id).and_then(|&i| self.features.get(i))
    }

    pub fn index_of(&self, id: &str) -> Option<FeatureIdx> {
        self.index_map.get(id).copied()
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Features that depend on the given feature (forward edges).
    pub fn dependents(&self, index: FeatureIdx) -> &[FeatureIdx] {
        self.forward_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Features the given feature depends on (reverse edges).
    pub fn dependencies(&self, index: FeatureIdx) -> &[FeatureIdx] {
        self.reverse_edges.get(index).map_or(&[], |v| v.as_slice())
    }

    /// Check if all dependencies of a feature are in the completed set.
    pub fn dependencies_satisfied(
        &self,
        index: FeatureIdx,
        completed: &HashSet<FeatureIdx>,
    ) -> bool {
        self.dependencies(index)
            .iter()
            .all(|dep| completed.contains(dep))
    }

    /// All features transitively depending on the given feature, in
    /// breadth-first order. Used for eager blocked propagation.
    pub fn transitive_dependents(&self, index: FeatureIdx) -> Vec<FeatureIdx> {
        let mut seen = HashSet::new();
        let mut queue: Vec<FeatureIdx> = self.dependents(index).to_vec();
        let mut out = Vec::new();
        while let Some(idx) = queue.pop() {
            if seen.insert(idx) {
                out.push(idx);
                queue.extend_from_slice(self.dependents(idx));
            }
        }
        out.sort_unstable();
        out
    }

    /// Compute dispatch waves: groups of feature ids whose dependencies are
    /// satisfied simultaneously. Used for dry-run planning and visualization.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut completed: HashSet<FeatureIdx> = HashSet::new();

        loop {
            let ready: Vec<FeatureIdx> = (0..self.features.len())
                .filter(|i| !completed.contains(i) && self.dependencies_satisfied(*i, &completed))
                .collect();

            if ready.is_empty() {
                break;
            }

            waves.push(
                ready
                    .iter()
                    .map(|&i| self.features[i].id.clone())
                    .collect(),
            );
            completed.extend(ready);
        }

        waves
    }
}
