//! Graph validation.
//!
//! Checks run in a fixed order and all findings are collected rather than
//! bailing at the first, so an operator sees every offending id at once:
//!
//! 1. feature and layer ids are unique across the entire graph
//! 2. every `depends_on` reference (layer- or feature-level) resolves
//! 3. the feature dependency relation contains no cycle (three-color DFS)
//! 4. layer-level `depends_on` is consistent with feature-level deps
//!
//! Checks 1–3 produce errors; check 4 produces warnings. Feature-level
//! dependencies are authoritative for scheduling, so an inconsistent layer
//! declaration is advisory only.

use crate::graph::model::Graph;
use std::collections::HashMap;

/// One validation finding.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationIssue {
    DuplicateFeatureId {
        id: String,
    },
    DuplicateLayerId {
        id: String,
    },
    UnknownFeatureDependency {
        feature: String,
        dependency: String,
    },
    UnknownLayerDependency {
        layer: String,
        dependency: String,
    },
    /// Cycle through the listed feature ids, first id repeated at the end.
    DependencyCycle {
        path: Vec<String>,
    },
    /// A cross-layer feature dependency the layer declarations don't reflect.
    LayerOrderingWarning {
        feature: String,
        dependency: String,
        detail: String,
    },
}

impl ValidationIssue {
    /// Warnings are reported but never block a run.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::LayerOrderingWarning { .. })
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateFeatureId { id } => write!(f, "duplicate feature id '{id}'"),
            Self::DuplicateLayerId { id } => write!(f, "duplicate layer id '{id}'"),
            Self::UnknownFeatureDependency {
                feature,
                dependency,
            } => write!(
                f,
                "feature '{feature}' depends on unknown feature '{dependency}'"
            ),
            Self::UnknownLayerDependency { layer, dependency } => {
                write!(f, "layer '{layer}' depends on unknown layer '{dependency}'")
            }
            Self::DependencyCycle { path } => {
                write!(f, "dependency cycle: {}", path.join(" -> "))
            }
            Self::LayerOrderingWarning {
                feature,
                dependency,
                detail,
            } => write!(
                f,
                "feature '{feature}' depends on '{dependency}' {detail}"
            ),
        }
    }
}

/// All findings for one graph.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| !i.is_warning())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.is_warning())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    /// A graph with any error must be refused for execution.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

/// Validate a graph, collecting every finding.
pub fn validate(graph: &Graph) -> ValidationReport {
    let mut report = ValidationReport::default();

    // 1. unique ids
    let mut layer_seen: HashMap<&str, ()> = HashMap::new();
    for layer in &graph.layers {
        if layer_seen.insert(&layer.id, ()).is_some() {
            report.issues.push(ValidationIssue::DuplicateLayerId {
                id: layer.id.clone(),
            });
        }
    }

    // Feature index: id -> (layer position, duplicate-aware)
    let mut feature_layer: HashMap<&str, usize> = HashMap::new();
    for (layer_pos, layer) in graph.layers.iter().enumerate() {
        for feature in &layer.features {
            if feature_layer.insert(&feature.id, layer_pos).is_some() {
                report.issues.push(ValidationIssue::DuplicateFeatureId {
                    id: feature.id.clone(),
                });
            }
        }
    }

    // 2. reference integrity
    for layer in &graph.layers {
        for dep in &layer.depends_on {
            if !graph.layers.iter().any(|l| &l.id == dep) {
                report.issues.push(ValidationIssue::UnknownLayerDependency {
                    layer: layer.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        for feature in &layer.features {
            for dep in &feature.depends_on {
                if !feature_layer.contains_key(dep.as_str()) {
                    report
                        .issues
                        .push(ValidationIssue::UnknownFeatureDependency {
                            feature: feature.id.clone(),
                            dependency: dep.clone(),
                        });
                }
            }
        }
    }

    // 3. cycles (only over resolvable references)
    find_cycles(graph, &mut report);

    // 4. layer ordering consistency
    for (layer_pos, layer) in graph.layers.iter().enumerate() {
        for feature in &layer.features {
            for dep in &feature.depends_on {
                let Some(&dep_layer_pos) = feature_layer.get(dep.as_str()) else {
                    continue;
                };
                if dep_layer_pos == layer_pos {
                    continue;
                }
                let dep_layer = &graph.layers[dep_layer_pos];
                if dep_layer_pos > layer_pos {
                    report.issues.push(ValidationIssue::LayerOrderingWarning {
                        feature: feature.id.clone(),
                        dependency: dep.clone(),
                        detail: format!(
                            "declared in later layer '{}' than its dependent's layer '{}'",
                            dep_layer.id, layer.id
                        ),
                    });
                } else if !layer.depends_on.contains(&dep_layer.id) {
                    report.issues.push(ValidationIssue::LayerOrderingWarning {
                        feature: feature.id.clone(),
                        dependency: dep.clone(),
                        detail: format!(
                            "in layer '{}', but layer '{}' does not list '{}' in depends_on",
                            dep_layer.id, layer.id, dep_layer.id
                        ),
                    });
                }
            }
        }
    }

    report
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Three-color depth-first traversal over the feature dependency relation.
/// Encountering a gray node closes a cycle; the path from that node to the
/// top of the stack is reported.
fn find_cycles(graph: &Graph, report: &mut ValidationReport) {
    let features: Vec<_> = graph.features().collect();
    let index: HashMap<&str, usize> = features
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.as_str(), i))
        .collect();

    let mut marks = vec![Mark::White; features.len()];
    let mut stack: Vec<usize> = Vec::new();

    for start in 0..features.len() {
        if marks[start] == Mark::White {
            dfs(start, &features, &index, &mut marks, &mut stack, report);
        }
    }
}

fn dfs(
    node: usize,
    features: &[&crate::graph::model::Feature],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    report: &mut ValidationReport,
) {
    marks[node] = Mark::Gray;
    stack.push(node);

    for dep in &features[node].depends_on {
        let Some(&dep_idx) = index.get(dep.as_str()) else {
            // Dangling reference, already reported by check 2.
            continue;
        };
        match marks[dep_idx] {
            Mark::White => dfs(dep_idx, features, index, marks, stack, report),
            Mark::Gray => {
                let cycle_start = stack
                    .iter()
                    .position(|&n| n == dep_idx)
                    .unwrap_or(stack.len() - 1);
                let mut path: Vec<String> = stack[cycle_start..]
                    .iter()
                    .map(|&n| features[n].id.clone())
                    .collect();
                path.push(features[dep_idx].id.clone());
                report.issues.push(ValidationIssue::DependencyCycle { path });
            }
            Mark::Black => {}
        }
    }

    stack.pop();
    marks[node] = Mark::Black;
}
