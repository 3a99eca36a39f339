//! File-level reference graph.
//!
//! Nodes are the files of one build (including files without tags); edges
//! are weighted "file A references a symbol defined in file B" relations.
//! The graph is stored as flat node and edge tables with integer indices so
//! cycles need no shared ownership.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::{to_module_name, Tag, TagCategory};

/// A file that takes part in a build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSeed {
    pub path: String,
    pub content_hash: String,
}

impl NodeSeed {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub path: String,
    pub definition_count: u32,
    pub reference_count: u32,
    /// References whose name has no definition anywhere in the corpus.
    pub external_reference_count: u32,
    pub content_hash: String,
    pub importance: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: u32,
    pub target: u32,
    pub weight: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReferenceGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    #[serde(skip)]
    index: IndexMap<String, usize>,
}

impl PartialEq for ReferenceGraph {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes && self.edges == other.edges
    }
}

impl ReferenceGraph {
    /// Build nodes and weighted edges. Importance is left at zero; see
    /// [`crate::indexer::pagerank::compute_importance`].
    pub fn build(files: &[NodeSeed], tags: &[Tag]) -> Self {
        let mut seeds: Vec<&NodeSeed> = files.iter().collect();
        seeds.sort_by(|a, b| a.path.cmp(&b.path));
        seeds.dedup_by(|a, b| a.path == b.path);

        let mut nodes: Vec<GraphNode> = seeds
            .iter()
            .map(|seed| GraphNode {
                path: seed.path.clone(),
                definition_count: 0,
                reference_count: 0,
                external_reference_count: 0,
                content_hash: seed.content_hash.clone(),
                importance: 0.0,
            })
            .collect();
        let index = build_index(&nodes);

        let mut definitions: HashMap<&str, BTreeSet<usize>> = HashMap::new();
        let mut imports: Vec<Vec<String>> = vec![Vec::new(); nodes.len()];
        for tag in tags {
            let Some(&node) = index.get(tag.relative_path.as_str()) else {
                tracing::debug!(path = %tag.relative_path, "tag outside node set ignored");
                continue;
            };
            match tag.category {
                c if c.is_definition() => {
                    nodes[node].definition_count += 1;
                    definitions.entry(tag.name.as_str()).or_default().insert(node);
                }
                TagCategory::Import => imports[node].push(tag.identifier.replace('/', ".")),
                _ => {}
            }
        }

        let modules: Vec<String> = nodes.iter().map(|n| to_module_name(&n.path)).collect();
        let mut weights: BTreeMap<(usize, usize), u32> = BTreeMap::new();
        for tag in tags.iter().filter(|t| t.category == TagCategory::Reference) {
            let Some(&source) = index.get(tag.relative_path.as_str()) else {
                continue;
            };
            nodes[source].reference_count += 1;

            let Some(defining) = definitions.get(tag.name.as_str()) else {
                nodes[source].external_reference_count += 1;
                continue;
            };
            if defining.contains(&source) {
                continue;
            }
            let narrowed: Vec<usize> = defining
                .iter()
                .copied()
                .filter(|&d| imports[source].iter().any(|imp| module_matches(imp, &modules[d])))
                .collect();
            let candidates = if narrowed.is_empty() {
                defining.iter().copied().collect()
            } else {
                narrowed
            };
            for target in candidates {
                *weights.entry((source, target)).or_insert(0) += 1;
            }
        }

        let edges = weights
            .into_iter()
            .map(|((source, target), weight)| GraphEdge {
                source: source as u32,
                target: target as u32,
                weight,
            })
            .collect();

        Self { nodes, edges, index }
    }

    /// Reassemble a graph from stored tables, validating indices.
    pub fn from_parts(nodes: Vec<GraphNode>, edges: Vec<GraphEdge>) -> Result<Self, String> {
        let count = nodes.len();
        for edge in &edges {
            if edge.source as usize >= count || edge.target as usize >= count {
                return Err(format!(
                    "edge {}->{} out of range for {count} nodes",
                    edge.source, edge.target
                ));
            }
            if edge.weight == 0 {
                return Err(format!("edge {}->{} has zero weight", edge.source, edge.target));
            }
        }
        let index = build_index(&nodes);
        if index.len() != count {
            return Err("duplicate node paths".to_string());
        }
        Ok(Self { nodes, edges, index })
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_index(&self, path: &str) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn node(&self, path: &str) -> Option<&GraphNode> {
        self.node_index(path).map(|i| &self.nodes[i])
    }

    pub fn importance(&self, path: &str) -> f64 {
        self.node(path).map(|n| n.importance).unwrap_or(0.0)
    }

    pub fn max_importance(&self) -> f64 {
        self.nodes.iter().map(|n| n.importance).fold(0.0, f64::max)
    }

    pub fn edge_weight(&self, source: &str, target: &str) -> Option<u32> {
        let s = self.node_index(source)? as u32;
        let t = self.node_index(target)? as u32;
        self.edges
            .iter()
            .find(|e| e.source == s && e.target == t)
            .map(|e| e.weight)
    }

    pub(crate) fn set_importance(&mut self, scores: &[f64]) {
        for (node, score) in self.nodes.iter_mut().zip(scores) {
            node.importance = *score;
        }
    }

    /// Node indices ordered by importance descending, then path ascending.
    pub fn ranked_nodes(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|&a, &b| {
            let (na, nb) = (&self.nodes[a], &self.nodes[b]);
            nb.importance
                .total_cmp(&na.importance)
                .then_with(|| na.path.cmp(&nb.path))
        });
        order
    }

    /// Restore the path lookup after deserialization.
    pub fn reindex(&mut self) {
        self.index = build_index(&self.nodes);
    }
}

fn build_index(nodes: &[GraphNode]) -> IndexMap<String, usize> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.path.clone(), i))
        .collect()
}

/// Whether a dotted import path plausibly names the module `module` (or the
/// package directory containing it).
fn module_matches(import: &str, module: &str) -> bool {
    let package = module.rsplit_once('.').map(|(p, _)| p).unwrap_or("");
    let segments: Vec<&str> = import.split('.').filter(|s| !s.is_empty()).collect();
    (1..=segments.len()).any(|n| {
        let prefix = segments[..n].join(".");
        [module, package].iter().filter(|m| !m.is_empty()).any(|m| {
            prefix == *m
                || prefix.ends_with(&format!(".{m}"))
                || m.ends_with(&format!(".{prefix}"))
        })
    })
}
