//! Importance scores over the reference graph.
//!
//! A PageRank-style fixed point where each file keeps its own base mass
//! (definitions plus a small share for unresolved references) and receives a
//! damped share of every referencing file's score, split by edge weight.

use serde::{Deserialize, Serialize};

use crate::indexer::graph::ReferenceGraph;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceParams {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: usize,
    /// Base mass contributed by each unresolved reference.
    pub external_weight: f64,
}

impl Default for ImportanceParams {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-9,
            max_iterations: 200,
            external_weight: 0.1,
        }
    }
}

/// Compute scores for every node, indexed like `graph.nodes()`.
pub fn importance_scores(graph: &ReferenceGraph, params: &ImportanceParams) -> Vec<f64> {
    let nodes = graph.nodes();
    let base: Vec<f64> = nodes
        .iter()
        .map(|n| n.definition_count as f64 + params.external_weight * n.external_reference_count as f64)
        .collect();
    if graph.edges().is_empty() {
        return base;
    }

    let mut out_weight = vec![0u64; nodes.len()];
    let mut incoming: Vec<Vec<(usize, f64)>> = vec![Vec::new(); nodes.len()];
    for edge in graph.edges() {
        out_weight[edge.source as usize] += edge.weight as u64;
    }
    for edge in graph.edges() {
        let source = edge.source as usize;
        let share = edge.weight as f64 / out_weight[source] as f64;
        incoming[edge.target as usize].push((source, share));
    }

    let mut scores = base.clone();
    for iteration in 0..params.max_iterations {
        let next: Vec<f64> = incoming
            .iter()
            .enumerate()
            .map(|(i, sources)| {
                let inflow: f64 = sources.iter().map(|&(j, share)| share * (1.0 + scores[j])).sum();
                base[i] + params.damping * inflow
            })
            .collect();
        let delta = next
            .iter()
            .zip(&scores)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        scores = next;
        if delta < params.tolerance {
            tracing::debug!(iterations = iteration + 1, "importance converged");
            break;
        }
    }
    scores
}

/// Compute and store importance on the graph's nodes.
pub fn compute_importance(graph: &mut ReferenceGraph, params: &ImportanceParams) {
    let scores = importance_scores(graph, params);
    graph.set_importance(&scores);
}
