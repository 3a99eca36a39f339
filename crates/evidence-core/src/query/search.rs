//! Structural retrieval: rank tag locations for free-text criteria using
//! lexical match plus file importance, and pick the files most relevant to a
//! criterion.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::indexer::graph::ReferenceGraph;
use crate::models::{Tag, TagCategory};
use crate::query::guards::{clamp_limit, truncate_query, MAX_LOCATE_RESULTS, MAX_SEARCH_LIMIT};
use crate::query::hybrid::{lexical_score, terms, RankingWeights};

pub const DEFAULT_LOCATE_LIMIT: usize = 5;

/// A ranked source location. File-level fallbacks carry no tag fields.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RankedLocation {
    pub relative_path: String,
    pub line: u32,
    pub end_line: u32,
    pub name: Option<String>,
    pub identifier: Option<String>,
    pub category: Option<TagCategory>,
    pub lexical: f64,
    pub importance: f64,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LocatedFile {
    pub relative_path: String,
    pub score: f64,
}

fn rank_order(a: &RankedLocation, b: &RankedLocation) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.lexical.total_cmp(&a.lexical))
        .then_with(|| b.importance.total_cmp(&a.importance))
        .then_with(|| a.relative_path.cmp(&b.relative_path))
        .then_with(|| a.line.cmp(&b.line))
}

/// Tag score with the discount for non-definition matches applied.
fn tag_lexical(criteria: &str, tag: &Tag, weights: &RankingWeights) -> f64 {
    let raw = lexical_score(criteria, &tag.name, &tag.identifier, &tag.details);
    if tag.is_definition() {
        raw
    } else {
        raw * weights.secondary_discount
    }
}

/// Top `top_k` locations for `criteria`. Falls back to the most important
/// files when nothing matches lexically.
pub fn query_structural(
    criteria: &str,
    tags: &[Tag],
    graph: &ReferenceGraph,
    top_k: usize,
    weights: &RankingWeights,
) -> Vec<RankedLocation> {
    let top_k = clamp_limit(top_k, MAX_SEARCH_LIMIT);
    let criteria = truncate_query(criteria);
    let max_importance = graph.max_importance();

    let mut scored: Vec<RankedLocation> = if criteria.is_empty() {
        Vec::new()
    } else {
        tags.iter()
            .filter_map(|tag| {
                let lexical = tag_lexical(criteria, tag, weights);
                if lexical <= 0.0 {
                    return None;
                }
                let importance = graph.importance(&tag.relative_path);
                Some(RankedLocation {
                    relative_path: tag.relative_path.clone(),
                    line: tag.line,
                    end_line: tag.end_line,
                    name: Some(tag.name.clone()),
                    identifier: Some(tag.identifier.clone()),
                    category: Some(tag.category),
                    lexical,
                    importance,
                    score: weights.combine(lexical, importance, max_importance),
                })
            })
            .collect()
    };
    scored.sort_by(rank_order);

    let mut seen = HashSet::new();
    scored.retain(|loc| seen.insert((loc.relative_path.clone(), loc.line)));
    scored.truncate(top_k);

    if scored.is_empty() {
        tracing::debug!(criteria, "no lexical match, falling back to importance");
        return graph
            .ranked_nodes()
            .into_iter()
            .take(top_k)
            .map(|i| {
                let node = &graph.nodes()[i];
                RankedLocation {
                    relative_path: node.path.clone(),
                    line: 1,
                    end_line: 1,
                    name: None,
                    identifier: None,
                    category: None,
                    lexical: 0.0,
                    importance: node.importance,
                    score: weights.combine(0.0, node.importance, max_importance),
                }
            })
            .collect();
    }
    scored
}

/// Whether `summary` lists `path` as a whole word. Nested files also match
/// their bare file name, as tree-style listings show them.
fn mentioned_in(summary: &str, path: &str) -> bool {
    let base = path.rsplit_once('/').map(|(_, base)| base);
    summary
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | '`' | '\'' | '"' | '(' | ')'))
        .map(|word| word.trim_start_matches("./"))
        .any(|word| word == path || base == Some(word))
}

/// Files most relevant to `criteria`. When `workspace_summary` names indexed
/// files, only those are candidates.
pub fn locate(
    criteria: &str,
    workspace_summary: &str,
    tags: &[Tag],
    graph: &ReferenceGraph,
    limit: usize,
    weights: &RankingWeights,
) -> Vec<LocatedFile> {
    let limit = clamp_limit(limit, MAX_LOCATE_RESULTS);
    let criteria = truncate_query(criteria);
    let max_importance = graph.max_importance();

    let mut candidates: Vec<usize> = (0..graph.len()).collect();
    if !workspace_summary.trim().is_empty() {
        let mentioned: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| mentioned_in(workspace_summary, &graph.nodes()[i].path))
            .collect();
        if !mentioned.is_empty() {
            candidates = mentioned;
        }
    }

    let mut best_tag: HashMap<&str, f64> = HashMap::new();
    if !criteria.is_empty() {
        for tag in tags {
            let lexical = tag_lexical(criteria, tag, weights);
            let slot = best_tag.entry(tag.relative_path.as_str()).or_insert(0.0);
            *slot = slot.max(lexical);
        }
    }
    let query_terms = terms(criteria);

    let mut scored: Vec<(usize, f64, f64)> = candidates
        .iter()
        .map(|&i| {
            let path = graph.nodes()[i].path.as_str();
            let lexical = if !criteria.is_empty() && criteria.contains(path) {
                1.0
            } else {
                let path_terms = terms(path);
                let path_cover = if path_terms.is_empty() {
                    0.0
                } else {
                    path_terms.intersection(&query_terms).count() as f64 / path_terms.len() as f64
                };
                best_tag
                    .get(path)
                    .copied()
                    .unwrap_or(0.0)
                    .max(0.6 * path_cover)
            };
            let importance = graph.nodes()[i].importance;
            (i, lexical, weights.combine(lexical, importance, max_importance))
        })
        .collect();

    let matched = scored.iter().any(|&(_, lexical, _)| lexical > 0.0);
    if matched {
        scored.retain(|&(_, lexical, _)| lexical > 0.0);
    }
    scored.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| b.1.total_cmp(&a.1))
            .then_with(|| graph.nodes()[a.0].path.cmp(&graph.nodes()[b.0].path))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(i, _, score)| LocatedFile {
            relative_path: graph.nodes()[i].path.clone(),
            score,
        })
        .collect()
}
