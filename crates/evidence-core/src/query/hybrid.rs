//! Hybrid scoring helpers: lexical match of criteria against a tag, blended
//! with graph importance.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9]*").unwrap());

const STOP_WORDS: &[&str] = &[
    "an", "and", "any", "are", "as", "be", "by", "can", "does", "for", "from", "has", "have",
    "if", "in", "into", "is", "it", "must", "not", "of", "on", "or", "should", "that", "the",
    "this", "to", "when", "which", "with",
];

/// Fixed blend of lexical and importance signals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
    pub lexical_weight: f64,
    pub importance_weight: f64,
    /// Multiplier for reference and import matches relative to definitions.
    pub secondary_discount: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            lexical_weight: 0.7,
            importance_weight: 0.3,
            secondary_discount: 0.5,
        }
    }
}

impl RankingWeights {
    pub fn combine(&self, lexical: f64, importance: f64, max_importance: f64) -> f64 {
        let normalized = if max_importance > 0.0 {
            importance / max_importance
        } else {
            0.0
        };
        self.lexical_weight * lexical + self.importance_weight * normalized
    }
}

/// Split camelCase / snake_case words into lowercase subwords.
fn split_word(word: &str, out: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    let mut start = 0;
    for i in 1..chars.len() {
        let (prev, cur) = (chars[i - 1], chars[i]);
        let next_lower = chars.get(i + 1).is_some_and(|c| c.is_ascii_lowercase());
        let boundary = (prev.is_ascii_lowercase() && cur.is_ascii_uppercase())
            || (prev.is_ascii_uppercase() && cur.is_ascii_uppercase() && next_lower);
        if boundary {
            push_term(&chars[start..i], out);
            start = i;
        }
    }
    push_term(&chars[start..], out);
}

fn push_term(chars: &[char], out: &mut Vec<String>) {
    let term: String = chars.iter().collect::<String>().to_lowercase();
    if term.len() >= 2 && !STOP_WORDS.contains(&term.as_str()) {
        out.push(term);
    }
}

/// Lowercase subword terms of `value` in order of appearance, without stop
/// words. Repeats are kept.
pub fn term_list(value: &str) -> Vec<String> {
    let mut out = Vec::new();
    for m in WORD_RE.find_iter(value) {
        split_word(m.as_str(), &mut out);
    }
    out
}

/// Distinct terms of `value`.
pub fn terms(value: &str) -> BTreeSet<String> {
    term_list(value).into_iter().collect()
}

/// Whether `needle` occurs in `haystack` delimited by non-identifier chars.
fn mentions_word(haystack: &str, needle: &str) -> bool {
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    haystack.match_indices(needle).any(|(at, _)| {
        let before = haystack[..at].chars().next_back();
        let after = haystack[at + needle.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

fn coverage(target: &BTreeSet<String>, query: &BTreeSet<String>) -> f64 {
    if target.is_empty() {
        return 0.0;
    }
    target.intersection(query).count() as f64 / target.len() as f64
}

/// Lexical relevance of a tag to free-text criteria, in `[0, 1]`.
pub fn lexical_score(criteria: &str, name: &str, identifier: &str, details: &str) -> f64 {
    let q = criteria.trim().to_lowercase();
    if q.is_empty() || name.is_empty() {
        return 0.0;
    }
    let n = name.to_lowercase();
    let id = identifier.to_lowercase();
    if q == n || q == id {
        return 1.0;
    }
    if n.contains(&q) {
        return 0.9;
    }
    if id.contains(&q) {
        return 0.8;
    }
    if n.chars().count() >= 3 && mentions_word(&q, &n) {
        return 0.75;
    }

    let query_terms = terms(criteria);
    if query_terms.is_empty() {
        return 0.0;
    }
    let symbol_cover = coverage(&terms(name), &query_terms);
    let detail_cover = coverage(&terms(details), &query_terms);
    (0.6 * symbol_cover + 0.1 * detail_cover).min(0.7)
}
