//! Index and retrieval configuration.
//!
//! Every section deserializes with defaults so collaborators can supply a
//! partial JSON document. Environment variables prefixed with `EVIDENCE_`
//! override individual knobs.

use serde::{Deserialize, Serialize};

use crate::errors::EvidenceResult;
use crate::indexer::filesystem::ScanOptions;
use crate::indexer::pipeline::BuildOptions;
use crate::query::embedding::{ChunkOptions, EmbeddingOptions};
use crate::query::hybrid::RankingWeights;

/// Token budgets applied when rendering evidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayOptions {
    /// Budget for a single rendered evidence context.
    pub evidence_tokens: usize,
    /// Budget for one file's content in the `Read` step.
    pub file_tokens: usize,
    /// Budget for the workspace listing.
    pub workspace_tokens: usize,
    /// Budget for the combined evidence handed to the caller.
    pub combined_tokens: usize,
    /// Number of results requested per search.
    pub search_results: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            evidence_tokens: 1000,
            file_tokens: 2000,
            workspace_tokens: 2000,
            combined_tokens: 32768,
            search_results: 5,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub scan: ScanOptions,
    pub build: BuildOptions,
    pub ranking: RankingWeights,
    pub chunks: ChunkOptions,
    pub embeddings: EmbeddingOptions,
    pub display: DisplayOptions,
}

impl IndexConfig {
    /// Defaults with `EVIDENCE_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn from_json_str(raw: &str) -> EvidenceResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(workers) = env_usize("EVIDENCE_WORKERS") {
            self.build.workers = workers.max(1);
        }
        if let Some(secs) = env_usize("EVIDENCE_BUILD_DEADLINE_SECS") {
            self.build.deadline_secs = (secs > 0).then_some(secs as u64);
        }
        if let Some(workers) = env_usize("EVIDENCE_EMBED_WORKERS") {
            self.embeddings.embed_workers = workers.max(1);
        }
        if let Some(flag) = env_flag("EVIDENCE_RESPECT_GITIGNORE") {
            self.scan.respect_gitignore = flag;
        }
        if let Some(tokens) = env_usize("EVIDENCE_DISPLAY_TOKENS") {
            self.display.evidence_tokens = tokens.max(1);
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.trim().parse().ok()
}

fn env_flag(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
