//! Embedding index over source chunks.
//!
//! Chunks follow definitions (one per function/class/variable body); files
//! without definitions are split into fixed line windows. Vectors are
//! computed on a bounded pool, each chunk retrying on its own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::EmbedError;
use crate::indexer::graph::ReferenceGraph;
use crate::models::Tag;
use crate::query::embedder::{embed_with_retry, Embedder, RetryPolicy, DEFAULT_HASHING_DIMENSIONS};
use crate::query::guards::{clamp_limit, truncate_query, MAX_SEARCH_LIMIT};
use crate::query::tokenizer::{truncate_tokens, DropMode};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkOptions {
    /// Window size for files without definitions.
    pub window_lines: usize,
    pub chunk_token_budget: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            window_lines: 40,
            chunk_token_budget: 512,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    Hashing,
    Http,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingOptions {
    pub provider: EmbeddingProvider,
    /// Base URL of an OpenAI-compatible API (`.../v1`).
    pub endpoint: Option<String>,
    pub model: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub timeout_secs: u64,
    /// Dimensions of the hashing embedder.
    pub dimensions: usize,
    pub embed_workers: usize,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Hashing,
            endpoint: None,
            model: "text-embedding-3-small".to_string(),
            api_key_env: "EVIDENCE_EMBEDDING_API_KEY".to_string(),
            timeout_secs: 30,
            dimensions: DEFAULT_HASHING_DIMENSIONS,
            embed_workers: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Chunk {
    pub id: usize,
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub line_start: u32,
    pub line_end: u32,
    /// Qualified identifier of the definition, `None` for line windows.
    pub symbol: Option<String>,
    pub text: String,
}

/// File content handed to the chunker.
#[derive(Clone, Debug)]
pub struct SourceFile {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub content: String,
}

/// Read the content of every graph node under `root`; unreadable files are
/// skipped.
pub fn load_sources(root: &Path, graph: &ReferenceGraph) -> Vec<SourceFile> {
    graph
        .nodes()
        .iter()
        .filter_map(|node| {
            let absolute_path = root.join(&node.path);
            match std::fs::read_to_string(&absolute_path) {
                Ok(content) => Some(SourceFile {
                    relative_path: node.path.clone(),
                    absolute_path,
                    content,
                }),
                Err(e) => {
                    tracing::warn!(path = %node.path, error = %e, "source unavailable for chunking");
                    None
                }
            }
        })
        .collect()
}

pub fn build_chunks(tags: &[Tag], sources: &[SourceFile], options: &ChunkOptions) -> Vec<Chunk> {
    let mut definitions: HashMap<&str, Vec<&Tag>> = HashMap::new();
    for tag in tags.iter().filter(|t| t.is_definition()) {
        definitions.entry(tag.relative_path.as_str()).or_default().push(tag);
    }

    let window = options.window_lines.max(1);
    let mut chunks = Vec::new();
    for source in sources {
        let lines: Vec<&str> = source.content.lines().collect();
        let mut push = |start: usize, end: usize, symbol: Option<String>, header: String| {
            let body = lines[start - 1..end].join("\n");
            let text = truncate_tokens(
                &format!("{header}\n{body}"),
                options.chunk_token_budget,
                DropMode::Tail,
            );
            let id = chunks.len();
            chunks.push(Chunk {
                id,
                relative_path: source.relative_path.clone(),
                absolute_path: source.absolute_path.clone(),
                line_start: start as u32,
                line_end: end as u32,
                symbol,
                text,
            });
        };

        let mut pieces: Vec<(usize, usize, Option<String>, String)> = Vec::new();
        let mut covered = vec![false; lines.len()];
        if let Some(defs) = definitions.get(source.relative_path.as_str()) {
            if !lines.is_empty() {
                for tag in defs {
                    let start = (tag.line as usize).clamp(1, lines.len());
                    let end = (tag.end_line as usize).clamp(start, lines.len());
                    covered[start - 1..end].iter_mut().for_each(|c| *c = true);
                    let header = format!("{}:{}\n{}", source.relative_path, tag.identifier, tag.details);
                    pieces.push((start, end, Some(tag.identifier.clone()), header));
                }
            }
        }

        // Lines outside every definition are split into fixed windows.
        let mut row = 0;
        while row < lines.len() {
            if covered[row] {
                row += 1;
                continue;
            }
            let start = row;
            while row < lines.len() && !covered[row] && row - start < window {
                row += 1;
            }
            if lines[start..row].iter().any(|l| !l.trim().is_empty()) {
                let header = format!("{}:{}-{}", source.relative_path, start + 1, row);
                pieces.push((start + 1, row, None, header));
            }
        }

        pieces.sort_by_key(|(start, end, _, _)| (*start, *end));
        for (start, end, symbol, header) in pieces {
            push(start, end, symbol, header);
        }
    }
    chunks
}

/// A chunk that could not be embedded.
#[derive(Clone, Debug, PartialEq)]
pub struct OmittedChunk {
    pub chunk_id: usize,
    pub relative_path: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EmbeddingHit<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
}

#[derive(Debug)]
pub struct EmbeddingIndex {
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
    retry: RetryPolicy,
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

impl EmbeddingIndex {
    /// Embed `chunks` with at most `embed_workers` concurrent requests.
    /// Chunks that still fail after retries are left out and reported.
    pub fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        options: &EmbeddingOptions,
    ) -> (Self, Vec<OmittedChunk>) {
        let embed = |chunk: &Chunk| embed_with_retry(embedder, &chunk.text, &options.retry);
        let results: Vec<Result<Vec<f32>, EmbedError>> = match rayon::ThreadPoolBuilder::new()
            .num_threads(options.embed_workers.max(1))
            .build()
        {
            Ok(pool) => pool.install(|| chunks.par_iter().map(embed).collect()),
            Err(e) => {
                tracing::debug!(error = %e, "embedding pool unavailable, running sequentially");
                chunks.iter().map(embed).collect()
            }
        };

        let dimensions = results
            .iter()
            .find_map(|r| r.as_ref().ok().map(Vec::len))
            .unwrap_or(0);
        let mut kept = Vec::new();
        let mut vectors = Vec::new();
        let mut omitted = Vec::new();
        for (chunk, result) in chunks.into_iter().zip(results) {
            let reason = match result {
                Ok(vector) if vector.len() == dimensions && dimensions > 0 => {
                    kept.push(chunk);
                    vectors.push(vector);
                    continue;
                }
                Ok(vector) => format!("dimension {} (expected {dimensions})", vector.len()),
                Err(e) => e.to_string(),
            };
            tracing::warn!(
                chunk = chunk.id,
                path = %chunk.relative_path,
                embedder = embedder.name(),
                %reason,
                "chunk omitted from embedding index"
            );
            omitted.push(OmittedChunk {
                chunk_id: chunk.id,
                relative_path: chunk.relative_path,
                reason,
            });
        }
        tracing::info!(
            embedded = kept.len(),
            omitted = omitted.len(),
            embedder = embedder.name(),
            "embedding index built"
        );
        let index = Self {
            chunks: kept,
            vectors,
            dimensions,
            retry: options.retry.clone(),
        };
        (index, omitted)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Chunks most similar to `criteria`, best first, ties by chunk id.
    pub fn query(
        &self,
        criteria: &str,
        embedder: &dyn Embedder,
        top_n: usize,
    ) -> Result<Vec<EmbeddingHit<'_>>, EmbedError> {
        let criteria = truncate_query(criteria);
        if criteria.is_empty() || top_n == 0 || self.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query = embed_with_retry(embedder, criteria, &self.retry)?;
        if query.len() != self.dimensions {
            return Err(EmbedError::Permanent(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.dimensions
            )));
        }
        if query.iter().all(|v| *v == 0.0) {
            return Ok(Vec::new());
        }

        let mut hits: Vec<EmbeddingHit<'_>> = self
            .chunks
            .iter()
            .zip(&self.vectors)
            .map(|(chunk, vector)| EmbeddingHit {
                chunk,
                score: cosine(&query, vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk.id.cmp(&b.chunk.id))
        });
        hits.truncate(clamp_limit(top_n, MAX_SEARCH_LIMIT));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TagCategory;
    use crate::query::embedder::HashingEmbedder;

    fn source(path: &str, content: &str) -> SourceFile {
        SourceFile {
            relative_path: path.to_string(),
            absolute_path: PathBuf::from("/ws").join(path),
            content: content.to_string(),
        }
    }

    fn def(path: &str, line: u32, end_line: u32, name: &str) -> Tag {
        Tag {
            absolute_path: PathBuf::from("/ws").join(path),
            relative_path: path.to_string(),
            line,
            end_line,
            name: name.to_string(),
            identifier: format!("mod.{name}"),
            category: TagCategory::FunctionDefinition,
            details: format!("def {name}():"),
        }
    }

    fn sample_chunks() -> Vec<Chunk> {
        let code = "def parse_config(path):\n    return read_json(path)\n\ndef render_button(color):\n    draw(color)\n";
        let tags = vec![def("app.py", 1, 2, "parse_config"), def("app.py", 4, 5, "render_button")];
        build_chunks(&tags, &[source("app.py", code)], &ChunkOptions::default())
    }

    #[test]
    fn definitions_become_chunks() {
        let chunks = sample_chunks();
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].line_start, chunks[0].line_end), (1, 2));
        assert_eq!(chunks[1].symbol.as_deref(), Some("mod.render_button"));
        assert!(chunks[0].text.starts_with("app.py:mod.parse_config"));
        assert!(chunks[0].text.contains("read_json"));
        assert_eq!(chunks[1].id, 1);
    }

    #[test]
    fn files_without_definitions_use_windows() {
        let content: String = (1..=90).map(|i| format!("line {i}\n")).collect();
        let chunks = build_chunks(&[], &[source("notes.py", &content)], &ChunkOptions::default());
        let ranges: Vec<_> = chunks.iter().map(|c| (c.line_start, c.line_end)).collect();
        assert_eq!(ranges, vec![(1, 40), (41, 80), (81, 90)]);
        assert!(chunks.iter().all(|c| c.symbol.is_none()));
        assert!(build_chunks(&[], &[source("empty.py", "")], &ChunkOptions::default()).is_empty());
    }

    #[test]
    fn top_level_code_between_definitions_is_chunked() {
        let code = "def helper():\n    return 1\n\nif __name__ == \"__main__\":\n    model = train_model()\n    print(model)\n";
        let tags = vec![def("main.py", 1, 2, "helper")];
        let chunks = build_chunks(&tags, &[source("main.py", code)], &ChunkOptions::default());
        let ranges: Vec<_> = chunks.iter().map(|c| (c.line_start, c.line_end)).collect();
        assert_eq!(ranges, vec![(1, 2), (3, 6)]);
        assert!(chunks[1].symbol.is_none());
        assert!(chunks[1].text.contains("train_model"));
        assert_eq!(chunks[1].id, 1);
    }

    #[test]
    fn chunk_text_respects_budget() {
        let body: String = (0..500).map(|i| format!("    value_{i} = compute({i})\n")).collect();
        let content = format!("def big():\n{body}");
        let tags = vec![def("big.py", 1, 501, "big")];
        let options = ChunkOptions {
            chunk_token_budget: 64,
            ..ChunkOptions::default()
        };
        let chunks = build_chunks(&tags, &[source("big.py", &content)], &options);
        assert!(crate::query::tokenizer::estimate_tokens(&chunks[0].text) <= 64);
    }

    #[test]
    fn query_ranks_similar_chunks_first() {
        let embedder = HashingEmbedder::default();
        let (index, omitted) =
            EmbeddingIndex::build(sample_chunks(), &embedder, &EmbeddingOptions::default());
        assert!(omitted.is_empty());
        let hits = index.query("parse the json config", &embedder, 5).unwrap();
        assert_eq!(hits[0].chunk.symbol.as_deref(), Some("mod.parse_config"));
        assert!(hits.len() <= 2);
        assert!(index.query("", &embedder, 5).unwrap().is_empty());
    }

    struct Poisoned;

    impl Embedder for Poisoned {
        fn name(&self) -> &str {
            "poisoned"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            if text.contains("render") {
                Err(EmbedError::Permanent("rejected".into()))
            } else {
                HashingEmbedder::default().embed(text)
            }
        }
    }

    #[test]
    fn failing_chunks_are_omitted() {
        let (index, omitted) =
            EmbeddingIndex::build(sample_chunks(), &Poisoned, &EmbeddingOptions::default());
        assert_eq!(index.len(), 1);
        assert_eq!(omitted.len(), 1);
        assert_eq!(omitted[0].chunk_id, 1);
    }

    #[test]
    fn worker_count_does_not_change_index() {
        let content: String = (1..=400).map(|i| format!("item_{i} = {i}\n")).collect();
        let chunks = build_chunks(&[], &[source("data.py", &content)], &ChunkOptions::default());
        let embedder = HashingEmbedder::default();
        let serial = EmbeddingOptions {
            embed_workers: 1,
            ..EmbeddingOptions::default()
        };
        let parallel = EmbeddingOptions {
            embed_workers: 8,
            ..EmbeddingOptions::default()
        };
        let (a, _) = EmbeddingIndex::build(chunks.clone(), &embedder, &serial);
        let (b, _) = EmbeddingIndex::build(chunks, &embedder, &parallel);
        assert_eq!(a.chunks(), b.chunks());
        let qa: Vec<_> = a.query("item_7", &embedder, 3).unwrap().iter().map(|h| h.chunk.id).collect();
        let qb: Vec<_> = b.query("item_7", &embedder, 3).unwrap().iter().map(|h| h.chunk.id).collect();
        assert_eq!(qa, qb);
        assert_eq!(a.len(), 10);
        assert_eq!(qa.len(), 3);
        assert!(a.query("item_7", &embedder, 0).unwrap().is_empty());
    }
}
