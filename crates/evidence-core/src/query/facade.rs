//! Search façade: one entry point over the structural and embedding engines
//! that returns renderable evidence contexts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::errors::{EvidenceError, EvidenceResult};
use crate::indexer::graph::ReferenceGraph;
use crate::indexer::parser::detect_language;
use crate::indexer::pipeline::ensure_index;
use crate::models::Tag;
use crate::query::embedder::{embedder_from_options, Embedder};
use crate::query::embedding::{build_chunks, load_sources, EmbeddingIndex};
use crate::query::guards::clamp_budget;
use crate::query::search::{locate, query_structural, RankedLocation, DEFAULT_LOCATE_LIMIT};
use crate::query::tokenizer::{estimate_tokens, truncate_tokens, DropMode};
use crate::store::{IndexStore, StoredIndex};

/// Lines shown for a file-level result that has no definition span.
const FILE_HEAD_LINES: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Structural,
    Embedding,
}

impl SearchMode {
    pub const ALL: [SearchMode; 2] = [SearchMode::Structural, SearchMode::Embedding];

    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Structural => "structural",
            SearchMode::Embedding => "embedding",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = EvidenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        SearchMode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| EvidenceError::UnknownSearchMode(s.to_string()))
    }
}

/// A located piece of evidence ready for display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceContext {
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub line_start: u32,
    pub line_end: u32,
    pub snippet: String,
    pub score: f64,
    pub mode: SearchMode,
    pub label: String,
}

/// Query counters shared by whoever holds the `Arc`.
#[derive(Debug, Default)]
pub struct QueryStats {
    structural: AtomicU64,
    embedding: AtomicU64,
    locate: AtomicU64,
    embedding_builds: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueryStatsSnapshot {
    pub structural_queries: u64,
    pub embedding_queries: u64,
    pub locate_queries: u64,
    pub embedding_builds: u64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> QueryStatsSnapshot {
        QueryStatsSnapshot {
            structural_queries: self.structural.load(Ordering::Relaxed),
            embedding_queries: self.embedding.load(Ordering::Relaxed),
            locate_queries: self.locate.load(Ordering::Relaxed),
            embedding_builds: self.embedding_builds.load(Ordering::Relaxed),
        }
    }
}

pub struct CodeSearch {
    root: PathBuf,
    tags: Vec<Tag>,
    graph: ReferenceGraph,
    config: IndexConfig,
    embedder: Arc<dyn Embedder>,
    embeddings: Mutex<Option<Arc<EmbeddingIndex>>>,
    stats: Arc<QueryStats>,
}

impl CodeSearch {
    pub fn new(
        root: impl Into<PathBuf>,
        tags: Vec<Tag>,
        graph: ReferenceGraph,
        config: IndexConfig,
        embedder: Arc<dyn Embedder>,
        stats: Arc<QueryStats>,
    ) -> Self {
        Self {
            root: root.into(),
            tags,
            graph,
            config,
            embedder,
            embeddings: Mutex::new(None),
            stats,
        }
    }

    pub fn from_stored(
        root: impl Into<PathBuf>,
        index: StoredIndex,
        config: IndexConfig,
        embedder: Arc<dyn Embedder>,
        stats: Arc<QueryStats>,
    ) -> Self {
        Self::new(root, index.tags, index.graph, config, embedder, stats)
    }

    /// Load (or build and persist) the index for `root` and open a searcher
    /// with the configured embedder.
    pub fn open(root: &Path, store: &IndexStore, config: IndexConfig) -> EvidenceResult<Self> {
        let (index, rebuilt) = ensure_index(root, store, &config)?;
        if rebuilt {
            tracing::info!(root = %root.display(), "index was absent and has been built");
        }
        let embedder = embedder_from_options(&config.embeddings)?;
        Ok(Self::from_stored(root, index, config, embedder, Arc::new(QueryStats::new())))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    pub fn graph(&self) -> &ReferenceGraph {
        &self.graph
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<QueryStats> {
        &self.stats
    }

    pub fn search(&self, criteria: &str, mode: SearchMode) -> EvidenceResult<Vec<EvidenceContext>> {
        let top_k = self.config.display.search_results;
        match mode {
            SearchMode::Structural => {
                self.stats.structural.fetch_add(1, Ordering::Relaxed);
                let ranked =
                    query_structural(criteria, &self.tags, &self.graph, top_k, &self.config.ranking);
                Ok(ranked.iter().map(|loc| self.structural_context(loc)).collect())
            }
            SearchMode::Embedding => {
                self.stats.embedding.fetch_add(1, Ordering::Relaxed);
                let index = self.embedding_index();
                let hits = index.query(criteria, self.embedder.as_ref(), top_k)?;
                Ok(hits
                    .into_iter()
                    .map(|hit| EvidenceContext {
                        relative_path: hit.chunk.relative_path.clone(),
                        absolute_path: hit.chunk.absolute_path.clone(),
                        line_start: hit.chunk.line_start,
                        line_end: hit.chunk.line_end,
                        snippet: self.read_lines(
                            &hit.chunk.relative_path,
                            hit.chunk.line_start,
                            hit.chunk.line_end,
                        ),
                        score: hit.score as f64,
                        mode: SearchMode::Embedding,
                        label: match &hit.chunk.symbol {
                            Some(symbol) => format!("chunk {symbol}"),
                            None => format!("chunk lines {}-{}", hit.chunk.line_start, hit.chunk.line_end),
                        },
                    })
                    .collect())
            }
        }
    }

    /// Like [`search`](Self::search) with the mode given by name.
    pub fn search_with_mode_name(
        &self,
        criteria: &str,
        mode: &str,
    ) -> EvidenceResult<Vec<EvidenceContext>> {
        let mode = mode.parse::<SearchMode>()?;
        self.search(criteria, mode)
    }

    /// Build the embedding index now instead of on the first embedding query.
    pub fn warm_embeddings(&self) -> usize {
        self.embedding_index().len()
    }

    fn embedding_index(&self) -> Arc<EmbeddingIndex> {
        let mut slot = self.embeddings.lock();
        if let Some(index) = slot.as_ref() {
            return Arc::clone(index);
        }
        let sources = load_sources(&self.root, &self.graph);
        let chunks = build_chunks(&self.tags, &sources, &self.config.chunks);
        let (index, _omitted) =
            EmbeddingIndex::build(chunks, self.embedder.as_ref(), &self.config.embeddings);
        self.stats.embedding_builds.fetch_add(1, Ordering::Relaxed);
        let index = Arc::new(index);
        *slot = Some(Arc::clone(&index));
        index
    }

    fn structural_context(&self, loc: &RankedLocation) -> EvidenceContext {
        let (start, end) = if loc.name.is_some() {
            (loc.line, loc.end_line.max(loc.line))
        } else {
            (1, FILE_HEAD_LINES as u32)
        };
        let snippet = self.read_lines(&loc.relative_path, start, end);
        let end = if loc.name.is_some() {
            end
        } else {
            (snippet.lines().count() as u32).max(1)
        };
        let label = match (&loc.category, &loc.identifier) {
            (Some(category), Some(identifier)) => format!("{category} {identifier}"),
            _ => format!("file (importance {:.2})", loc.importance),
        };
        EvidenceContext {
            relative_path: loc.relative_path.clone(),
            absolute_path: self.root.join(&loc.relative_path),
            line_start: start,
            line_end: end,
            snippet,
            score: loc.score,
            mode: SearchMode::Structural,
            label,
        }
    }

    fn read_lines(&self, relative: &str, start: u32, end: u32) -> String {
        let path = self.root.join(relative);
        match std::fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .skip(start.saturating_sub(1) as usize)
                .take((end.saturating_sub(start) + 1) as usize)
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "snippet unavailable");
                String::new()
            }
        }
    }

    /// Render a context with the configured evidence budget.
    pub fn display(&self, context: &EvidenceContext) -> String {
        self.display_with_budget(context, self.config.display.evidence_tokens)
    }

    /// Render `path:start-end`, label, score and a fenced snippet within
    /// `max_tokens`.
    pub fn display_with_budget(&self, context: &EvidenceContext, max_tokens: usize) -> String {
        let budget = clamp_budget(max_tokens);
        let fence = detect_language(Path::new(&context.relative_path))
            .map(|lang| lang.id())
            .unwrap_or("");
        let head = format!(
            "{}:{}-{}\n[{}] {} (score {:.3})",
            context.relative_path,
            context.line_start,
            context.line_end,
            context.mode,
            context.label,
            context.score
        );
        let overhead = estimate_tokens(&head) + estimate_tokens(fence) + 3;
        let snippet = truncate_tokens(
            &context.snippet,
            budget.saturating_sub(overhead).max(1),
            DropMode::Tail,
        );
        let rendered = format!("{head}\n```{fence}\n{snippet}\n```");
        truncate_tokens(&rendered, budget, DropMode::Tail)
    }

    /// Absolute paths of the files most relevant to `criteria`.
    pub fn locate(&self, criteria: &str, workspace_summary: &str) -> Vec<PathBuf> {
        self.locate_limited(criteria, workspace_summary, DEFAULT_LOCATE_LIMIT)
    }

    pub fn locate_limited(&self, criteria: &str, workspace_summary: &str, limit: usize) -> Vec<PathBuf> {
        self.stats.locate.fetch_add(1, Ordering::Relaxed);
        locate(
            criteria,
            workspace_summary,
            &self.tags,
            &self.graph,
            limit,
            &self.config.ranking,
        )
        .into_iter()
        .map(|f| self.root.join(f.relative_path))
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::pipeline::build_index;
    use crate::query::embedder::HashingEmbedder;
    use std::fs;

    fn workspace() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("a.py"),
            "def foo():\n    \"\"\"Return the answer.\"\"\"\n    return 42\n",
        )
        .unwrap();
        fs::write(dir.path().join("b.py"), "from a import foo\n\nprint(foo())\n").unwrap();
        fs::write(
            dir.path().join("c.py"),
            "import a\n\ndef render_report(rows):\n    return [a.foo() for _ in rows]\n",
        )
        .unwrap();
        dir
    }

    fn searcher(root: &Path, stats: Arc<QueryStats>) -> CodeSearch {
        let config = IndexConfig::default();
        let out = build_index(root, &config).unwrap();
        CodeSearch::new(
            root,
            out.tags,
            out.graph,
            config,
            Arc::new(HashingEmbedder::default()),
            stats,
        )
    }

    #[test]
    fn structural_search_returns_definition_snippet() {
        let ws = workspace();
        let search = searcher(ws.path(), Arc::new(QueryStats::new()));
        let results = search.search("foo", SearchMode::Structural).unwrap();
        let top = &results[0];
        assert_eq!(top.relative_path, "a.py");
        assert_eq!((top.line_start, top.line_end), (1, 3));
        assert!(top.snippet.starts_with("def foo():"));
        assert_eq!(top.absolute_path, ws.path().join("a.py"));
        assert!(top.label.contains("function_definition"));
    }

    #[test]
    fn embedding_index_is_built_once() {
        let ws = workspace();
        let stats = Arc::new(QueryStats::new());
        let search = searcher(ws.path(), Arc::clone(&stats));
        let first = search.search("render report rows", SearchMode::Embedding).unwrap();
        assert_eq!(first[0].relative_path, "c.py");
        assert_eq!(first[0].mode, SearchMode::Embedding);
        search.search("answer", SearchMode::Embedding).unwrap();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.embedding_queries, 2);
        assert_eq!(snapshot.embedding_builds, 1);
    }

    #[test]
    fn mode_names_are_validated() {
        let ws = workspace();
        let search = searcher(ws.path(), Arc::new(QueryStats::new()));
        assert!(search.search_with_mode_name("foo", "Structural").is_ok());
        let err = search.search_with_mode_name("foo", "fuzzy").unwrap_err();
        assert!(matches!(err, EvidenceError::UnknownSearchMode(ref m) if m == "fuzzy"));
    }

    #[test]
    fn display_is_bounded_and_fenced() {
        let ws = workspace();
        let search = searcher(ws.path(), Arc::new(QueryStats::new()));
        let context = EvidenceContext {
            relative_path: "a.py".into(),
            absolute_path: ws.path().join("a.py"),
            line_start: 1,
            line_end: 400,
            snippet: "x = 1\n".repeat(400),
            score: 0.5,
            mode: SearchMode::Structural,
            label: "variable_definition a.x".into(),
        };
        let rendered = search.display_with_budget(&context, 100);
        assert!(rendered.starts_with("a.py:1-400\n[structural] variable_definition a.x"));
        assert!(rendered.contains("```python\n"));
        assert!(estimate_tokens(&rendered) <= 100);

        let small = search.display(&search.search("foo", SearchMode::Structural).unwrap()[0]);
        assert!(small.ends_with("```"));
    }

    #[test]
    fn locate_returns_absolute_paths_and_counts() {
        let ws = workspace();
        let stats = Arc::new(QueryStats::new());
        let search = searcher(ws.path(), Arc::clone(&stats));
        let files = search.locate("render_report builds rows", "");
        assert_eq!(files[0], ws.path().join("c.py"));
        assert!(files.len() <= DEFAULT_LOCATE_LIMIT);
        assert_eq!(stats.snapshot().locate_queries, 1);
    }

    #[test]
    fn fallback_results_show_file_head() {
        let ws = workspace();
        let search = searcher(ws.path(), Arc::new(QueryStats::new()));
        let results = search.search("zzzz qqqq", SearchMode::Structural).unwrap();
        assert_eq!(results[0].relative_path, "a.py");
        assert!(results[0].label.starts_with("file"));
        assert_eq!(results[0].line_end, 3);
    }

    #[test]
    fn open_builds_then_reuses_persisted_index() {
        let ws = workspace();
        let index_root = tempfile::tempdir().unwrap();
        let store = IndexStore::for_workspace(index_root.path(), ws.path()).unwrap();
        let first = CodeSearch::open(ws.path(), &store, IndexConfig::default()).unwrap();
        assert!(store.load().unwrap().is_some());
        let second = CodeSearch::open(ws.path(), &store, IndexConfig::default()).unwrap();
        assert_eq!(first.tags(), second.tags());
        assert_eq!(second.warm_embeddings(), 4);
    }
}
