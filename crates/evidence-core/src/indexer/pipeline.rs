//! Indexing pipeline orchestration with Rayon-based parallelism.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::errors::{EvidenceError, EvidenceResult};
use crate::indexer::filesystem::scan;
use crate::indexer::graph::{NodeSeed, ReferenceGraph};
use crate::indexer::pagerank::{compute_importance, ImportanceParams};
use crate::indexer::symbols::{extract_file, FileExtraction};
use crate::models::{relative_path, Tag};
use crate::store::{IndexStore, StoredIndex};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildOptions {
    /// Extraction threads.
    pub workers: usize,
    /// Overall build deadline; `None` means unbounded.
    pub deadline_secs: Option<u64>,
    pub importance: ImportanceParams,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline_secs: None,
            importance: ImportanceParams::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub tags: usize,
    pub nodes: usize,
    pub edges: usize,
    /// Recoverable per-file problems (unreadable, unsupported, unparsable).
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug)]
pub struct BuildOutput {
    pub tags: Vec<Tag>,
    pub graph: ReferenceGraph,
    pub report: BuildReport,
}

#[derive(Clone, Copy)]
struct Deadline(Option<Instant>);

impl Deadline {
    fn starting_now(secs: Option<u64>) -> Self {
        Deadline(secs.map(|s| Instant::now() + Duration::from_secs(s)))
    }

    fn expired(self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }

    fn check(self, phase: &'static str) -> EvidenceResult<()> {
        if self.expired() {
            tracing::warn!(phase, "build deadline exceeded");
            return Err(EvidenceError::DeadlineExceeded { phase });
        }
        Ok(())
    }
}

/// Scan `root` with the configured filters and build tags plus graph.
pub fn build_index(root: &Path, config: &IndexConfig) -> EvidenceResult<BuildOutput> {
    let started = Instant::now();
    let deadline = Deadline::starting_now(config.build.deadline_secs);
    let scanned = scan(root, &config.scan)?;
    deadline.check("scan")?;
    build_inner(root, scanned.files, &config.build, deadline, scanned.warnings, started)
}

/// Build from an explicit file set. Files are processed in relative-path order
/// regardless of the order given.
pub fn build_from_files(
    root: &Path,
    files: &[PathBuf],
    options: &BuildOptions,
) -> EvidenceResult<BuildOutput> {
    if !root.is_dir() {
        return Err(EvidenceError::InvalidWorkspace {
            path: root.to_path_buf(),
        });
    }
    let started = Instant::now();
    let deadline = Deadline::starting_now(options.deadline_secs);
    let mut files = files.to_vec();
    files.sort_by_key(|p| relative_path(root, p));
    files.dedup();
    build_inner(root, files, options, deadline, Vec::new(), started)
}

fn build_inner(
    root: &Path,
    files: Vec<PathBuf>,
    options: &BuildOptions,
    deadline: Deadline,
    mut warnings: Vec<String>,
    started: Instant,
) -> EvidenceResult<BuildOutput> {
    let extractions = parallel_extract(root, &files, options.workers, deadline);
    let Some(extractions) = extractions else {
        return Err(EvidenceError::DeadlineExceeded { phase: "extract" });
    };

    let mut tags = Vec::new();
    let mut seeds = Vec::with_capacity(extractions.len());
    let mut files_indexed = 0;
    for extraction in extractions {
        match &extraction.issue {
            Some(issue) => {
                tracing::warn!(path = %extraction.relative_path, %issue, "file skipped");
                warnings.push(format!("{}: {issue}", extraction.relative_path));
            }
            None => files_indexed += 1,
        }
        seeds.push(NodeSeed::new(
            extraction.relative_path,
            extraction.content_hash.unwrap_or_default(),
        ));
        tags.extend(extraction.tags);
    }
    deadline.check("extract")?;

    let mut graph = ReferenceGraph::build(&seeds, &tags);
    deadline.check("graph")?;
    compute_importance(&mut graph, &options.importance);
    deadline.check("importance")?;

    let report = BuildReport {
        files_seen: files.len(),
        files_indexed,
        tags: tags.len(),
        nodes: graph.len(),
        edges: graph.edges().len(),
        warnings,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        root = %root.display(),
        files = report.files_seen,
        indexed = report.files_indexed,
        tags = report.tags,
        edges = report.edges,
        elapsed_ms = report.elapsed_ms,
        "index built"
    );
    Ok(BuildOutput {
        tags,
        graph,
        report,
    })
}

/// Extract every file on a dedicated pool. `None` when the deadline passed
/// before all files were processed.
fn parallel_extract(
    root: &Path,
    files: &[PathBuf],
    workers: usize,
    deadline: Deadline,
) -> Option<Vec<FileExtraction>> {
    if files.is_empty() {
        return Some(Vec::new());
    }
    let job = |path: &PathBuf| (!deadline.expired()).then(|| extract_file(root, path));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build();
    match pool {
        Ok(pool) => pool.install(|| files.par_iter().map(job).collect()),
        Err(e) => {
            tracing::debug!(error = %e, "thread pool unavailable, extracting sequentially");
            files.iter().map(job).collect()
        }
    }
}

/// Load the persisted index for `root`, building and persisting it first when
/// absent. The flag reports whether a build happened.
pub fn ensure_index(
    root: &Path,
    store: &IndexStore,
    config: &IndexConfig,
) -> EvidenceResult<(StoredIndex, bool)> {
    if let Some(index) = store.load()? {
        return Ok((index, false));
    }
    Ok((rebuild_index(root, store, config)?, true))
}

/// Unconditionally rebuild and atomically replace the persisted index.
pub fn rebuild_index(
    root: &Path,
    store: &IndexStore,
    config: &IndexConfig,
) -> EvidenceResult<StoredIndex> {
    let output = build_index(root, config)?;
    let manifest = store.persist(&output.tags, &output.graph)?;
    Ok(StoredIndex {
        manifest,
        tags: output.tags,
        graph: output.graph,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn workspace(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn abc() -> tempfile::TempDir {
        workspace(&[
            ("a.py", "def foo():\n    return 1\n"),
            ("b.py", "from a import foo\n\nfoo()\n"),
            ("c.py", "import a\n\na.foo()\n"),
        ])
    }

    #[test]
    fn single_definition_two_references() {
        let ws = abc();
        let out = build_index(ws.path(), &IndexConfig::default()).unwrap();

        let definitions: Vec<_> = out.tags.iter().filter(|t| t.is_definition()).collect();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].relative_path, "a.py");
        assert_eq!(definitions[0].line, 1);

        assert_eq!(out.graph.edge_weight("b.py", "a.py"), Some(1));
        assert_eq!(out.graph.edge_weight("c.py", "a.py"), Some(1));
        assert_eq!(out.graph.edges().len(), 2);
        let top = out.graph.ranked_nodes()[0];
        assert_eq!(out.graph.nodes()[top].path, "a.py");
        assert_eq!(out.report.files_indexed, 3);
        assert!(out.report.warnings.is_empty());
    }

    #[test]
    fn worker_count_does_not_change_output() {
        let ws = workspace(&[
            ("pkg/a.py", "def f():\n    g()\n"),
            ("pkg/b.py", "def g():\n    f()\n"),
            ("pkg/c.go", "package pkg\n\nfunc H() { G() }\n"),
            ("pkg/d.ts", "export function k() { return 1; }\n"),
        ]);
        let files: Vec<PathBuf> = ["pkg/d.ts", "pkg/a.py", "pkg/c.go", "pkg/b.py"]
            .iter()
            .map(|p| ws.path().join(p))
            .collect();
        let one = build_from_files(ws.path(), &files, &BuildOptions { workers: 1, ..Default::default() })
            .unwrap();
        let many = build_from_files(ws.path(), &files, &BuildOptions { workers: 8, ..Default::default() })
            .unwrap();
        assert_eq!(one.tags, many.tags);
        assert_eq!(one.graph, many.graph);
        assert_eq!(one.tags[0].relative_path, "pkg/a.py");
    }

    #[test]
    fn broken_files_degrade_to_warnings() {
        let ws = workspace(&[
            ("good.py", "def ok():\n    pass\n"),
            ("bad.py", "def broken(:\n"),
        ]);
        let out = build_index(ws.path(), &IndexConfig::default()).unwrap();
        assert_eq!(out.report.files_seen, 2);
        assert_eq!(out.report.files_indexed, 1);
        assert_eq!(out.report.warnings.len(), 1);
        assert!(out.report.warnings[0].starts_with("bad.py"));
        // The file is still a node so the graph covers the whole build.
        assert!(out.graph.node("bad.py").is_some());
        assert!(out.tags.iter().all(|t| t.relative_path == "good.py"));
    }

    #[test]
    fn deeply_nested_file_degrades_to_warning() {
        let deep = format!("x = 1{}\n", " + 1".repeat(20_000));
        let ws = workspace(&[("gen.py", deep.as_str()), ("ok.py", "def ok():\n    pass\n")]);
        let files = vec![ws.path().join("gen.py"), ws.path().join("ok.py")];
        let out = build_from_files(ws.path(), &files, &BuildOptions { workers: 2, ..Default::default() })
            .unwrap();
        assert_eq!(out.report.files_indexed, 1);
        assert_eq!(out.report.warnings.len(), 1);
        assert!(out.report.warnings[0].contains("nesting deeper than"));
        assert!(out.graph.node("gen.py").is_some());
        assert_eq!(out.tags.len(), 1);
    }

    #[test]
    fn empty_workspace_builds_empty_index() {
        let ws = workspace(&[("README.md", "hello")]);
        let out = build_index(ws.path(), &IndexConfig::default()).unwrap();
        assert!(out.tags.is_empty());
        assert!(out.graph.is_empty());
    }

    #[test]
    fn missing_root_is_invalid_workspace() {
        let ws = workspace(&[]);
        let err = build_from_files(&ws.path().join("nope"), &[], &BuildOptions::default()).unwrap_err();
        assert!(matches!(err, EvidenceError::InvalidWorkspace { .. }));
    }

    #[test]
    fn expired_deadline_keeps_previous_index() {
        let ws = abc();
        let index_dir = tempfile::tempdir().unwrap();
        let store = IndexStore::at(index_dir.path());

        let (first, rebuilt) = ensure_index(ws.path(), &store, &IndexConfig::default()).unwrap();
        assert!(rebuilt);
        let (again, rebuilt) = ensure_index(ws.path(), &store, &IndexConfig::default()).unwrap();
        assert!(!rebuilt);
        assert_eq!(again.tags, first.tags);

        let mut config = IndexConfig::default();
        config.build.deadline_secs = Some(0);
        let err = rebuild_index(ws.path(), &store, &config).unwrap_err();
        assert!(matches!(err, EvidenceError::DeadlineExceeded { .. }));

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.manifest.generation, first.manifest.generation);
        assert_eq!(loaded.tags, first.tags);
    }
}
