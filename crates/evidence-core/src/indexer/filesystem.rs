//! Filesystem scanning helpers for indexing passes.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{EvidenceError, EvidenceResult};
use crate::indexer::parser::is_indexable;
use crate::models::relative_path;

/// Which files a scan yields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionFilter {
    /// Only files with a registered grammar.
    #[default]
    SourceOnly,
    /// Every file that survives the name filters.
    All,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// When non-empty, a file must sit under a directory with one of these names.
    pub include_dirs: Vec<String>,
    /// A directory is skipped when any entry is a substring of its name.
    pub exclude_dirs: Vec<String>,
    /// Exact names, `*.ext` patterns, or bare `.ext` entries.
    pub exclude_files: Vec<String>,
    pub respect_gitignore: bool,
    pub extensions: ExtensionFilter,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            exclude_dirs: vec!["__pycache__".to_string(), "env".to_string()],
            exclude_files: vec![".DS_Store".to_string()],
            respect_gitignore: false,
            extensions: ExtensionFilter::SourceOnly,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScanReport {
    /// Absolute paths, sorted by relative path.
    pub files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

fn dir_excluded(name: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .map(|p| p.trim())
        .any(|p| !p.is_empty() && name.contains(p))
}

fn file_excluded(name: &str, patterns: &[String]) -> bool {
    let extension = Path::new(name).extension().and_then(|e| e.to_str());
    patterns.iter().map(|p| p.trim()).any(|p| {
        if p.is_empty() {
            return false;
        }
        if p == name {
            return true;
        }
        if let Some(ext) = p.strip_prefix("*.") {
            return name.len() > ext.len() + 1 && name.ends_with(&format!(".{ext}"));
        }
        match (p.strip_prefix('.'), extension) {
            (Some(ext), Some(actual)) => ext == actual,
            _ => false,
        }
    })
}

fn under_included_dir(rel_path: &str, include_dirs: &[String]) -> bool {
    if include_dirs.is_empty() {
        return true;
    }
    let mut components: Vec<&str> = rel_path.split('/').collect();
    components.pop();
    components
        .iter()
        .any(|c| include_dirs.iter().any(|inc| inc.trim() == *c))
}

fn ensure_workspace(root: &Path) -> EvidenceResult<()> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(EvidenceError::InvalidWorkspace {
            path: root.to_path_buf(),
        })
    }
}

/// Enumerate candidate files under `root`.
pub fn scan(root: &Path, options: &ScanOptions) -> EvidenceResult<ScanReport> {
    ensure_workspace(root)?;

    let exclude_dirs = options.exclude_dirs.clone();
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(true)
        .parents(false)
        .ignore(false)
        .git_global(false)
        .git_exclude(false)
        .git_ignore(options.respect_gitignore)
        .require_git(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !is_dir || !dir_excluded(&entry.file_name().to_string_lossy(), &exclude_dirs)
        });

    let mut report = ScanReport::default();
    let mut found: Vec<(String, PathBuf)> = Vec::new();

    for result in builder.build() {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable workspace entry");
                report.warnings.push(err.to_string());
                continue;
            }
        };
        if let Some(err) = entry.error() {
            tracing::warn!(path = %entry.path().display(), error = %err, "ignore rule problem");
            report.warnings.push(err.to_string());
        }
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || file_excluded(&name, &options.exclude_files) {
            continue;
        }
        if options.extensions == ExtensionFilter::SourceOnly && !is_indexable(entry.path()) {
            continue;
        }
        let rel = relative_path(root, entry.path());
        if !under_included_dir(&rel, &options.include_dirs) {
            continue;
        }
        found.push((rel, entry.into_path()));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    report.files = found.into_iter().map(|(_, path)| path).collect();
    tracing::debug!(
        root = %root.display(),
        files = report.files.len(),
        warnings = report.warnings.len(),
        "workspace scan complete"
    );
    Ok(report)
}

pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

pub fn compute_content_hash(path: &Path) -> std::io::Result<String> {
    Ok(hash_bytes(&std::fs::read(path)?))
}

// ---------------------------------------------------------------------------
// Workspace structure listing
// ---------------------------------------------------------------------------

/// Directory to file listing of a workspace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceStructure {
    pub workspace: PathBuf,
    /// Relative directory (`.` for the root) to relative file paths.
    pub tree: BTreeMap<String, Vec<String>>,
}

impl WorkspaceStructure {
    /// List every non-hidden, non-excluded file regardless of language.
    pub fn collect(root: &Path, options: &ScanOptions) -> EvidenceResult<Self> {
        let options = ScanOptions {
            extensions: ExtensionFilter::All,
            ..options.clone()
        };
        let report = scan(root, &options)?;
        let mut tree: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for path in &report.files {
            let rel = relative_path(root, path);
            let dir = match rel.rfind('/') {
                Some(idx) => rel[..idx].to_string(),
                None => ".".to_string(),
            };
            tree.entry(dir).or_default().push(rel);
        }
        Ok(Self {
            workspace: root.to_path_buf(),
            tree,
        })
    }

    pub fn file_count(&self) -> usize {
        self.tree.values().map(Vec::len).sum()
    }

    /// Plain indented listing; directories deeper than `max_depth` are omitted.
    pub fn summary(&self, max_depth: Option<usize>) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Workspace: {}", self.workspace.display());
        let _ = writeln!(out, "Total files: {}", self.file_count());
        for (dir, files) in &self.tree {
            let depth = if dir == "." {
                0
            } else {
                dir.matches('/').count() + 1
            };
            if max_depth.is_some_and(|max| depth > max) {
                continue;
            }
            let indent = "  ".repeat(depth);
            if dir != "." {
                let _ = writeln!(out, "{indent}{dir}/");
            }
            for file in files {
                let _ = writeln!(out, "{indent}  {file}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    fn rels(root: &Path, report: &ScanReport) -> Vec<String> {
        report.files.iter().map(|p| relative_path(root, p)).collect()
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = scan(&dir.path().join("nope"), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, EvidenceError::InvalidWorkspace { .. }));
    }

    #[test]
    fn file_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "");
        let err = scan(&dir.path().join("a.py"), &ScanOptions::default()).unwrap_err();
        assert!(matches!(err, EvidenceError::InvalidWorkspace { .. }));
    }

    #[test]
    fn results_are_sorted_by_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        for rel in ["z.py", "b/c.py", "a.py", "b/a.go"] {
            write(dir.path(), rel, "");
        }
        let report = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["a.py", "b/a.go", "b/c.py", "z.py"]);
    }

    #[test]
    fn excluded_dirs_match_by_substring() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/a.py", "");
        write(dir.path(), "venv_old/lib.py", "");
        write(dir.path(), "pkg/__pycache__/x.py", "");
        let options = ScanOptions {
            exclude_dirs: vec!["venv".into(), "__pycache__".into()],
            ..ScanOptions::default()
        };
        let report = scan(dir.path(), &options).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["src/a.py"]);
    }

    #[test]
    fn excluded_files_by_name_and_extension() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "keep.py", "");
        write(dir.path(), "setup.py", "");
        write(dir.path(), "gen.pyi", "");
        write(dir.path(), "types.ts", "");
        let options = ScanOptions {
            exclude_files: vec!["setup.py".into(), "*.pyi".into(), ".ts".into()],
            ..ScanOptions::default()
        };
        let report = scan(dir.path(), &options).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["keep.py"]);
    }

    #[test]
    fn hidden_entries_are_always_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".hidden.py", "");
        write(dir.path(), ".cache/inner.py", "");
        write(dir.path(), "visible.py", "");
        let report = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["visible.py"]);
    }

    #[test]
    fn include_dirs_restrict_to_named_directories() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "root.py", "");
        write(dir.path(), "src/a.py", "");
        write(dir.path(), "src/deep/b.py", "");
        write(dir.path(), "scripts/c.py", "");
        let options = ScanOptions {
            include_dirs: vec!["src".into()],
            ..ScanOptions::default()
        };
        let report = scan(dir.path(), &options).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["src/a.py", "src/deep/b.py"]);
    }

    #[test]
    fn source_only_skips_unregistered_extensions() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "# hi");
        write(dir.path(), "a.py", "");
        let report = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["a.py"]);

        let all = ScanOptions {
            extensions: ExtensionFilter::All,
            ..ScanOptions::default()
        };
        let report = scan(dir.path(), &all).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["README.md", "a.py"]);
    }

    #[test]
    fn gitignore_is_honoured_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), ".gitignore", "build/\n");
        write(dir.path(), "build/out.py", "");
        write(dir.path(), "a.py", "");
        let plain = scan(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(plain.files.len(), 2);
        let options = ScanOptions {
            respect_gitignore: true,
            ..ScanOptions::default()
        };
        let report = scan(dir.path(), &options).unwrap();
        assert_eq!(rels(dir.path(), &report), vec!["a.py"]);
    }

    #[test]
    fn content_hash_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        let first = compute_content_hash(&dir.path().join("a.py")).unwrap();
        assert_eq!(first, hash_bytes(b"x = 1\n"));
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn structure_lists_all_files_by_directory() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "README.md", "");
        write(dir.path(), "src/db.py", "");
        write(dir.path(), "src/env/skip.py", "");
        let structure = WorkspaceStructure::collect(dir.path(), &ScanOptions::default()).unwrap();
        assert_eq!(structure.file_count(), 2);
        assert_eq!(structure.tree["."], vec!["README.md".to_string()]);
        let summary = structure.summary(None);
        assert!(summary.contains("src/\n"));
        assert!(summary.contains("    src/db.py"));
        assert!(!structure.summary(Some(0)).contains("src/db.py"));
    }
}
