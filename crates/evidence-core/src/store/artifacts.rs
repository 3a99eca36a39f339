//! Persisted index artifacts: a tag list and a graph database per generation,
//! committed by atomically replacing a small manifest.
//!
//! Layout under `<index_root>/<basename>-<hash>/`:
//!
//! ```text
//! manifest.json          commit point, names the live generation
//! tags-<gen>.json        ordered tag records
//! graph-<gen>.sqlite     nodes / edges / graph_meta
//! ```
//!
//! Readers only ever follow the manifest, so a crashed or failed write leaves
//! the previous generation servable.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, DatabaseName, OpenFlags};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{EvidenceError, EvidenceResult};
use crate::indexer::filesystem::{compute_content_hash, scan, ScanOptions};
use crate::indexer::graph::{GraphEdge, GraphNode, ReferenceGraph};
use crate::models::{relative_path, Tag};
use crate::store::schema;

pub const FORMAT_VERSION: u32 = 1;
const MANIFEST_FILE: &str = "manifest.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub generation: u64,
    pub tags_file: String,
    pub graph_file: String,
    pub tags_crc32: u32,
    pub graph_crc32: u32,
    pub tag_count: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub created_at_ms: u64,
}

/// A loaded, validated index.
#[derive(Clone, Debug)]
pub struct StoredIndex {
    pub manifest: Manifest,
    pub tags: Vec<Tag>,
    pub graph: ReferenceGraph,
}

/// Files whose content differs from what the stored graph was built from.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaleReport {
    pub changed: Vec<String>,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl StaleReport {
    pub fn is_stale(&self) -> bool {
        !(self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty())
    }
}

#[derive(Clone, Debug)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Store for `workspace_root` under `index_root`, in a directory named
    /// after the workspace and a digest of its canonical path.
    pub fn for_workspace(index_root: &Path, workspace_root: &Path) -> EvidenceResult<Self> {
        let canonical = workspace_root
            .canonicalize()
            .ok()
            .filter(|p| p.is_dir())
            .ok_or_else(|| EvidenceError::InvalidWorkspace {
                path: workspace_root.to_path_buf(),
            })?;
        let digest = Sha256::digest(canonical.to_string_lossy().as_bytes());
        let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
        let base: String = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let base = if base.is_empty() { "workspace".to_string() } else { base };
        Ok(Self {
            dir: index_root.join(format!("{base}-{hex}")),
        })
    }

    /// Store rooted at an explicit directory.
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(MANIFEST_FILE)
    }

    pub fn read_manifest(&self) -> EvidenceResult<Option<Manifest>> {
        let path = self.manifest_path();
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: Manifest = serde_json::from_slice(&raw)
            .map_err(|e| EvidenceError::corrupted("manifest", &path, e.to_string()))?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(EvidenceError::corrupted(
                "manifest",
                &path,
                format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    manifest.format_version
                ),
            ));
        }
        Ok(Some(manifest))
    }

    /// Write a new generation and commit it. On failure nothing of the new
    /// generation is left behind and the previous one stays loadable.
    pub fn persist(&self, tags: &[Tag], graph: &ReferenceGraph) -> EvidenceResult<Manifest> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| EvidenceError::persist("index directory", &self.dir, e))?;

        let generation = match self.read_manifest() {
            Ok(Some(previous)) => previous.generation + 1,
            Ok(None) => 1,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "overwriting unreadable manifest");
                1
            }
        };

        match self.write_generation(generation, tags, graph) {
            Ok(manifest) => {
                self.remove_stale_generations(&manifest);
                tracing::info!(
                    dir = %self.dir.display(),
                    generation,
                    tags = manifest.tag_count,
                    nodes = manifest.node_count,
                    edges = manifest.edge_count,
                    "index persisted"
                );
                Ok(manifest)
            }
            Err(e) => {
                for name in [tags_file(generation), graph_file(generation)] {
                    let path = self.dir.join(&name);
                    let _ = fs::remove_file(tmp_path(&path));
                    let _ = fs::remove_file(&path);
                }
                let _ = fs::remove_file(tmp_path(&self.manifest_path()));
                Err(e)
            }
        }
    }

    fn write_generation(
        &self,
        generation: u64,
        tags: &[Tag],
        graph: &ReferenceGraph,
    ) -> EvidenceResult<Manifest> {
        let tags_name = tags_file(generation);
        let tags_bytes = serde_json::to_vec(tags)?;
        write_atomic(&self.dir.join(&tags_name), &tags_bytes, "tags")?;

        let graph_name = graph_file(generation);
        let graph_path = self.dir.join(&graph_name);
        write_graph_db(&graph_path, graph)?;
        let graph_bytes =
            fs::read(&graph_path).map_err(|e| EvidenceError::persist("graph", &graph_path, e))?;

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            generation,
            tags_file: tags_name,
            graph_file: graph_name,
            tags_crc32: crc32fast::hash(&tags_bytes),
            graph_crc32: crc32fast::hash(&graph_bytes),
            tag_count: tags.len(),
            node_count: graph.len(),
            edge_count: graph.edges().len(),
            created_at_ms: now_ms(),
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        write_atomic(&self.manifest_path(), &manifest_bytes, "manifest")?;
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        Ok(manifest)
    }

    /// Delete artifacts older than the generation before `live`. The previous
    /// generation stays on disk for readers that picked up the old manifest.
    fn remove_stale_generations(&self, live: &Manifest) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        let keep_from = live.generation.saturating_sub(1);
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale = artifact_generation(&name).is_some_and(|g| g < keep_from);
            if stale {
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::debug!(file = %name, error = %e, "could not remove old artifact");
                }
            }
        }
    }

    /// Load the live generation. `Ok(None)` means nothing usable was ever
    /// committed; damaged artifacts are errors.
    pub fn load(&self) -> EvidenceResult<Option<StoredIndex>> {
        let Some(manifest) = self.read_manifest()? else {
            return Ok(None);
        };
        self.load_committed(manifest)
    }

    /// Load the generation `manifest` names. If its artifacts are gone, a
    /// writer may have committed meanwhile, so the manifest is read once more.
    fn load_committed(&self, manifest: Manifest) -> EvidenceResult<Option<StoredIndex>> {
        let generation = manifest.generation;
        if let Some(index) = self.load_generation(manifest)? {
            return Ok(Some(index));
        }
        if let Some(newer) = self.read_manifest()?.filter(|m| m.generation != generation) {
            tracing::debug!(from = generation, to = newer.generation, "generation replaced while loading");
            if let Some(index) = self.load_generation(newer)? {
                return Ok(Some(index));
            }
        }
        tracing::warn!(dir = %self.dir.display(), "manifest names missing artifacts");
        Ok(None)
    }

    /// `Ok(None)` when an artifact of this generation does not exist.
    fn load_generation(&self, manifest: Manifest) -> EvidenceResult<Option<StoredIndex>> {
        let tags_path = self.dir.join(&manifest.tags_file);
        let graph_path = self.dir.join(&manifest.graph_file);
        let Some(tags_bytes) = read_artifact(&tags_path)? else {
            return Ok(None);
        };
        if crc32fast::hash(&tags_bytes) != manifest.tags_crc32 {
            return Err(EvidenceError::corrupted("tags", &tags_path, "checksum mismatch"));
        }
        let tags: Vec<Tag> = serde_json::from_slice(&tags_bytes)
            .map_err(|e| EvidenceError::corrupted("tags", &tags_path, e.to_string()))?;

        let Some(graph_bytes) = read_artifact(&graph_path)? else {
            return Ok(None);
        };
        if crc32fast::hash(&graph_bytes) != manifest.graph_crc32 {
            return Err(EvidenceError::corrupted("graph", &graph_path, "checksum mismatch"));
        }
        let graph = match read_graph_db(&graph_path) {
            Ok(graph) => graph,
            Err(_) if !graph_path.is_file() => return Ok(None),
            Err(reason) => return Err(EvidenceError::corrupted("graph", &graph_path, reason)),
        };

        validate(&manifest, &tags, &graph, &tags_path, &graph_path)?;
        tracing::debug!(generation = manifest.generation, tags = tags.len(), "index loaded");
        Ok(Some(StoredIndex {
            manifest,
            tags,
            graph,
        }))
    }

    /// Compare the workspace against the hashes recorded in `graph`.
    pub fn stale_files(
        root: &Path,
        graph: &ReferenceGraph,
        options: &ScanOptions,
    ) -> EvidenceResult<StaleReport> {
        let report = scan(root, options)?;
        let mut seen = BTreeSet::new();
        let mut stale = StaleReport::default();
        for file in &report.files {
            let rel = relative_path(root, file);
            match graph.node(&rel) {
                Some(node) => {
                    let current = compute_content_hash(file).unwrap_or_default();
                    if current != node.content_hash {
                        stale.changed.push(rel.clone());
                    }
                }
                None => stale.added.push(rel.clone()),
            }
            seen.insert(rel);
        }
        stale.removed = graph
            .nodes()
            .iter()
            .filter(|n| !seen.contains(&n.path))
            .map(|n| n.path.clone())
            .collect();
        Ok(stale)
    }
}

fn tags_file(generation: u64) -> String {
    format!("tags-{generation}.json")
}

fn graph_file(generation: u64) -> String {
    format!("graph-{generation}.sqlite")
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn write_atomic(path: &Path, bytes: &[u8], phase: &'static str) -> EvidenceResult<()> {
    let tmp = tmp_path(path);
    let result = (|| -> io::Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();
    result.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EvidenceError::persist(phase, path, e)
    })
}

/// Build the graph database in memory, then copy it out with the backup API.
fn write_graph_db(path: &Path, graph: &ReferenceGraph) -> EvidenceResult<()> {
    let sqlite_err = |e: rusqlite::Error| EvidenceError::persist("graph", path, io::Error::other(e.to_string()));

    let mut conn = Connection::open_in_memory().map_err(sqlite_err)?;
    schema::init_schema(&conn)?;
    let tx = conn.transaction().map_err(sqlite_err)?;
    {
        let mut insert_node = tx
            .prepare(
                "INSERT INTO nodes(id, path, definition_count, reference_count,
                 external_reference_count, content_hash, importance)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            )
            .map_err(sqlite_err)?;
        for (id, node) in graph.nodes().iter().enumerate() {
            insert_node
                .execute(params![
                    id as i64,
                    node.path,
                    node.definition_count,
                    node.reference_count,
                    node.external_reference_count,
                    node.content_hash,
                    node.importance,
                ])
                .map_err(sqlite_err)?;
        }
        let mut insert_edge = tx
            .prepare("INSERT INTO edges(source_id, target_id, weight) VALUES (?1, ?2, ?3);")
            .map_err(sqlite_err)?;
        for edge in graph.edges() {
            insert_edge
                .execute(params![edge.source, edge.target, edge.weight])
                .map_err(sqlite_err)?;
        }
    }
    schema::set_meta(&tx, "node_count", &graph.len().to_string())?;
    schema::set_meta(&tx, "edge_count", &graph.edges().len().to_string())?;
    tx.commit().map_err(sqlite_err)?;

    let tmp = tmp_path(path);
    let _ = fs::remove_file(&tmp);
    conn.backup(DatabaseName::Main, &tmp, None).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        sqlite_err(e)
    })?;
    let result = File::open(&tmp)
        .and_then(|f| f.sync_all())
        .and_then(|_| fs::rename(&tmp, path));
    result.map_err(|e| {
        let _ = fs::remove_file(&tmp);
        EvidenceError::persist("graph", path, e)
    })
}

fn read_artifact(path: &Path) -> EvidenceResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Generation number of a `tags-N.json` or `graph-N.sqlite` file name.
fn artifact_generation(name: &str) -> Option<u64> {
    name.strip_prefix("tags-")
        .and_then(|rest| rest.strip_suffix(".json"))
        .or_else(|| name.strip_prefix("graph-").and_then(|rest| rest.strip_suffix(".sqlite")))
        .and_then(|n| n.parse().ok())
}

fn read_graph_db(path: &Path) -> Result<ReferenceGraph, String> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| e.to_string())?;
    let version = schema::get_meta(&conn, "schema_version")
        .map_err(|e| e.to_string())?
        .ok_or("missing schema version")?;
    if version != schema::GRAPH_SCHEMA_VERSION.to_string() {
        return Err(format!("unsupported graph schema version {version}"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, path, definition_count, reference_count, external_reference_count,
             content_hash, importance FROM nodes ORDER BY id;",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                GraphNode {
                    path: row.get(1)?,
                    definition_count: row.get(2)?,
                    reference_count: row.get(3)?,
                    external_reference_count: row.get(4)?,
                    content_hash: row.get(5)?,
                    importance: row.get(6)?,
                },
            ))
        })
        .map_err(|e| e.to_string())?;
    let mut nodes = Vec::new();
    for (expected, row) in rows.enumerate() {
        let (id, node) = row.map_err(|e| e.to_string())?;
        if id != expected as i64 {
            return Err(format!("node ids are not contiguous at {id}"));
        }
        nodes.push(node);
    }

    let mut stmt = conn
        .prepare("SELECT source_id, target_id, weight FROM edges ORDER BY source_id, target_id;")
        .map_err(|e| e.to_string())?;
    let edges = stmt
        .query_map([], |row| {
            Ok(GraphEdge {
                source: row.get(0)?,
                target: row.get(1)?,
                weight: row.get(2)?,
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    ReferenceGraph::from_parts(nodes, edges)
}

fn validate(
    manifest: &Manifest,
    tags: &[Tag],
    graph: &ReferenceGraph,
    tags_path: &Path,
    graph_path: &Path,
) -> EvidenceResult<()> {
    if tags.len() != manifest.tag_count {
        return Err(EvidenceError::corrupted(
            "tags",
            tags_path,
            format!("{} tags, manifest records {}", tags.len(), manifest.tag_count),
        ));
    }
    if graph.len() != manifest.node_count || graph.edges().len() != manifest.edge_count {
        return Err(EvidenceError::corrupted(
            "graph",
            graph_path,
            "node or edge count differs from manifest",
        ));
    }
    for tag in tags {
        if tag.line == 0 || tag.end_line < tag.line {
            return Err(EvidenceError::corrupted(
                "tags",
                tags_path,
                format!("invalid line range in {}", tag.relative_path),
            ));
        }
        if graph.node_index(&tag.relative_path).is_none() {
            return Err(EvidenceError::corrupted(
                "tags",
                tags_path,
                format!("tag path {} is not a graph node", tag.relative_path),
            ));
        }
    }
    Ok(())
}
