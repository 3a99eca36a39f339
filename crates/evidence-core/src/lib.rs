//! Evidence core: symbol indexing, reference-graph importance ranking and
//! evidence retrieval over a source workspace.
//!
//! The indexer extracts definition, reference and import tags with
//! tree-sitter, links files into a weighted reference graph and scores each
//! file's importance. The index is persisted as versioned artifacts and
//! queried structurally (lexical match blended with importance) or through
//! an embedding index. The optional `python` feature exposes the searcher as
//! an extension module (`_evidence_core`).

pub mod config;
pub mod errors;
pub mod indexer;
pub mod models;
pub mod query;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use config::IndexConfig;
pub use errors::{EmbedError, EvidenceError, EvidenceResult};
pub use indexer::graph::ReferenceGraph;
pub use indexer::pipeline::{build_from_files, build_index, BuildOutput, BuildReport};
pub use models::{Tag, TagCategory};
pub use query::facade::{CodeSearch, EvidenceContext, QueryStats, SearchMode};
pub use query::workflow::{EvidenceGatherer, EvidenceSources, EvidenceStep, Workflow};
pub use store::{IndexStore, StoredIndex};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn _evidence_core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    python::register(m)
}
