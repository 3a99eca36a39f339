//! PyO3 bindings. Results cross the boundary as JSON-compatible objects.

use std::path::{Path, PathBuf};

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use serde::Serialize;

use crate::config::IndexConfig;
use crate::indexer::pipeline::rebuild_index;
use crate::query::facade::{CodeSearch, EvidenceContext};
use crate::query::workflow::{EvidenceGatherer, NoSources, Workflow};
use crate::store::IndexStore;

fn to_py<T: Serialize>(py: Python<'_>, value: &T) -> PyResult<PyObject> {
    let json_str =
        serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
    let json_module = py.import("json")?;
    json_module
        .call_method1("loads", (json_str,))
        .map(|o| o.into())
}

fn config_from(config_json: Option<&str>) -> PyResult<IndexConfig> {
    let mut config = match config_json {
        Some(raw) => IndexConfig::from_json_str(raw)?,
        None => IndexConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Build and persist the index for `workspace` under `index_root`.
#[pyfunction]
#[pyo3(signature = (workspace, index_root, config_json=None))]
pub fn build_index(
    py: Python<'_>,
    workspace: &str,
    index_root: &str,
    config_json: Option<&str>,
) -> PyResult<PyObject> {
    let config = config_from(config_json)?;
    let root = PathBuf::from(workspace);
    let store = IndexStore::for_workspace(Path::new(index_root), &root)?;
    let index = py.allow_threads(|| rebuild_index(&root, &store, &config))?;

    let result = PyDict::new(py);
    result.set_item("generation", index.manifest.generation)?;
    result.set_item("tags", index.manifest.tag_count)?;
    result.set_item("nodes", index.manifest.node_count)?;
    result.set_item("edges", index.manifest.edge_count)?;
    result.set_item("index_dir", store.dir().display().to_string())?;
    Ok(result.into())
}

#[pyclass]
pub struct Searcher {
    inner: CodeSearch,
}

#[pymethods]
impl Searcher {
    #[new]
    #[pyo3(signature = (workspace, index_root, config_json=None))]
    fn new(py: Python<'_>, workspace: &str, index_root: &str, config_json: Option<&str>) -> PyResult<Self> {
        let config = config_from(config_json)?;
        let root = PathBuf::from(workspace);
        let store = IndexStore::for_workspace(Path::new(index_root), &root)?;
        let inner = py.allow_threads(|| CodeSearch::open(&root, &store, config))?;
        Ok(Self { inner })
    }

    #[pyo3(signature = (criteria, mode="structural"))]
    fn search(&self, py: Python<'_>, criteria: &str, mode: &str) -> PyResult<PyObject> {
        let contexts = py.allow_threads(|| self.inner.search_with_mode_name(criteria, mode))?;
        to_py(py, &contexts)
    }

    #[pyo3(signature = (context, max_tokens=None))]
    fn display(&self, context: &Bound<'_, PyDict>, max_tokens: Option<usize>) -> PyResult<String> {
        let json_module = context.py().import("json")?;
        let raw: String = json_module.call_method1("dumps", (context,))?.extract()?;
        let context: EvidenceContext =
            serde_json::from_str(&raw).map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok(match max_tokens {
            Some(budget) => self.inner.display_with_budget(&context, budget),
            None => self.inner.display(&context),
        })
    }

    #[pyo3(signature = (criteria, workspace_summary=""))]
    fn locate(&self, criteria: &str, workspace_summary: &str) -> Vec<String> {
        self.inner
            .locate(criteria, workspace_summary)
            .into_iter()
            .map(|p| p.display().to_string())
            .collect()
    }

    #[pyo3(signature = (criteria, user_query="", steps=None))]
    fn gather(
        &self,
        py: Python<'_>,
        criteria: &str,
        user_query: &str,
        steps: Option<Vec<String>>,
    ) -> PyResult<PyObject> {
        let workflow = match steps {
            Some(names) => Workflow::from_names(&names)?,
            None => Workflow::question(),
        };
        let gatherer = EvidenceGatherer::new(&self.inner, &NoSources);
        let evidence = gatherer.gather(criteria, user_query, &workflow)?;
        to_py(py, &evidence)
    }

    fn stats(&self, py: Python<'_>) -> PyResult<PyObject> {
        to_py(py, &self.inner.stats().snapshot())
    }
}

pub fn register(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add("MAX_SEARCH_LIMIT", crate::query::guards::MAX_SEARCH_LIMIT)?;
    m.add("MAX_DISPLAY_TOKENS", crate::query::guards::MAX_DISPLAY_TOKENS)?;
    m.add_function(wrap_pyfunction!(build_index, m)?)?;
    m.add_class::<Searcher>()?;
    Ok(())
}
