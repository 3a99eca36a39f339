//! Error types for the evidence core library.

use std::path::PathBuf;

#[cfg(feature = "python")]
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
#[cfg(feature = "python")]
use pyo3::PyErr;

/// Failure talking to an embedding provider.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbedError {
    /// Worth retrying: rate limits, timeouts, 5xx responses.
    #[error("transient embedding failure: {0}")]
    Transient(String),

    /// Retrying will not help: bad request, auth failure, malformed payload.
    #[error("embedding failure: {0}")]
    Permanent(String),
}

impl EmbedError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EmbedError::Transient(_))
    }
}

/// Top-level error enum for the evidence core library.
#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("workspace root {} does not exist or is not a directory", path.display())]
    InvalidWorkspace { path: PathBuf },

    #[error("failed to persist {phase} at {}: {source}", path.display())]
    Persist {
        phase: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupted {artifact} artifact at {}: {reason}", path.display())]
    CorruptedArtifact {
        artifact: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("build deadline exceeded during {phase}")]
    DeadlineExceeded { phase: &'static str },

    #[error("unknown search mode '{0}' (expected one of: structural, embedding)")]
    UnknownSearchMode(String),

    #[error("unknown evidence step '{0}'")]
    UnknownStep(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error(transparent)]
    Embedding(#[from] EmbedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvidenceError {
    pub(crate) fn corrupted(
        artifact: &'static str,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        EvidenceError::CorruptedArtifact {
            artifact,
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn persist(
        phase: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        EvidenceError::Persist {
            phase,
            path: path.into(),
            source,
        }
    }
}

#[cfg(feature = "python")]
impl From<EvidenceError> for PyErr {
    fn from(err: EvidenceError) -> PyErr {
        match &err {
            EvidenceError::InvalidWorkspace { .. }
            | EvidenceError::UnknownSearchMode(_)
            | EvidenceError::UnknownStep(_) => PyValueError::new_err(err.to_string()),
            EvidenceError::Persist { .. } | EvidenceError::Io(_) => {
                PyIOError::new_err(err.to_string())
            }
            EvidenceError::CorruptedArtifact { .. }
            | EvidenceError::DeadlineExceeded { .. }
            | EvidenceError::Index(_)
            | EvidenceError::Embedding(_)
            | EvidenceError::Sqlite(_) => PyRuntimeError::new_err(err.to_string()),
            EvidenceError::Json(_) => PyValueError::new_err(err.to_string()),
        }
    }
}

pub type EvidenceResult<T> = Result<T, EvidenceError>;
