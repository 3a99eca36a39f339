//! Embedding providers and retry handling.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{EmbedError, EvidenceResult};
use crate::query::embedding::{EmbeddingOptions, EmbeddingProvider};
use crate::query::hybrid::term_list;

/// Turns text into a dense vector. Implementations must be safe to call from
/// several worker threads at once.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;
}

pub const DEFAULT_HASHING_DIMENSIONS: usize = 256;

/// Offline embedder: signed feature hashing of subword terms, L2-normalised.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSIONS)
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vector = vec![0.0f32; self.dimensions];
        let terms = term_list(text);
        let features = terms
            .iter()
            .cloned()
            .chain(terms.windows(2).map(|pair| format!("{} {}", pair[0], pair[1])));
        for feature in features {
            let hash = crc32fast::hash(feature.as_bytes());
            let slot = hash as usize % self.dimensions;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 250,
            max_backoff_ms: 8000,
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = 1u64
            .checked_shl(attempt)
            .and_then(|factor| self.base_backoff_ms.checked_mul(factor))
            .unwrap_or(u64::MAX)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Call `embedder`, retrying transient failures with exponential backoff.
pub fn embed_with_retry(
    embedder: &dyn Embedder,
    text: &str,
    policy: &RetryPolicy,
) -> Result<Vec<f32>, EmbedError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match embedder.embed(text) {
            Ok(vector) => return Ok(vector),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    embedder = embedder.name(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "embedding failed, retrying"
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote provider
// ---------------------------------------------------------------------------

/// Classify a non-success HTTP status from an embedding endpoint.
pub fn status_error(status: u16, body: &str) -> EmbedError {
    let snippet: String = body.chars().take(200).collect();
    if status == 429 || (500..600).contains(&status) {
        EmbedError::Transient(format!("status {status}: {snippet}"))
    } else {
        EmbedError::Permanent(format!("status {status}: {snippet}"))
    }
}

#[cfg(feature = "remote-embeddings")]
pub use remote::HttpEmbedder;

#[cfg(feature = "remote-embeddings")]
mod remote {
    use std::time::Duration;

    use serde::{Deserialize, Serialize};

    use super::{status_error, Embedder};
    use crate::errors::EmbedError;

    #[derive(Serialize)]
    struct EmbeddingRequest<'a> {
        input: &'a str,
        model: &'a str,
    }

    #[derive(Deserialize)]
    struct EmbeddingResponse {
        data: Vec<EmbeddingData>,
    }

    #[derive(Deserialize)]
    struct EmbeddingData {
        embedding: Vec<f32>,
    }

    /// OpenAI-compatible `/embeddings` client.
    pub struct HttpEmbedder {
        client: reqwest::blocking::Client,
        base_url: String,
        model: String,
        api_key: Option<String>,
    }

    impl HttpEmbedder {
        pub fn new(
            base_url: &str,
            model: &str,
            api_key: Option<String>,
            timeout: Duration,
        ) -> Result<Self, EmbedError> {
            let client = reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| EmbedError::Permanent(format!("http client: {e}")))?;
            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
                model: model.to_string(),
                api_key,
            })
        }
    }

    impl Embedder for HttpEmbedder {
        fn name(&self) -> &str {
            "http"
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
            let body = EmbeddingRequest {
                input: text,
                model: &self.model,
            };
            let mut request = self
                .client
                .post(format!("{}/embeddings", self.base_url))
                .json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }
            let response = request.send().map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    EmbedError::Transient(e.to_string())
                } else {
                    EmbedError::Permanent(e.to_string())
                }
            })?;

            let status = response.status();
            let text = response
                .text()
                .map_err(|e| EmbedError::Transient(format!("reading body: {e}")))?;
            if !status.is_success() {
                return Err(status_error(status.as_u16(), &text));
            }
            let parsed: EmbeddingResponse = serde_json::from_str(&text)
                .map_err(|e| EmbedError::Permanent(format!("malformed response: {e}")))?;
            parsed
                .data
                .into_iter()
                .next()
                .map(|d| d.embedding)
                .ok_or_else(|| EmbedError::Permanent("empty embedding response".to_string()))
        }
    }
}

/// Construct the embedder selected by `options`.
pub fn embedder_from_options(options: &EmbeddingOptions) -> EvidenceResult<Arc<dyn Embedder>> {
    match options.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(options.dimensions))),
        EmbeddingProvider::Http => remote_embedder(options),
    }
}

#[cfg(feature = "remote-embeddings")]
fn remote_embedder(options: &EmbeddingOptions) -> EvidenceResult<Arc<dyn Embedder>> {
    let endpoint = options.endpoint.as_deref().ok_or_else(|| {
        EmbedError::Permanent("http embedding provider needs an endpoint".to_string())
    })?;
    let api_key = std::env::var(&options.api_key_env).ok().filter(|k| !k.is_empty());
    let embedder = HttpEmbedder::new(
        endpoint,
        &options.model,
        api_key,
        Duration::from_secs(options.timeout_secs.max(1)),
    )?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "remote-embeddings"))]
fn remote_embedder(_options: &EmbeddingOptions) -> EvidenceResult<Arc<dyn Embedder>> {
    Err(EmbedError::Permanent("built without the remote-embeddings feature".to_string()).into())
}
