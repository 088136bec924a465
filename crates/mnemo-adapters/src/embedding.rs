//! Text embedders used by the vector-note index
//!
//! - [`HashingEmbedder`]: local, deterministic feature hashing over content
//!   tokens, optionally weighted by a token-weight file.
//! - [`HttpEmbedder`]: Ollama-compatible `/api/embeddings` endpoint.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::VectorNoteConfig;
use crate::error::{AdapterError, AdapterResult, ConfigError};
use crate::text;

/// Turns text into a dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    async fn embed(&self, text: &str) -> AdapterResult<Vec<f32>>;
}

/// Cosine similarity. Zero for mismatched lengths or zero vectors.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Build the embedder the vector configuration asks for.
pub fn from_config(config: &VectorNoteConfig) -> Result<Box<dyn Embedder>, ConfigError> {
    if let Some(url) = &config.embedding_service_url {
        return Ok(Box::new(HttpEmbedder::new(url, &config.embedding_model)?));
    }
    let embedder = match &config.embedding_model_path {
        Some(path) => HashingEmbedder::from_weights_file(config.dimension, path)?,
        None => HashingEmbedder::new(config.dimension),
    };
    Ok(Box::new(embedder))
}

// ---------------------------------------------------------------------------
// HashingEmbedder
// ---------------------------------------------------------------------------

/// Feature-hashing embedder. Each non-stopword token lands in one bucket
/// chosen by its SHA-256 digest; the vector is term-frequency weighted and
/// L2-normalised.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    weights: HashMap<String, f32>,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            weights: HashMap::new(),
        }
    }

    /// Load `token weight` pairs, one per line. Blank lines and `#` comments
    /// are skipped.
    pub fn from_weights_file(dimension: usize, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::new(
                "vector",
                format!("cannot read embedding model {}: {e}", path.display()),
            )
        })?;
        let mut weights = HashMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(token), Some(weight), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(ConfigError::new(
                    "vector",
                    format!("{}:{}: expected `token weight`", path.display(), lineno + 1),
                ));
            };
            let weight: f32 = weight.parse().map_err(|_| {
                ConfigError::new(
                    "vector",
                    format!("{}:{}: bad weight {weight}", path.display(), lineno + 1),
                )
            })?;
            weights.insert(token.to_lowercase(), weight);
        }
        debug!(path = %path.display(), tokens = weights.len(), "loaded token weights");
        Ok(Self {
            dimension: dimension.max(1),
            weights,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn bucket(&self, token: &str) -> usize {
        let digest = Sha256::digest(token.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) % self.dimension as u64) as usize
    }

    /// Synchronous embedding; the async trait method delegates here.
    pub fn embed_sync(&self, input: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text::content_tokens(input) {
            let weight = self.weights.get(&token).copied().unwrap_or(1.0);
            v[self.bucket(&token)] += weight;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, input: &str) -> AdapterResult<Vec<f32>> {
        Ok(self.embed_sync(input))
    }
}

// ---------------------------------------------------------------------------
// HttpEmbedder
// ---------------------------------------------------------------------------

const HTTP_EMBED_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

/// Client for an Ollama-style embedding service.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl HttpEmbedder {
    pub fn new(url: &str, model: &str) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mnemo/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_EMBED_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::new("vector", format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            model: model.to_string(),
        })
    }

    fn map_error(&self, err: reqwest::Error) -> AdapterError {
        if err.is_timeout() {
            AdapterError::Timeout {
                adapter: self.name().to_string(),
                elapsed_ms: HTTP_EMBED_TIMEOUT.as_millis() as u64,
            }
        } else if err.is_connect() {
            AdapterError::not_available(self.name())
        } else {
            AdapterError::internal(self.name(), format!("{} ({})", err, self.url))
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        "http_embedder"
    }

    async fn embed(&self, input: &str) -> AdapterResult<Vec<f32>> {
        let response = self
            .client
            .post(&self.url)
            .json(&EmbeddingRequest {
                model: &self.model,
                prompt: input,
            })
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::internal(
                self.name(),
                format!("embedding service returned {status}"),
            ));
        }

        let body: EmbeddingResponse = response.json().await.map_err(|e| self.map_error(e))?;
        if body.embedding.is_empty() {
            return Err(AdapterError::internal(self.name(), "empty embedding"));
        }
        Ok(body.embedding)
    }
}
