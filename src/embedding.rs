//! Embedding providers and vector utilities.
//!
//! [`EmbeddingProvider`] is the seam between the pipeline and whatever
//! produces vectors. Three implementations:
//! - [`OpenAiEmbeddings`] calls the OpenAI embeddings API with batching,
//!   retry, and exponential backoff.
//! - [`HashEmbeddings`] produces deterministic local vectors from hashed
//!   token and trigram features. No network, stable across runs; meant for
//!   development and tests.
//! - [`DisabledEmbeddings`] fails every call; the configured state when no
//!   provider is set up.
//!
//! Vector helpers: [`cosine_similarity`], plus [`vec_to_blob`] /
//! [`blob_to_vec`] for little-endian f32 BLOB storage in SQLite.
//!
//! Retry strategy for the remote provider: HTTP 429 and 5xx retry with
//! backoff 1s, 2s, 4s, ... capped at 32s; other 4xx fail immediately;
//! network errors retry.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{RagError, Result};

const DEFAULT_HASH_DIMS: usize = 256;
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

/// A backend that turns text into fixed-dimension vectors.
///
/// `embed` takes a batch and returns one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(std::slice::from_ref(&text.to_string())).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingFailed("empty embedding response".to_string()))
    }
}

/// Instantiates the provider named by the configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEmbeddings)),
        "hash" => Ok(Box::new(HashEmbeddings::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Box::new(OpenAiEmbeddings::new(config)?)),
        other => Err(RagError::Config(format!(
            "unknown embedding provider: {other}"
        ))),
    }
}

// ============ Disabled ============

/// Fails every embedding call. Selected when `embedding.provider = "disabled"`.
pub struct DisabledEmbeddings;

#[async_trait]
impl EmbeddingProvider for DisabledEmbeddings {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::EmbeddingFailed(
            "embedding provider is disabled".to_string(),
        ))
    }
}

// ============ Hash ============

/// Deterministic local embeddings from hashed features.
///
/// Each lowercase word and each character trigram within a word hashes to
/// a bucket and a sign; the accumulated vector is L2-normalized. Texts that
/// share vocabulary land near each other, which is enough for exercising
/// the retrieval path without a model.
pub struct HashEmbeddings {
    dims: usize,
}

impl HashEmbeddings {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for word in text.to_lowercase().split_whitespace() {
            self.add_feature(&mut vector, word);
            let chars: Vec<char> = word.chars().collect();
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                self.add_feature(&mut vector, &trigram);
            }
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut idx_bytes = [0u8; 8];
        idx_bytes.copy_from_slice(&digest[0..8]);
        let idx = (u64::from_le_bytes(idx_bytes) % self.dims as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[idx] += sign;
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ OpenAI ============

/// Embedding provider backed by `POST /v1/embeddings`.
pub struct OpenAiEmbeddings {
    model: String,
    dims: usize,
    api_key: String,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| RagError::Config("embedding.model required for openai".to_string()))?;
        let dims = config
            .dims
            .filter(|d| *d > 0)
            .ok_or_else(|| RagError::Config("embedding.dims required for openai".to_string()))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| RagError::Config("embedding api key not configured".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Config(format!("http client: {e}")))?;

        Ok(Self {
            model,
            dims,
            api_key,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await.map_err(|e| {
                            RagError::EmbeddingFailed(format!("response body: {e}"))
                        })?;
                        return parse_embeddings_response(&json);
                    }

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(RagError::EmbeddingFailed(format!(
                            "api error {status}: {body_text}"
                        )));
                        continue;
                    }

                    // Other client errors don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(RagError::EmbeddingFailed(format!(
                        "api error {status}: {body_text}"
                    )));
                }
                Err(e) => {
                    last_err = Some(RagError::from_reqwest(e, "embedding", self.timeout_secs));
                    continue;
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| RagError::EmbeddingFailed("retries exhausted".to_string())))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::EmbeddingFailed("missing data array".to_string()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::EmbeddingFailed("missing embedding field".to_string()))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Vector utilities ============

/// Encodes a float vector as little-endian f32 bytes for BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decodes a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`. Empty or mismatched vectors give `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
