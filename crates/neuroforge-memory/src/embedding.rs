//! Sentence-embedding capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::MemoryError;

/// Dimensionality every encoder must produce; matches the common
/// MiniLM-class sentence encoders the index is provisioned for.
pub const EMBEDDING_DIM: usize = 384;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError>;
}

/// HTTP client for a sentence-encoder sidecar.
///
/// Contract: `POST {url}` with `{"texts": [...]}` returns
/// `{"embeddings": [[f32; 384], ...]}`.
pub struct RemoteEmbedder {
    http: reqwest::Client,
    url: String,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl RemoteEmbedder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        let response = self
            .http
            .post(&self.url)
            .json(&EmbedRequest { texts })
            .send()
            .await
            .map_err(|err| MemoryError::Embedding(err.to_string()))?
            .error_for_status()
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|err| MemoryError::Embedding(err.to_string()))?;
        if body.embeddings.len() != texts.len() {
            return Err(MemoryError::Embedding(format!(
                "encoder returned {} vectors for {} texts",
                body.embeddings.len(),
                texts.len()
            )));
        }
        Ok(body.embeddings)
    }
}

/// Deterministic local encoder: character-trigram feature hashing into the
/// standard dimensionality, L2-normalized. Not a learned model; used when no
/// sidecar is configured and as the test encoder. Similar strings still land
/// near each other, which is all the adapter contract needs.
#[derive(Clone, Copy, Debug, Default)]
pub struct HashingEmbedder;

impl HashingEmbedder {
    fn encode(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; EMBEDDING_DIM];
        let lowered = text.to_lowercase();
        let bytes = lowered.as_bytes();
        if bytes.is_empty() {
            return vector;
        }
        for window in bytes.windows(3.min(bytes.len())) {
            let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
            for byte in window {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x1000_0000_01b3);
            }
            let bucket = (hash % EMBEDDING_DIM as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, MemoryError> {
        Ok(texts.iter().map(|text| Self::encode(text)).collect())
    }
}
