//! Pinecone-backed implementation of the vector index capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::records::{Metadata, MemoryMatch, Namespace};
use crate::{MemoryError, VectorIndex};

/// Client for a serverless Pinecone index provisioned with the standard
/// 384-dim cosine configuration. `host` is the per-index data-plane host
/// (e.g. `https://myindex-abc123.svc.us-east-1.pinecone.io`).
pub struct PineconeIndex {
    http: reqwest::Client,
    host: String,
    api_key: String,
}

#[derive(Serialize)]
struct UpsertBody<'a> {
    vectors: Vec<UpsertVector<'a>>,
    namespace: &'a str,
}

#[derive(Serialize)]
struct UpsertVector<'a> {
    id: &'a str,
    values: &'a [f32],
    metadata: &'a Metadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    namespace: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl PineconeIndex {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response, MemoryError> {
        self.http
            .post(format!("{}{}", self.host, path))
            .header("Api-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| MemoryError::Index(err.to_string()))?
            .error_for_status()
            .map_err(|err| MemoryError::Index(err.to_string()))
    }
}

#[async_trait]
impl VectorIndex for PineconeIndex {
    async fn upsert(
        &self,
        namespace: Namespace,
        id: &str,
        vector: &[f32],
        metadata: &Metadata,
    ) -> Result<(), MemoryError> {
        let body = UpsertBody {
            vectors: vec![UpsertVector {
                id,
                values: vector,
                metadata,
            }],
            namespace: namespace.as_str(),
        };
        self.post("/vectors/upsert", &body).await?;
        Ok(())
    }

    async fn query(
        &self,
        namespace: Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let body = QueryBody {
            vector,
            top_k,
            include_metadata: true,
            namespace: namespace.as_str(),
        };
        let response = self.post("/query", &body).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|err| MemoryError::Index(err.to_string()))?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|m| MemoryMatch {
                id: m.id,
                score: m.score,
                metadata: m.metadata.unwrap_or_default(),
            })
            .collect())
    }
}
