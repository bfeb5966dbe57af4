//! Vector index capability and the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::records::{Metadata, MemoryMatch, Namespace};
use crate::MemoryError;

/// Keyed similarity store. Upserts are append-only in practice: callers
/// always supply fresh ids. Readers may observe writes from sibling tasks
/// in any order and must tolerate stale results.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        namespace: Namespace,
        id: &str,
        vector: &[f32],
        metadata: &Metadata,
    ) -> Result<(), MemoryError>;

    /// Top `top_k` entries by decreasing cosine similarity.
    async fn query(
        &self,
        namespace: Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError>;
}

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    metadata: Metadata,
}

/// Process-local index. The default store for tests and single-node
/// deployments; remote stores plug in behind the same trait.
#[derive(Default)]
pub struct InMemoryIndex {
    namespaces: RwLock<HashMap<Namespace, Vec<StoredVector>>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(
        &self,
        namespace: Namespace,
        id: &str,
        vector: &[f32],
        metadata: &Metadata,
    ) -> Result<(), MemoryError> {
        let mut namespaces = self.namespaces.write().await;
        let entries = namespaces.entry(namespace).or_default();
        if let Some(existing) = entries.iter_mut().find(|entry| entry.id == id) {
            existing.vector = vector.to_vec();
            existing.metadata = metadata.clone();
        } else {
            entries.push(StoredVector {
                id: id.to_string(),
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        namespace: Namespace,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<MemoryMatch>, MemoryError> {
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(&namespace) else {
            return Ok(Vec::new());
        };
        let mut scored: Vec<MemoryMatch> = entries
            .iter()
            .map(|entry| MemoryMatch {
                id: entry.id.clone(),
                score: cosine(vector, &entry.vector),
                metadata: entry.metadata.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }
}
