//! Semantic memory for the self-improving runtime.
//!
//! Five append-only namespaces live behind one similarity store:
//! `tools` (historically-successful programs), `errors` (observed failures),
//! `fixes` (error-signature → repaired-code associations), `docs`, and
//! `patterns`. Embedding and the vector index are capabilities; records are
//! append-only and metadata is restricted to a closed primitive variant.

mod adapter;
mod embedding;
mod index;
mod pinecone;
mod records;

pub use adapter::{auto_promote_metadata, MemoryAdapter};
pub use embedding::{Embedder, HashingEmbedder, RemoteEmbedder, EMBEDDING_DIM};
pub use index::{InMemoryIndex, VectorIndex};
pub use pinecone::PineconeIndex;
pub use records::{sanitize_metadata, Metadata, MemoryMatch, Namespace, Primitive};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("vector index error: {0}")]
    Index(String),
}
