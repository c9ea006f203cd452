//! Vector index abstraction and the Pinecone adapter.

mod pinecone;
pub mod types;

pub use pinecone::PineconeIndex;
pub use types::{
    IndexError, IndexRecord, IndexStats, NamespaceStats, ScoredRecord, TEXT_METADATA_KEY,
};

use async_trait::async_trait;

/// Interface implemented by nearest-neighbour stores.
///
/// Implementations must be safe to share across in-flight requests; the backing service
/// arbitrates concurrent writes.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persist every record, returning the number of vectors the store acknowledged.
    async fn upsert(&self, records: Vec<IndexRecord>) -> Result<usize, IndexError>;

    /// Return up to `top_k` records closest to `vector`, best match first.
    async fn query(&self, vector: Vec<f32>, top_k: usize)
    -> Result<Vec<ScoredRecord>, IndexError>;

    /// Aggregate statistics reported by the store.
    async fn describe_stats(&self) -> Result<IndexStats, IndexError>;
}
