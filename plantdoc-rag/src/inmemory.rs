//! In-memory vector index using cosine similarity.
//!
//! [`InMemoryVectorIndex`] keeps every entry in a `Vec` guarded by a
//! `tokio::sync::RwLock`. It is suitable for tests, demos, and knowledge bases
//! rebuilt on every start; use [`DiskVectorIndex`](crate::DiskVectorIndex)
//! when the index has to survive restarts.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{IndexEntry, SearchResult};
use crate::error::Result;
use crate::vectorstore::{IndexState, UpsertStats, VectorIndex};

/// A volatile vector index. `persist` and `load` are no-ops.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.upsert(&entries).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    state: RwLock<IndexState>,
}

impl InMemoryVectorIndex {
    /// Create a new empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<UpsertStats> {
        let mut state = self.state.write().await;
        let (stats, _) = state.upsert(entries)?;
        debug!(
            backend = "InMemory",
            inserted = stats.inserted,
            replaced = stats.replaced,
            "upsert"
        );
        Ok(stats)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        self.state.read().await.query(vector, k)
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        Ok(())
    }

    async fn len(&self) -> usize {
        self.state.read().await.len()
    }

    async fn dimension(&self) -> Option<usize> {
        self.state.read().await.dimension()
    }

    async fn contains(&self, id: &str) -> bool {
        self.state.read().await.contains(id)
    }

    async fn clear(&self) -> Result<()> {
        self.state.write().await.clear();
        Ok(())
    }

    async fn embedding_model(&self) -> Option<String> {
        self.state.read().await.embedding_model().map(str::to_string)
    }

    async fn set_embedding_model(&self, model: &str) -> Result<()> {
        self.state.write().await.set_embedding_model(model);
        Ok(())
    }
}
