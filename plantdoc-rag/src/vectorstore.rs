//! Vector index trait and the search logic shared by its implementations.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::document::{IndexEntry, SearchResult};
use crate::error::{RagError, Result};

/// Counts reported by [`VectorIndex::upsert`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertStats {
    /// Entries whose chunk id was new.
    pub inserted: usize,
    /// Entries that replaced an entry with the same chunk id.
    pub replaced: usize,
}

/// A store of embedded chunks with nearest-neighbor search.
///
/// All vectors in an index share one dimension, fixed by the first entry
/// inserted. Searches use cosine similarity and break ties by insertion
/// order. `query` only needs shared access, so concurrent queries never
/// block each other; writers are serialized by the implementation.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::{InMemoryVectorIndex, VectorIndex};
///
/// let index = InMemoryVectorIndex::new();
/// index.upsert(&entries).await?;
/// let results = index.query(&query_embedding, 3).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert entries, replacing any entry with the same chunk id in place.
    ///
    /// Fails with [`RagError::DimensionMismatch`] if any vector's dimension
    /// differs from the index dimension; nothing is applied in that case.
    async fn upsert(&self, entries: &[IndexEntry]) -> Result<UpsertStats>;

    /// Return at most `k` entries most similar to `vector`, best first.
    ///
    /// An empty or unloaded index yields an empty `Vec`, not an error.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Flush entries to durable storage. No-op for volatile indexes.
    async fn persist(&self) -> Result<()>;

    /// Replace the in-memory state with the persisted one. No-op for volatile indexes.
    async fn load(&self) -> Result<()>;

    /// Number of stored entries.
    async fn len(&self) -> usize;

    /// Whether the index holds no entries.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The vector dimension, once the first entry has been inserted.
    async fn dimension(&self) -> Option<usize>;

    /// Whether an entry with this chunk id is stored.
    async fn contains(&self, id: &str) -> bool;

    /// Drop every entry and reset the dimension (full reindex).
    async fn clear(&self) -> Result<()>;

    /// The embedding model recorded for the stored vectors, if any.
    async fn embedding_model(&self) -> Option<String>;

    /// Record the embedding model the stored vectors come from.
    async fn set_embedding_model(&self, model: &str) -> Result<()>;
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Entries in insertion order plus an id lookup; the state behind every
/// index implementation in this crate.
#[derive(Debug, Default, Clone)]
pub(crate) struct IndexState {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    dimension: Option<usize>,
    embedding_model: Option<String>,
}

impl IndexState {
    pub(crate) fn from_parts(
        entries: Vec<IndexEntry>,
        dimension: Option<usize>,
        embedding_model: Option<String>,
    ) -> Self {
        let positions =
            entries.iter().enumerate().map(|(i, entry)| (entry.chunk.id.clone(), i)).collect();
        Self { entries, positions, dimension, embedding_model }
    }

    pub(crate) fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub(crate) fn embedding_model(&self) -> Option<&str> {
        self.embedding_model.as_deref()
    }

    pub(crate) fn set_embedding_model(&mut self, model: &str) {
        self.embedding_model = Some(model.to_string());
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
        self.dimension = None;
        self.embedding_model = None;
    }

    /// Apply `entries`; also returns the lowest position that was overwritten.
    pub(crate) fn upsert(
        &mut self,
        entries: &[IndexEntry],
    ) -> Result<(UpsertStats, Option<usize>)> {
        let Some(first) = entries.first() else {
            return Ok((UpsertStats::default(), None));
        };
        let dimension = self.dimension.unwrap_or(first.vector.len());
        for entry in entries {
            if entry.vector.is_empty() {
                return Err(RagError::Configuration(format!(
                    "empty embedding for chunk '{}'",
                    entry.chunk.id
                )));
            }
            if entry.vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: entry.vector.len(),
                });
            }
            if entry.vector.iter().any(|v| !v.is_finite()) {
                return Err(RagError::Configuration(format!(
                    "non-finite value in embedding for chunk '{}'",
                    entry.chunk.id
                )));
            }
        }

        self.dimension = Some(dimension);
        let mut stats = UpsertStats::default();
        let mut lowest_replaced: Option<usize> = None;
        for entry in entries {
            match self.positions.get(&entry.chunk.id) {
                Some(&pos) => {
                    self.entries[pos] = entry.clone();
                    stats.replaced += 1;
                    lowest_replaced = Some(lowest_replaced.map_or(pos, |low| low.min(pos)));
                }
                None => {
                    self.positions.insert(entry.chunk.id.clone(), self.entries.len());
                    self.entries.push(entry.clone());
                    stats.inserted += 1;
                }
            }
        }
        Ok((stats, lowest_replaced))
    }

    pub(crate) fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(dimension) = self.dimension {
            if vector.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                let score = cosine_similarity(&entry.vector, vector);
                (pos, if score.is_nan() { 0.0 } else { score })
            })
            .collect();

        // `sort_by` is stable: equal scores keep insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(pos, score)| SearchResult { chunk: self.entries[pos].chunk.clone(), score })
            .collect())
    }
}
