//! Query-time retrieval: embed the question, then search the index.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, instrument};

use crate::document::RetrievalResult;
use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, RagError, Result};
use crate::vectorstore::VectorIndex;

/// Default number of chunks returned per question.
pub const DEFAULT_TOP_K: usize = 3;

/// Embeds questions and looks up the most similar indexed chunks.
///
/// Embedding failures and timeouts surface as
/// [`RagError::RetrievalUnavailable`]; they never turn into an empty result.
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    default_k: usize,
    embed_timeout: Duration,
    similarity_threshold: Option<f32>,
}

impl Retriever {
    /// Create a retriever with `k = 3` and a 30 second embedding deadline.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            embedder,
            index,
            default_k: DEFAULT_TOP_K,
            embed_timeout: Duration::from_secs(30),
            similarity_threshold: None,
        }
    }

    /// Set the `k` used by [`retrieve_default`](Self::retrieve_default).
    pub fn with_default_k(mut self, k: usize) -> Self {
        self.default_k = k;
        self
    }

    /// Bound each query embedding call.
    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = timeout;
        self
    }

    /// Drop hits scoring below `threshold`.
    pub fn with_similarity_threshold(mut self, threshold: Option<f32>) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// The `k` used when the caller does not pass one.
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Retrieve with the configured default `k`.
    pub async fn retrieve_default(&self, query: &str) -> Result<RetrievalResult> {
        self.retrieve(query, self.default_k).await
    }

    /// Return at most `k` chunks most similar to `query`, best first.
    ///
    /// # Errors
    ///
    /// - [`RagError::Configuration`] if `k == 0`
    /// - [`RagError::RetrievalUnavailable`] if embedding fails or times out
    /// - [`RagError::DimensionMismatch`] if the embedder no longer matches the index
    #[instrument(skip_all, fields(query_len = query.len(), k = k))]
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::Configuration("k must be a positive integer".to_string()));
        }

        let embedding = match tokio::time::timeout(self.embed_timeout, self.embedder.embed(query))
            .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(e)) => return Err(retrieval_unavailable(e)),
            Err(_) => {
                return Err(retrieval_unavailable(ProviderError::timeout(
                    self.embedder.model_id(),
                    self.embed_timeout,
                )));
            }
        };

        let mut hits = self.index.query(&embedding, k).await?;
        if let Some(threshold) = self.similarity_threshold {
            hits.retain(|hit| hit.score >= threshold);
        }

        debug!(
            hit_count = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "retrieval completed"
        );
        Ok(RetrievalResult::new(hits))
    }
}

fn retrieval_unavailable(err: ProviderError) -> RagError {
    error!(
        provider = %err.provider,
        kind = %err.kind,
        error = %err.message,
        "query embedding failed"
    );
    RagError::RetrievalUnavailable { kind: err.kind, message: err.to_string() }
}
