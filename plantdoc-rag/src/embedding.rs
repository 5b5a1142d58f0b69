//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::ProviderResult;

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. [`embed`](EmbeddingProvider::embed) is used for questions and
/// [`embed_batch`](EmbeddingProvider::embed_batch) for document chunks, so
/// backends with asymmetric retrieval task types can tell the two apart.
///
/// Failures are returned as typed [`ProviderError`](crate::ProviderError)s;
/// callers decide whether they are fatal (build time) or recoverable
/// (query time).
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("tomato leaf spots").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single query text.
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>>;

    /// Generate embedding vectors for a batch of document texts.
    ///
    /// The output is order-preserving: one vector per input. The default
    /// implementation calls [`embed`](EmbeddingProvider::embed) sequentially.
    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// The model identifier; a different value invalidates an existing index.
    fn model_id(&self) -> &str;
}
