//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] wires the offline path (chunk → embed → upsert →
//! persist) and the online path (retrieve → assemble prompt → generate).
//! Build it once and share it behind an `Arc`; every query cycle is
//! independent and read-only with respect to the index.
//!
//! # Example
//!
//! ```rust,ignore
//! use plantdoc_rag::{DiskVectorIndex, IngestMode, RagConfig, RagPipeline};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .vector_index(Arc::new(DiskVectorIndex::open_or_create("./plantdoc_index").await?))
//!     .generator(Arc::new(generator))
//!     .build()?;
//!
//! pipeline.build_index(&documents, IngestMode::SkipExisting).await?;
//! let answer = pipeline.answer("What causes tomato bacterial spot?").await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Answer, Chunk, Document, IndexEntry, RetrievalResult};
use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, ProviderErrorKind, RagError, Result};
use crate::generation::{GenerationParams, Generator, generate_with_retry};
use crate::prompt::{PromptAssembler, PromptTemplate};
use crate::retriever::Retriever;
use crate::vectorstore::VectorIndex;

/// How [`RagPipeline::build_index`] treats chunks whose identity is already indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Leave already-indexed chunks untouched and do not re-embed them.
    #[default]
    SkipExisting,
    /// Re-embed every chunk and replace entries with the same identity.
    Overwrite,
    /// Store duplicates as new entries with a unique id suffix.
    Append,
}

/// Counters describing one index build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    /// Documents processed.
    pub documents: usize,
    /// Chunks produced by the chunker.
    pub chunks_produced: usize,
    /// Chunks embedded and written to the index.
    pub chunks_indexed: usize,
    /// Chunks left out because their identity was already indexed.
    pub chunks_skipped: usize,
    /// Entries in the index after the build.
    pub entry_count: usize,
}

/// The RAG pipeline orchestrator.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn VectorIndex>,
    chunker: Arc<dyn Chunker>,
    generator: Arc<dyn Generator>,
    retriever: Retriever,
    prompt: PromptAssembler,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the vector index.
    pub fn vector_index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Return a reference to the prompt assembler.
    pub fn prompt_assembler(&self) -> &PromptAssembler {
        &self.prompt
    }

    /// Index `documents` and persist the result.
    ///
    /// Any error aborts the build before anything is persisted. Running the
    /// same input twice with [`IngestMode::SkipExisting`] or
    /// [`IngestMode::Overwrite`] leaves the entry count unchanged.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingModelChanged`] / [`RagError::DimensionMismatch`]
    ///   if a non-empty index was built with another embedder
    /// - [`RagError::DimensionMismatch`] if the embedder returns vectors of
    ///   another length than it declares
    /// - [`RagError::Embedding`] if the embedding service fails
    /// - [`RagError::Storage`] if persisting fails
    #[instrument(skip_all, fields(documents = documents.len(), mode = ?mode))]
    pub async fn build_index(
        &self,
        documents: &[Document],
        mode: IngestMode,
    ) -> Result<BuildReport> {
        if !self.index.is_empty().await {
            self.check_index_compatibility().await?;
        }
        self.index.set_embedding_model(self.embedding_provider.model_id()).await?;

        let mut report = BuildReport::default();
        for document in documents {
            self.ingest_document(document, mode, &mut report).await?;
        }

        self.index.persist().await?;
        report.entry_count = self.index.len().await;
        info!(
            documents = report.documents,
            chunks_produced = report.chunks_produced,
            chunks_indexed = report.chunks_indexed,
            chunks_skipped = report.chunks_skipped,
            entry_count = report.entry_count,
            "index build completed"
        );
        Ok(report)
    }

    /// Clear the index, then build it from `documents` (full reindex).
    ///
    /// Use this after changing the embedding model or chunking parameters.
    pub async fn rebuild_index(&self, documents: &[Document]) -> Result<BuildReport> {
        info!(documents = documents.len(), "clearing index for full rebuild");
        self.index.clear().await?;
        self.build_index(documents, IngestMode::Overwrite).await
    }

    /// Index a single document and persist.
    pub async fn ingest(&self, document: &Document, mode: IngestMode) -> Result<BuildReport> {
        self.build_index(std::slice::from_ref(document), mode).await
    }

    async fn ingest_document(
        &self,
        document: &Document,
        mode: IngestMode,
        report: &mut BuildReport,
    ) -> Result<()> {
        report.documents += 1;
        let chunks = self.chunker.split(document);
        report.chunks_produced += chunks.len();

        let mut pending = Vec::with_capacity(chunks.len());
        for mut chunk in chunks {
            if self.index.contains(&chunk.id).await {
                match mode {
                    IngestMode::SkipExisting => {
                        report.chunks_skipped += 1;
                        continue;
                    }
                    IngestMode::Overwrite => {}
                    IngestMode::Append => {
                        chunk.id = format!("{}#{}", chunk.id, uuid::Uuid::new_v4());
                    }
                }
            }
            pending.push(chunk);
        }
        if pending.is_empty() {
            return Ok(());
        }

        let entries = self.embed_chunks(&document.id, pending).await?;
        let stats = self.index.upsert(&entries).await?;
        report.chunks_indexed += entries.len();
        info!(
            document.id = %document.id,
            inserted = stats.inserted,
            replaced = stats.replaced,
            "ingested document"
        );
        Ok(())
    }

    async fn embed_chunks(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<IndexEntry>> {
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let timeout = self.config.embed_timeout();
        let embeddings =
            match tokio::time::timeout(timeout, self.embedding_provider.embed_batch(&texts)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::timeout(self.embedding_provider.model_id(), timeout)),
            }
            .map_err(|e| {
                error!(document.id = %document_id, error = %e, "embedding failed during ingestion");
                RagError::Embedding(e)
            })?;

        if embeddings.len() != chunks.len() {
            return Err(RagError::Embedding(ProviderError::new(
                self.embedding_provider.model_id(),
                ProviderErrorKind::BadResponse,
                format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            )));
        }

        let declared = self.embedding_provider.dimensions();
        if let Some(vector) = embeddings.iter().find(|vector| vector.len() != declared) {
            error!(
                document.id = %document_id,
                declared,
                actual = vector.len(),
                "embedder returned vectors of an undeclared dimension"
            );
            return Err(RagError::DimensionMismatch { expected: declared, actual: vector.len() });
        }

        Ok(chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| IndexEntry { vector, chunk })
            .collect())
    }

    /// Retrieve the configured number of chunks for `question`.
    ///
    /// # Errors
    ///
    /// Fails like [`check_index_compatibility`](Self::check_index_compatibility)
    /// when the index was built with another embedder.
    pub async fn retrieve(&self, question: &str) -> Result<RetrievalResult> {
        self.check_index_compatibility().await?;
        self.retriever.retrieve(question, self.config.top_k).await
    }

    /// Run one query cycle: retrieve → assemble → generate.
    ///
    /// When nothing is retrieved and `refuse_on_empty_context` is set, the
    /// fixed refusal sentence is returned without calling the generator and
    /// [`Answer::empty_context`] is `true`.
    ///
    /// # Errors
    ///
    /// - [`RagError::EmbeddingModelChanged`] / [`RagError::DimensionMismatch`]
    ///   if the index was built with another embedder; nothing is embedded
    /// - [`RagError::RetrievalUnavailable`] if the query cannot be embedded;
    ///   the generator is not called
    /// - [`RagError::GenerationFailure`] after the retry policy is exhausted
    #[instrument(skip_all, fields(question_len = question.len()))]
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        let retrieval = self.retrieve(question).await?;

        if retrieval.is_empty() && self.config.refuse_on_empty_context {
            info!("no context retrieved, returning refusal");
            return Ok(Answer {
                text: self.prompt.refusal().to_string(),
                retrieval,
                empty_context: true,
            });
        }

        let prompt = self.prompt.assemble(question, &retrieval);
        let params = GenerationParams {
            temperature: self.config.temperature,
            max_output_tokens: self.config.max_output_tokens,
        };
        let text = generate_with_retry(
            self.generator.as_ref(),
            &prompt,
            &params,
            &self.config.retry,
            self.config.generate_timeout(),
        )
        .await?;

        info!(
            source_count = retrieval.len(),
            top_score = retrieval.top_score(),
            answer_len = text.len(),
            "answer generated"
        );
        Ok(Answer { text, retrieval, empty_context: false })
    }

    /// Like [`answer`](Self::answer), but gives up with [`RagError::Cancelled`]
    /// as soon as `cancel` completes.
    pub async fn answer_cancellable<F>(&self, question: &str, cancel: F) -> Result<Answer>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => {
                info!("query cancelled");
                Err(RagError::Cancelled)
            }
            result = self.answer(question) => result,
        }
    }

    /// Verify that the index was built with the configured embedder.
    ///
    /// An empty index with no recorded model is always compatible.
    ///
    /// # Errors
    ///
    /// - [`RagError::DimensionMismatch`] if the vector dimensions differ
    /// - [`RagError::EmbeddingModelChanged`] if the recorded model id differs
    pub async fn check_index_compatibility(&self) -> Result<()> {
        let configured_dimension = self.embedding_provider.dimensions();
        if let Some(dimension) = self.index.dimension().await {
            if dimension != configured_dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: configured_dimension,
                });
            }
        }

        let configured = self.embedding_provider.model_id();
        if let Some(indexed) = self.index.embedding_model().await {
            if indexed != configured {
                return Err(RagError::EmbeddingModelChanged {
                    indexed,
                    configured: configured.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `embedding_provider`, `vector_index` and `generator` are required. The
/// config defaults to [`RagConfig::default()`], the chunker to a
/// [`RecursiveChunker`] built from the config, and the prompt template to
/// [`PromptTemplate::english()`].
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    index: Option<Arc<dyn VectorIndex>>,
    chunker: Option<Arc<dyn Chunker>>,
    generator: Option<Arc<dyn Generator>>,
    template: Option<PromptTemplate>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector index backend.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Override the document chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Set the prompt template.
    pub fn prompt_template(mut self, template: PromptTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Build the [`RagPipeline`], validating the config and required fields.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if a required field is missing or
    /// the config is invalid.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::Configuration("embedding_provider is required".to_string())
        })?;
        let index = self
            .index
            .ok_or_else(|| RagError::Configuration("vector_index is required".to_string()))?;
        let generator = self
            .generator
            .ok_or_else(|| RagError::Configuration("generator is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(RecursiveChunker::from_config(&config)?),
        };

        let retriever = Retriever::new(embedding_provider.clone(), index.clone())
            .with_default_k(config.top_k)
            .with_embed_timeout(config.embed_timeout())
            .with_similarity_threshold(config.similarity_threshold);

        Ok(RagPipeline {
            config,
            embedding_provider,
            index,
            chunker,
            generator,
            retriever,
            prompt: PromptAssembler::new(self.template.unwrap_or_default()),
        })
    }
}
