//! Retrieval-augmented question answering over a plant-disease knowledge base.
//!
//! This crate provides:
//! - Recursive and fixed-size document chunking with character overlap
//! - Vector indexes with cosine search: in-memory and directory-backed
//! - Query retrieval with bounded embedding calls
//! - Grounded prompt assembly with a fixed refusal sentence
//! - Answer generation with timeouts and bounded retries
//! - The [`RagPipeline`] orchestrator for building the index and answering questions
//! - Dataset loading from JSON and JSON Lines records
//! - Gemini embedding and generation adapters (feature `gemini`)

pub mod chunking;
pub mod config;
pub mod disk;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod inmemory;
pub mod pipeline;
pub mod prompt;
pub mod retriever;
pub mod vectorstore;

#[cfg(feature = "gemini")]
pub mod gemini;

pub use chunking::{Chunker, FixedSizeChunker, RecursiveChunker};
pub use config::{DEFAULT_SEPARATORS, RagConfig, RagConfigBuilder, RetryPolicy};
pub use disk::DiskVectorIndex;
pub use document::{
    Answer, AnswerResponse, Chunk, Document, IndexEntry, RetrievalResult, SearchResult, Source,
};
pub use embedding::EmbeddingProvider;
pub use error::{ProviderError, ProviderErrorKind, ProviderResult, RagError, Result};
pub use generation::{GenerationParams, Generator, generate_with_retry};
pub use ingest::{RecordMapping, load_documents};
pub use inmemory::InMemoryVectorIndex;
pub use pipeline::{BuildReport, IngestMode, RagPipeline, RagPipelineBuilder};
pub use prompt::{PromptAssembler, PromptTemplate};
pub use retriever::{DEFAULT_TOP_K, Retriever};
pub use vectorstore::{UpsertStats, VectorIndex, cosine_similarity};
