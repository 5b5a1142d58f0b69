//! Data types for documents, chunks, index entries, and retrieval results.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A source document containing text content and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Unique identifier for the document.
    pub id: String,
    /// The text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document (crop, disease, source, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document without metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new(), source_uri: None }
    }

    /// Add a metadata field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A contiguous segment of a [`Document`]'s text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Stable identity, `"{document_id}:{offset}"` unless explicitly duplicated.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Character offset of the chunk's first character in the parent text.
    pub offset: usize,
    /// Metadata inherited from the parent document plus `chunk_index` and `offset`.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// The stable identity of the chunk starting at `offset` in `document_id`.
    pub fn identity(document_id: &str, offset: usize) -> String {
        format!("{document_id}:{offset}")
    }
}

/// A chunk paired with its embedding, as stored in a vector index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    /// The embedding of `chunk.text`.
    pub vector: Vec<f32>,
    /// The embedded chunk, carrying its metadata.
    pub chunk: Chunk,
}

/// A retrieved [`Chunk`] paired with a similarity score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Cosine similarity with the query (higher is more relevant). Diagnostic only.
    pub score: f32,
}

/// The ordered outcome of one retrieval: at most `k` hits, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    /// Hits in descending score order.
    pub hits: Vec<SearchResult>,
}

impl RetrievalResult {
    /// Wrap already-ordered hits.
    pub fn new(hits: Vec<SearchResult>) -> Self {
        Self { hits }
    }

    /// Whether nothing was retrieved.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Number of hits.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Score of the best hit, if any.
    pub fn top_score(&self) -> Option<f32> {
        self.hits.first().map(|hit| hit.score)
    }

    /// Chunk texts in retrieval order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.hits.iter().map(|hit| hit.chunk.text.as_str())
    }

    /// The hits rendered as caller-facing citations.
    pub fn sources(&self) -> Vec<Source> {
        self.hits
            .iter()
            .map(|hit| Source {
                chunk_text: hit.chunk.text.clone(),
                metadata: hit.chunk.metadata.clone(),
                score: hit.score,
            })
            .collect()
    }
}

/// One citation in an [`Answer`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    /// The chunk text that was placed in the prompt.
    pub chunk_text: String,
    /// The chunk's metadata.
    pub metadata: HashMap<String, String>,
    /// Similarity score, best-effort.
    pub score: f32,
}

/// A generated answer with the retrieval that grounded it.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    /// The answer text.
    pub text: String,
    /// The retrieval result the prompt was built from.
    pub retrieval: RetrievalResult,
    /// True when nothing was retrieved and the fixed refusal was returned.
    pub empty_context: bool,
}

impl Answer {
    /// The answer in the query-interface shape `{text, sources}`.
    pub fn to_response(&self) -> AnswerResponse {
        AnswerResponse { text: self.text.clone(), sources: self.retrieval.sources() }
    }
}

/// Serialisable view of an [`Answer`] for callers that display citations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResponse {
    /// The answer text.
    pub text: String,
    /// The chunks that grounded the answer, best first.
    pub sources: Vec<Source>,
}
