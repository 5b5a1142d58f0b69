//! Error types for the `plantdoc-rag` crate.
//!
//! Two layers: [`ProviderError`] classifies failures of the external embedding
//! and generation services, and [`RagError`] is what pipeline operations
//! return to callers.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Classification of an external-service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// The call did not complete within its deadline.
    Timeout,
    /// The service rejected the call because of rate or quota limits.
    RateLimited,
    /// Credentials were missing, invalid, or lacked permission.
    Unauthorized,
    /// The service reported a temporary server-side failure.
    Unavailable,
    /// The service rejected the request as malformed.
    InvalidRequest,
    /// The service answered, but the body could not be understood.
    BadResponse,
    /// The request never reached the service (DNS, TLS, connection reset).
    Transport,
}

impl ProviderErrorKind {
    /// Whether a failed call of this kind may succeed when retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited | Self::Unavailable | Self::Transport)
    }

    /// Short stable name, used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unauthorized => "unauthorized",
            Self::Unavailable => "unavailable",
            Self::InvalidRequest => "invalid_request",
            Self::BadResponse => "bad_response",
            Self::Transport => "transport",
        }
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to an embedding or generation service.
#[derive(Debug, Clone, Error)]
#[error("{provider} {kind}: {message}")]
pub struct ProviderError {
    /// The provider that produced the error (e.g. `"Gemini"`).
    pub provider: String,
    /// What went wrong, coarsely.
    pub kind: ProviderErrorKind,
    /// A description of the failure.
    pub message: String,
}

impl ProviderError {
    /// Create a new provider error.
    pub fn new(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self { provider: provider.into(), kind, message: message.into() }
    }

    /// A timeout error for `provider` after `elapsed`.
    pub fn timeout(provider: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, format!("no response within {elapsed:?}"))
    }

    /// Whether retrying the call may help.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors returned by chunking, indexing, retrieval, and answer generation.
#[derive(Debug, Error)]
pub enum RagError {
    /// Missing credentials, missing model id, or inconsistent settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The persisted index is missing or cannot be loaded.
    #[error("Index unavailable at {}: {message}", path.display())]
    IndexUnavailable {
        /// The index directory.
        path: PathBuf,
        /// What went wrong and how to fix it.
        message: String,
    },

    /// A vector's dimension differs from the index dimension.
    #[error(
        "Dimension mismatch: index holds {expected}-dimensional vectors, got {actual}; rebuild the index"
    )]
    DimensionMismatch {
        /// The dimension the index was built with.
        expected: usize,
        /// The offending dimension.
        actual: usize,
    },

    /// The index was built with a different embedding model.
    #[error(
        "Embedding model changed: index was built with '{indexed}', configured '{configured}'; rebuild the index"
    )]
    EmbeddingModelChanged {
        /// The model recorded in the index.
        indexed: String,
        /// The model the embedder is configured with.
        configured: String,
    },

    /// The embedding service failed while answering a query.
    #[error("Retrieval unavailable ({kind}): {message}")]
    RetrievalUnavailable {
        /// Failure classification from the embedding provider.
        kind: ProviderErrorKind,
        /// A description of the failure.
        message: String,
    },

    /// The generation service failed after all retry attempts.
    #[error("Generation failed after {attempts} attempt(s) ({kind}): {message}")]
    GenerationFailure {
        /// Classification of the last failure.
        kind: ProviderErrorKind,
        /// How many attempts were made.
        attempts: u32,
        /// Description of the last failure.
        message: String,
    },

    /// The embedding service failed while building the index.
    #[error("Embedding failed: {0}")]
    Embedding(#[source] ProviderError),

    /// Reading or writing the persisted index failed.
    #[error("Storage error at {}: {message}", path.display())]
    Storage {
        /// The file or directory involved.
        path: PathBuf,
        /// A description of the failure.
        message: String,
    },

    /// A dataset record could not be turned into a document.
    #[error("Ingestion error: {0}")]
    Ingestion(String),

    /// The caller cancelled the query cycle.
    #[error("Query cancelled")]
    Cancelled,
}

impl RagError {
    pub(crate) fn storage(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Self::Storage { path: path.into(), message: err.to_string() }
    }

    /// Whether the caller may retry the operation unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetrievalUnavailable { kind, .. } | Self::GenerationFailure { kind, .. } => {
                kind.is_retryable()
            }
            _ => false,
        }
    }

    /// Whether the index must be rebuilt before queries can succeed.
    pub fn requires_reindex(&self) -> bool {
        matches!(
            self,
            Self::IndexUnavailable { .. }
                | Self::DimensionMismatch { .. }
                | Self::EmbeddingModelChanged { .. }
        )
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;

/// A convenience result type for provider adapters.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
