//! Gemini embedding and generation adapters over the Generative Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, instrument};

use crate::embedding::EmbeddingProvider;
use crate::error::{ProviderError, ProviderErrorKind, ProviderResult, RagError, Result};
use crate::generation::{GenerationParams, Generator};

const PROVIDER: &str = "Gemini";

/// The public Generative Language API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// The embedding model the knowledge base is indexed with by default.
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";

/// The answer model used by default.
pub const DEFAULT_GENERATION_MODEL: &str = "gemini-2.5-flash";

/// Output dimensionality of `models/embedding-001`.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;

/// Maximum number of texts per `batchEmbedContents` request.
const MAX_BATCH_SIZE: usize = 100;

/// Batch requests kept in flight while embedding documents.
const BATCH_CONCURRENCY: usize = 4;

/// Credentials and model selection for the Gemini adapters.
#[derive(Clone)]
pub struct GeminiConfig {
    /// API key sent in the `x-goog-api-key` header.
    pub api_key: String,
    /// Embedding model id, e.g. `models/embedding-001`.
    pub embedding_model: String,
    /// Generation model id, e.g. `gemini-2.5-flash`.
    pub generation_model: String,
    /// Declared embedding dimensionality.
    pub embedding_dimensions: usize,
    /// API root, overridable for proxies and tests.
    pub base_url: String,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("embedding_model", &self.embedding_model)
            .field("generation_model", &self.generation_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiConfig {
    /// Create a config with the default models.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RagError::Configuration("Gemini API key must not be empty".to_string()));
        }
        Ok(Self {
            api_key,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Read the config from the process environment.
    ///
    /// See [`from_lookup`](Self::from_lookup) for the variables used.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the config through `lookup`.
    ///
    /// - `GEMINI_API_KEY`, falling back to `GOOGLE_API_KEY` (required)
    /// - `PLANTDOC_EMBEDDING_MODEL` (optional)
    /// - `PLANTDOC_EMBEDDING_DIMENSIONS` (optional; defaults to the known
    ///   output size of the embedding model)
    /// - `PLANTDOC_GENERATION_MODEL` (optional)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let api_key =
            non_empty("GEMINI_API_KEY").or_else(|| non_empty("GOOGLE_API_KEY")).ok_or_else(|| {
                RagError::Configuration(
                    "GEMINI_API_KEY (or GOOGLE_API_KEY) environment variable not set".to_string(),
                )
            })?;

        let mut config = Self::new(api_key)?;
        if let Some(model) = non_empty("PLANTDOC_EMBEDDING_MODEL") {
            config.embedding_dimensions = known_dimensions(&model).unwrap_or(0);
            config.embedding_model = model;
        }
        if let Some(raw) = non_empty("PLANTDOC_EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&dimensions| dimensions > 0)
                .ok_or_else(|| {
                    RagError::Configuration(format!(
                        "PLANTDOC_EMBEDDING_DIMENSIONS must be a positive integer, got '{raw}'"
                    ))
                })?;
        }
        if config.embedding_dimensions == 0 {
            return Err(RagError::Configuration(format!(
                "unknown output dimension for embedding model '{}'; \
                 set PLANTDOC_EMBEDDING_DIMENSIONS",
                config.embedding_model
            )));
        }
        if let Some(model) = non_empty("PLANTDOC_GENERATION_MODEL") {
            config.generation_model = model;
        }
        Ok(config)
    }

    /// Override the embedding model and its dimensionality.
    pub fn with_embedding_model(mut self, model: impl Into<String>, dimensions: usize) -> Self {
        self.embedding_model = model.into();
        self.embedding_dimensions = dimensions;
        self
    }

    /// Override the generation model.
    pub fn with_generation_model(mut self, model: impl Into<String>) -> Self {
        self.generation_model = model.into();
        self
    }

    /// Override the API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/{}:{method}", self.base_url, model_path(model))
    }
}

/// Output dimensionality of the embedding models published by the API.
pub fn known_dimensions(model: &str) -> Option<usize> {
    match model.trim_start_matches("models/") {
        "embedding-001" | "text-embedding-004" => Some(768),
        "gemini-embedding-001" | "gemini-embedding-exp-03-07" => Some(3072),
        _ => None,
    }
}

/// `models/{name}`, accepting ids with or without the prefix.
fn model_path(model: &str) -> String {
    if model.starts_with("models/") { model.to_string() } else { format!("models/{model}") }
}

/// Map an HTTP error status to a failure kind.
pub fn classify_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::Unauthorized,
        429 => ProviderErrorKind::RateLimited,
        408 | 504 => ProviderErrorKind::Timeout,
        500..=599 => ProviderErrorKind::Unavailable,
        _ => ProviderErrorKind::InvalidRequest,
    }
}

fn classify_transport(err: &reqwest::Error) -> ProviderErrorKind {
    if err.is_timeout() {
        ProviderErrorKind::Timeout
    } else if err.is_decode() {
        ProviderErrorKind::BadResponse
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16())
    } else {
        ProviderErrorKind::Transport
    }
}

// API request/response types

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedRequest<'a>>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

fn batch_embed_body<'a>(
    model: &str,
    texts: &[&'a str],
    task_type: &'static str,
) -> BatchEmbedRequest<'a> {
    let model = model_path(model);
    BatchEmbedRequest {
        requests: texts
            .iter()
            .map(|&text| EmbedRequest {
                model: model.clone(),
                content: Content { role: None, parts: vec![Part { text }] },
                task_type,
            })
            .collect(),
    }
}

fn generate_body<'a>(prompt: &'a str, params: &GenerationParams) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: vec![Content { role: Some("user"), parts: vec![Part { text: prompt }] }],
        generation_config: GenerationConfig {
            temperature: params.temperature,
            max_output_tokens: params.max_output_tokens,
        },
    }
}

fn extract_text(response: GenerateResponse) -> ProviderResult<String> {
    let blocked = response.prompt_feedback.and_then(|feedback| feedback.block_reason);
    let Some(candidate) = response.candidates.into_iter().next() else {
        let reason = blocked.unwrap_or_else(|| "no candidates".to_string());
        return Err(ProviderError::new(
            PROVIDER,
            ProviderErrorKind::BadResponse,
            format!("empty response: {reason}"),
        ));
    };

    let text: String = candidate
        .content
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(ProviderError::new(
            PROVIDER,
            ProviderErrorKind::BadResponse,
            format!("candidate has no text (finish reason {reason})"),
        ));
    }
    Ok(text)
}

/// Shared HTTP plumbing for both adapters.
#[derive(Debug, Clone)]
struct GeminiClient {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiClient {
    fn new(config: GeminiConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    async fn post<B, R>(&self, url: &str, body: &B) -> ProviderResult<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = PROVIDER, error = %e, "request failed");
                ProviderError::new(PROVIDER, classify_transport(&e), format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            let kind = classify_status(status.as_u16());
            error!(provider = PROVIDER, %status, kind = %kind, "API error");
            return Err(ProviderError::new(
                PROVIDER,
                kind,
                format!("API returned {status}: {detail}"),
            ));
        }

        response.json().await.map_err(|e| {
            error!(provider = PROVIDER, error = %e, "failed to parse response");
            ProviderError::new(
                PROVIDER,
                ProviderErrorKind::BadResponse,
                format!("failed to parse response: {e}"),
            )
        })
    }
}

/// An [`EmbeddingProvider`] backed by `batchEmbedContents`.
///
/// Documents are embedded with task type `RETRIEVAL_DOCUMENT` in batches of
/// at most 100 texts, a few batches in flight at a time; questions use
/// `RETRIEVAL_QUERY`.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::gemini::{GeminiConfig, GeminiEmbeddingProvider};
///
/// let provider = GeminiEmbeddingProvider::new(GeminiConfig::from_env()?);
/// let embedding = provider.embed("tomato leaf spots").await?;
/// ```
#[derive(Debug, Clone)]
pub struct GeminiEmbeddingProvider {
    client: GeminiClient,
}

impl GeminiEmbeddingProvider {
    /// Create a provider for `config.embedding_model`.
    pub fn new(config: GeminiConfig) -> Self {
        Self { client: GeminiClient::new(config) }
    }

    async fn embed_request(
        &self,
        texts: &[&str],
        task_type: &'static str,
    ) -> ProviderResult<Vec<Vec<f32>>> {
        let config = &self.client.config;
        let body = batch_embed_body(&config.embedding_model, texts, task_type);
        let url = config.endpoint(&config.embedding_model, "batchEmbedContents");
        let response: BatchEmbedResponse = self.client.post(&url, &body).await?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::new(
                PROVIDER,
                ProviderErrorKind::BadResponse,
                format!("expected {} embeddings, got {}", texts.len(), response.embeddings.len()),
            ));
        }
        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    #[instrument(skip_all, fields(provider = PROVIDER, text_len = text.len()))]
    async fn embed(&self, text: &str) -> ProviderResult<Vec<f32>> {
        let results = self.embed_request(&[text], "RETRIEVAL_QUERY").await?;
        results.into_iter().next().ok_or_else(|| {
            ProviderError::new(
                PROVIDER,
                ProviderErrorKind::BadResponse,
                "API returned no embedding",
            )
        })
    }

    #[instrument(skip_all, fields(provider = PROVIDER, batch_size = texts.len()))]
    async fn embed_batch(&self, texts: &[&str]) -> ProviderResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(model = %self.client.config.embedding_model, "embedding batch");

        // `buffered` keeps results in request order.
        let batches: Vec<Vec<Vec<f32>>> = futures::stream::iter(texts.chunks(MAX_BATCH_SIZE))
            .map(|batch| self.embed_request(batch, "RETRIEVAL_DOCUMENT"))
            .boxed()
            .buffered(BATCH_CONCURRENCY)
            .try_collect()
            .await?;
        Ok(batches.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.client.config.embedding_dimensions
    }

    fn model_id(&self) -> &str {
        &self.client.config.embedding_model
    }
}

/// A [`Generator`] backed by `generateContent`.
#[derive(Debug, Clone)]
pub struct GeminiGenerator {
    client: GeminiClient,
}

impl GeminiGenerator {
    /// Create a generator for `config.generation_model`.
    pub fn new(config: GeminiConfig) -> Self {
        Self { client: GeminiClient::new(config) }
    }
}

#[async_trait]
impl Generator for GeminiGenerator {
    #[instrument(skip_all, fields(provider = PROVIDER, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> ProviderResult<String> {
        let config = &self.client.config;
        let url = config.endpoint(&config.generation_model, "generateContent");
        debug!(model = %config.generation_model, temperature = params.temperature, "generating");

        let response: GenerateResponse =
            self.client.post(&url, &generate_body(prompt, params)).await?;
        extract_text(response)
    }

    fn model_id(&self) -> &str {
        &self.client.config.generation_model
    }
}
