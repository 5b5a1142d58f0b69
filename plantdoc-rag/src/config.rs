//! Configuration for the RAG pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Separators tried in priority order: paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", " ", ""];

/// Retry schedule for generation calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. At least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Factor applied to the delay after each failed attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, initial_backoff_ms: 500, max_backoff_ms: 8_000, multiplier: 2.0 }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::default() }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
        Duration::from_millis(delay.min(self.max_backoff_ms as f64) as u64)
    }
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of characters repeated from the end of one chunk at the start of the next.
    pub chunk_overlap: usize,
    /// Separators tried in priority order when splitting; `""` means character slicing.
    pub separators: Vec<String>,
    /// Number of chunks retrieved per question.
    pub top_k: usize,
    /// Minimum similarity score for results, if any.
    pub similarity_threshold: Option<f32>,
    /// Generation temperature; low values favor literal grounding.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_output_tokens: Option<u32>,
    /// Deadline for one embedding call, in milliseconds.
    pub embed_timeout_ms: u64,
    /// Deadline for one generation attempt, in milliseconds.
    pub generate_timeout_ms: u64,
    /// Retry schedule for generation.
    pub retry: RetryPolicy,
    /// Return the fixed refusal without calling the generator when nothing was retrieved.
    pub refuse_on_empty_context: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            top_k: 3,
            similarity_threshold: None,
            temperature: 0.1,
            max_output_tokens: None,
            embed_timeout_ms: 30_000,
            generate_timeout_ms: 60_000,
            retry: RetryPolicy::default(),
            refuse_on_empty_context: true,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Embedding deadline as a [`Duration`].
    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }

    /// Per-attempt generation deadline as a [`Duration`].
    pub fn generate_timeout(&self) -> Duration {
        Duration::from_millis(self.generate_timeout_ms)
    }

    /// Check that the parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Configuration`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0`
    /// - `separators` is empty
    /// - a timeout is zero, or `retry.max_attempts == 0`
    /// - `temperature` is not within `0.0..=2.0`
    pub fn validate(&self) -> Result<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        if self.top_k == 0 {
            return Err(RagError::Configuration("top_k must be greater than zero".to_string()));
        }
        if self.separators.is_empty() {
            return Err(RagError::Configuration(
                "at least one separator is required".to_string(),
            ));
        }
        if self.embed_timeout_ms == 0 || self.generate_timeout_ms == 0 {
            return Err(RagError::Configuration("timeouts must be greater than zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RagError::Configuration(format!(
                "temperature ({}) must be within 0.0..=2.0",
                self.temperature
            )));
        }
        Ok(())
    }
}

pub(crate) fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::Configuration("chunk_size must be greater than zero".to_string()));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::Configuration(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Replace the separator priority list.
    pub fn separators<I, S>(mut self, separators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.separators = separators.into_iter().map(Into::into).collect();
        self
    }

    /// Set the number of chunks retrieved per question.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Drop results scoring below `threshold`.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = Some(threshold);
        self
    }

    /// Set the generation temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.config.temperature = temperature;
        self
    }

    /// Cap the number of generated tokens.
    pub fn max_output_tokens(mut self, tokens: u32) -> Self {
        self.config.max_output_tokens = Some(tokens);
        self
    }

    /// Set the embedding deadline.
    pub fn embed_timeout(mut self, timeout: Duration) -> Self {
        self.config.embed_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-attempt generation deadline.
    pub fn generate_timeout(mut self, timeout: Duration) -> Self {
        self.config.generate_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the generation retry schedule.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Whether an empty retrieval short-circuits to the fixed refusal.
    pub fn refuse_on_empty_context(mut self, refuse: bool) -> Self {
        self.config.refuse_on_empty_context = refuse;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
