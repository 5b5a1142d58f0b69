//! Generator trait and the bounded retry loop around it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::{ProviderError, ProviderResult, RagError, Result};

/// Sampling parameters passed to a [`Generator`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    pub max_output_tokens: Option<u32>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.1, max_output_tokens: None }
    }
}

/// A text-generation service that answers a single assembled prompt.
///
/// # Example
///
/// ```rust,ignore
/// use plantdoc_rag::{GenerationParams, Generator};
///
/// let text = generator.generate(&prompt, &GenerationParams::default()).await?;
/// ```
#[async_trait]
pub trait Generator: Send + Sync {
    /// Produce text for `prompt`.
    async fn generate(&self, prompt: &str, params: &GenerationParams) -> ProviderResult<String>;

    /// The model identifier, for logs.
    fn model_id(&self) -> &str;
}

/// Call `generator` with a per-attempt deadline, retrying retryable failures.
///
/// Non-retryable failures end the loop at once. When attempts run out the
/// last failure is returned as [`RagError::GenerationFailure`].
pub async fn generate_with_retry(
    generator: &dyn Generator,
    prompt: &str,
    params: &GenerationParams,
    policy: &RetryPolicy,
    timeout: Duration,
) -> Result<String> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(timeout, generator.generate(prompt, params)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::timeout(generator.model_id(), timeout)),
        };

        let err = match outcome {
            Ok(text) => {
                debug!(
                    model = generator.model_id(),
                    attempt,
                    answer_len = text.len(),
                    "generation completed"
                );
                return Ok(text);
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= max_attempts {
            warn!(
                model = generator.model_id(),
                attempt,
                kind = %err.kind,
                error = %err.message,
                "generation failed"
            );
            return Err(RagError::GenerationFailure {
                kind: err.kind,
                attempts: attempt,
                message: err.to_string(),
            });
        }

        let delay = policy.backoff(attempt);
        warn!(
            model = generator.model_id(),
            attempt,
            kind = %err.kind,
            delay_ms = delay.as_millis() as u64,
            "generation attempt failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ProviderErrorKind;

    struct Scripted {
        outcomes: Mutex<Vec<ProviderResult<String>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<ProviderResult<String>>) -> Self {
            outcomes.reverse();
            Self { outcomes: Mutex::new(outcomes), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, _: &str, _: &GenerationParams) -> ProviderResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes.lock().unwrap().pop().unwrap_or_else(|| Ok("done".to_string()))
        }

        fn model_id(&self) -> &str {
            "scripted"
        }
    }

    fn fail(kind: ProviderErrorKind) -> ProviderResult<String> {
        Err(ProviderError::new("test", kind, "boom"))
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, initial_backoff_ms: 10, max_backoff_ms: 100, multiplier: 2.0 }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let generator = Scripted::new(vec![
            fail(ProviderErrorKind::RateLimited),
            fail(ProviderErrorKind::Unavailable),
            Ok("answer".to_string()),
        ]);
        let text = generate_with_retry(
            &generator,
            "p",
            &GenerationParams::default(),
            &policy(3),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(text, "answer");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let generator = Scripted::new(vec![fail(ProviderErrorKind::Unauthorized)]);
        let err = generate_with_retry(
            &generator,
            "p",
            &GenerationParams::default(),
            &policy(5),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RagError::GenerationFailure { kind: ProviderErrorKind::Unauthorized, attempts: 1, .. }
        ));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts() {
        let generator = Scripted::new(vec![
            fail(ProviderErrorKind::Transport),
            fail(ProviderErrorKind::Transport),
        ]);
        let err = generate_with_retry(
            &generator,
            "p",
            &GenerationParams::default(),
            &policy(2),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RagError::GenerationFailure { kind: ProviderErrorKind::Transport, attempts: 2, .. }
        ));
    }

    struct Hanging;

    #[async_trait]
    impl Generator for Hanging {
        async fn generate(&self, _: &str, _: &GenerationParams) -> ProviderResult<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("late".to_string())
        }

        fn model_id(&self) -> &str {
            "hanging"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn each_attempt_is_bounded_by_timeout() {
        let err = generate_with_retry(
            &Hanging,
            "p",
            &GenerationParams::default(),
            &policy(2),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            RagError::GenerationFailure { kind: ProviderErrorKind::Timeout, attempts: 2, .. }
        ));
    }
}
