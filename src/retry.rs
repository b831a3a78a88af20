//! Retry with exponential backoff for text-generation calls.
//!
//! The upstream generation service fails in two ways: transient overload
//! (rate limiting, capacity exhaustion) and everything else. Transient
//! failures are retried with a doubling delay; anything else aborts
//! immediately. Both abort paths are distinct [`RetryOutcome`] variants so
//! callers keep the diagnostic difference even when they degrade both to
//! the same fallback value.
//!
//! Backoff suspends via `tokio::time::sleep`, so a sleeping retry parks
//! only the task driving that request.

use std::future::Future;
use std::time::Duration;

use crate::config::LlmConfig;

/// Exponential-backoff retry parameters for one class of generation call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Result of driving a generation call through [`RetryPolicy::invoke`].
#[derive(Debug)]
pub enum RetryOutcome {
    /// The call succeeded (possibly after transient failures).
    Success(String),
    /// A non-retryable error occurred; no delay was taken for it.
    Terminal { error: String },
    /// Every attempt failed transiently.
    Exhausted { attempts: u32, last_error: String },
}

impl RetryOutcome {
    /// The generated text, if the call succeeded.
    pub fn into_text(self) -> Option<String> {
        match self {
            RetryOutcome::Success(text) => Some(text),
            _ => None,
        }
    }
}

/// Whether an error message indicates a temporary upstream condition worth
/// retrying: rate limiting (429), service overload (503), or quota/capacity
/// exhaustion as reported by the generation API.
pub fn is_transient(message: &str) -> bool {
    message.contains("429")
        || message.contains("503")
        || message.contains("RESOURCE_EXHAUSTED")
        || message.contains("overloaded")
}

impl RetryPolicy {
    pub fn from_config(llm: &LlmConfig) -> Self {
        Self {
            max_attempts: llm.max_attempts,
            initial_delay: Duration::from_secs(llm.initial_delay_secs),
            backoff_multiplier: llm.backoff_multiplier,
        }
    }

    /// Drive `op` until it succeeds, fails terminally, or the attempt
    /// budget is spent. After each transient failure the current delay is
    /// slept and then multiplied.
    pub async fn invoke<F, Fut>(&self, mut op: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<String>>,
    {
        let mut delay = self.initial_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(text) => return RetryOutcome::Success(text),
                Err(e) => {
                    let message = e.to_string();
                    if !is_transient(&message) {
                        return RetryOutcome::Terminal { error: message };
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_secs = delay.as_secs_f64(),
                        "generation service overloaded, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff_multiplier);
                    last_error = message;
                }
            }
        }

        RetryOutcome::Exhausted {
            attempts: self.max_attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_transient_classification() {
        assert!(is_transient("Gemini API error 429: slow down"));
        assert!(is_transient("Gemini API error 503: try later"));
        assert!(is_transient("RESOURCE_EXHAUSTED"));
        assert!(is_transient("model is overloaded"));
        assert!(!is_transient("Gemini API error 400: bad request"));
        assert!(!is_transient("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_transient_failures_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();
        let start = Instant::now();

        let outcome = quick_policy()
            .invoke(move || {
                let calls = calls2.clone();
                async move {
                    match calls.fetch_add(1, Ordering::SeqCst) {
                        0 | 1 => anyhow::bail!("API error 503: overloaded"),
                        _ => Ok("generated".to_string()),
                    }
                }
            })
            .await;

        match outcome {
            RetryOutcome::Success(text) => assert_eq!(text, "generated"),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two delays: 5s then 10s (the second doubles the first).
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_error_aborts_without_delay() {
        let start = Instant::now();
        let outcome = quick_policy()
            .invoke(|| async { anyhow::bail!("invalid API key") })
            .await;

        match outcome {
            RetryOutcome::Terminal { error } => assert!(error.contains("invalid API key")),
            other => panic!("expected terminal, got {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls2 = calls.clone();

        let outcome = quick_policy()
            .invoke(move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    anyhow::bail!("API error 429: rate limited")
                }
            })
            .await;

        match outcome {
            RetryOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("429"));
            }
            other => panic!("expected exhausted, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
