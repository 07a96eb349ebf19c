//! Retry handling for transient backend failures.
//!
//! Transient failures (rate limit, unavailable) are retried up to a fixed
//! attempt budget with a fixed backoff between attempts. Everything else
//! propagates immediately. Streaming calls restart whole: the accumulated
//! buffer is discarded and the next attempt reads from scratch.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::{GenerateRequest, ModelBackend};
use crate::error::Result;

/// Retry policy for backend calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Policy with a custom attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Override the fixed backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Run `f` under the retry policy. Only transient errors consume retry
/// attempts; permanent errors return on first sight.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation, attempt, "backend call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "transient backend error, backing off"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Unary generation under the retry policy.
pub async fn generate_with_retry(
    backend: &dyn ModelBackend,
    request: &GenerateRequest,
    policy: &RetryPolicy,
) -> Result<String> {
    with_retry(policy, "generate", || backend.generate(request)).await
}

/// Streaming generation collected into a single string, under the retry
/// policy. Each restart opens a fresh stream and begins with an empty
/// buffer.
pub async fn collect_streamed(
    backend: &dyn ModelBackend,
    request: &GenerateRequest,
    policy: &RetryPolicy,
) -> Result<String> {
    with_retry(policy, "generate_stream", || async {
        let mut rx = backend.generate_stream(request).await?;
        let mut buffer = String::new();
        while let Some(chunk) = rx.recv().await {
            buffer.push_str(&chunk?);
        }
        Ok(buffer)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let policy = RetryPolicy::new(3).with_backoff(Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry(&policy, "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(LlmError::Unavailable("503".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let policy = RetryPolicy::new(5).with_backoff(Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&policy, "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Authentication("bad key".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restarted_stream_discards_partial_buffer() {
        use crate::client::{ChunkReceiver, GenerateRequest, ModelBackend};
        use tokio::sync::mpsc;

        /// Fails mid-stream on the first call, then streams cleanly.
        struct FlakyStream {
            calls: AtomicU32,
        }

        #[async_trait::async_trait]
        impl ModelBackend for FlakyStream {
            async fn generate(&self, _request: &GenerateRequest) -> Result<String> {
                unreachable!("streaming test")
            }

            async fn generate_stream(&self, _request: &GenerateRequest) -> Result<ChunkReceiver> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    if call == 0 {
                        let _ = tx.send(Ok("PARTIAL-".to_string())).await;
                        let _ = tx
                            .send(Err(crate::error::LlmError::Unavailable("503".into())))
                            .await;
                    } else {
                        let _ = tx.send(Ok("clean ".to_string())).await;
                        let _ = tx.send(Ok("output".to_string())).await;
                    }
                });
                Ok(rx)
            }
        }

        let backend = FlakyStream {
            calls: AtomicU32::new(0),
        };
        let policy = RetryPolicy::new(3).with_backoff(Duration::from_millis(1));
        let text = collect_streamed(&backend, &GenerateRequest::text("x"), &policy)
            .await
            .unwrap();

        // No residue from the aborted first attempt.
        assert_eq!(text, "clean output");
    }

    #[tokio::test]
    async fn attempt_budget_is_exhausted() {
        let policy = RetryPolicy::new(2).with_backoff(Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<()> = with_retry(&policy, "test", move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::RateLimited("429".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
