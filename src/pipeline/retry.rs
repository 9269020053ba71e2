//! Retry-with-backoff policy shared by the transcription, rewrite and synthesis stations.
//!
//! Every attempt runs under a per-call timeout and races the session's
//! cancellation token, so a stuck engine call can neither stall the
//! pipeline nor outlive a `stop`.

use crate::config::RetrySettings;
use crate::error::CommentaryError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Why a retried operation produced no value.
#[derive(Debug)]
pub enum RetryError {
    /// The session was cancelled; the caller must not forward anything.
    Cancelled,
    /// Every attempt failed or timed out.
    Exhausted {
        attempts: u32,
        last: CommentaryError,
    },
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "cancelled"),
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempt(s): {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for RetryError {}

/// Bounded retry with exponential backoff and a per-call timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }

    /// Policy without delays, for tests.
    pub fn immediate(max_attempts: u32, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            max_backoff: Duration::ZERO,
            call_timeout,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as i32;
        let millis = self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, attempts run out, or `cancel` fires.
    ///
    /// `op` receives the 1-based attempt number. The operation must be
    /// idempotent: a timed-out attempt may still have reached the engine.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
    {
        let mut last = CommentaryError::Other(format!("{operation}: no attempt made"));

        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                res = tokio::time::timeout(self.call_timeout, op(attempt)) => res,
            };

            match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    tracing::debug!(operation, attempt, error = %e, "attempt failed");
                    last = e;
                }
                Err(_) => {
                    tracing::debug!(operation, attempt, "attempt timed out");
                    last = CommentaryError::Timeout {
                        timeout_ms: self.call_timeout.as_millis() as u64,
                    };
                }
            }

            if attempt < self.max_attempts {
                let delay = self.backoff_for(attempt);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
            last,
        })
    }

    /// Like [`run`](Self::run), but turns exhaustion into `fallback(last_error)`.
    ///
    /// Returns `None` only when cancelled.
    pub async fn run_or_else<T, F, Fut, G>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        op: F,
        fallback: G,
    ) -> Option<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = crate::error::Result<T>>,
        G: FnOnce(&CommentaryError) -> T,
    {
        match self.run(operation, cancel, op).await {
            Ok(value) => Some(value),
            Err(RetryError::Cancelled) => None,
            Err(RetryError::Exhausted { last, .. }) => Some(fallback(&last)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fails(message: &str) -> CommentaryError {
        CommentaryError::RewriteFailure {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(10), Duration::from_millis(350));
    }

    #[test]
    fn test_from_settings_never_zero_attempts() {
        let settings = RetrySettings {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_settings(&settings).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let policy = RetryPolicy::immediate(3, Duration::from_secs(1));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = policy
            .run("rewrite", &CancellationToken::new(), |attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 {
                        Err(fails("busy"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_reports_last_error() {
        let policy = RetryPolicy::immediate(2, Duration::from_secs(1));
        let result: Result<(), RetryError> = policy
            .run("rewrite", &CancellationToken::new(), |attempt| async move {
                Err(fails(&format!("attempt {attempt}")))
            })
            .await;

        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert_eq!(last.to_string(), "Rewrite failed: attempt 2");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let policy = RetryPolicy::immediate(2, Duration::from_millis(20));
        let result: Result<(), RetryError> = policy
            .run("synthesis", &CancellationToken::new(), |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(RetryError::Exhausted {
                last: CommentaryError::Timeout { timeout_ms: 20 },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_abandons_in_flight_call() {
        let policy = RetryPolicy::immediate(3, Duration::from_secs(10));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result: Result<(), RetryError> = policy
            .run("transcription", &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_run_or_else_applies_fallback() {
        let policy = RetryPolicy::immediate(2, Duration::from_secs(1));
        let value = policy
            .run_or_else(
                "rewrite",
                &CancellationToken::new(),
                |_| async { Err::<String, _>(fails("down")) },
                |e| format!("fallback after {e}"),
            )
            .await;
        assert_eq!(value.as_deref(), Some("fallback after Rewrite failed: down"));
    }

    #[tokio::test]
    async fn test_run_or_else_none_when_cancelled() {
        let policy = RetryPolicy::immediate(2, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let value = policy
            .run_or_else(
                "rewrite",
                &cancel,
                |_| async { Ok::<_, CommentaryError>(1) },
                |_| 0,
            )
            .await;
        assert_eq!(value, None);
    }
}
