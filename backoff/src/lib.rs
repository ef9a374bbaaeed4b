//! Attempt-capped retries with exponential backoff.
//!
//! The remote collaborators of this workspace (the cloud drive and the
//! ingestion API) fail transiently; every retry loop sleeps
//! `base^attempt` seconds plus a sub-second random jitter between attempts
//! and gives up after a configured number of attempts, surfacing the last
//! error to the caller.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

use std::num::NonZeroUsize;
use std::time::Duration;

use observability_deps::tracing::warn;
use rand::Rng;
use snafu::Snafu;

/// Error returned once the attempt budget of a retried operation is spent, or
/// a non-retryable error is observed. Carries the last error.
#[derive(Debug, Snafu)]
#[snafu(display("'{task_name}' failed after {attempts} attempt(s): {source}"))]
pub struct BackoffError<E>
where
    E: std::error::Error + 'static,
{
    /// Name of the failed operation, for logs.
    pub task_name: String,

    /// How many attempts were made before giving up.
    pub attempts: usize,

    /// The error returned by the final attempt.
    pub source: E,
}

/// Result alias for retried operations.
pub type BackoffResult<T, E> = Result<T, BackoffError<E>>;

/// Backoff configuration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base of the exponential sleep: attempt `n` (0-based) sleeps
    /// `base^n` seconds before the next attempt.
    pub base: f64,

    /// Upper bound of the random jitter added to every sleep.
    pub jitter: Duration,

    /// Total number of attempts before giving up.
    pub max_attempts: NonZeroUsize,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: 2.,
            jitter: Duration::from_secs(1),
            max_attempts: NonZeroUsize::new(3).unwrap(),
        }
    }
}

impl BackoffConfig {
    /// Returns a config identical to `self` but with the given attempt cap.
    pub fn with_max_attempts(self, max_attempts: NonZeroUsize) -> Self {
        Self {
            max_attempts,
            ..self
        }
    }
}

/// Drives retries of a fallible async operation.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
}

impl Backoff {
    /// Create a new backoff helper from the given config.
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Retry `f` on every error, up to the configured attempt cap.
    pub async fn retry_all_errors<F, Fut, T, E>(
        &mut self,
        task_name: &str,
        f: F,
    ) -> BackoffResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.retry_if(task_name, f, |_| true).await
    }

    /// Retry `f` while `retryable` holds for the returned error, up to the
    /// configured attempt cap. A non-retryable error ends the loop
    /// immediately.
    pub async fn retry_if<F, Fut, T, E, P>(
        &mut self,
        task_name: &str,
        mut f: F,
        retryable: P,
    ) -> BackoffResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.config.max_attempts.get();

        for attempt in 0..max_attempts {
            match f().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt + 1 < max_attempts && retryable(&e) => {
                    let sleep_for = self.sleep_duration(attempt);
                    warn!(
                        task_name,
                        attempt,
                        sleep_secs = sleep_for.as_secs_f64(),
                        %e,
                        "retrying after error",
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    return Err(BackoffError {
                        task_name: task_name.to_owned(),
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }

        unreachable!("loop either returns a value or the final error")
    }

    /// Sleep duration before the retry following (0-based) `attempt`.
    fn sleep_duration(&self, attempt: usize) -> Duration {
        let exp = Duration::from_secs_f64(self.config.base.powi(attempt as i32));
        let jitter_micros = self.config.jitter.as_micros() as u64;
        let jitter = Duration::from_micros(rand::thread_rng().gen_range(0..=jitter_micros));
        exp + jitter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Eq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Self::Transient => write!(f, "transient"),
                Self::Fatal => write!(f, "fatal"),
            }
        }
    }

    impl std::error::Error for TestError {}

    fn fast_config() -> BackoffConfig {
        BackoffConfig {
            base: 0.001,
            jitter: Duration::from_micros(1),
            max_attempts: NonZeroUsize::new(3).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_immediate_success_makes_one_attempt() {
        let calls = AtomicUsize::new(0);
        let got = Backoff::new(&fast_config())
            .retry_all_errors::<_, _, _, TestError>("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await
            .unwrap();

        assert_eq!(got, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let got = Backoff::new(&fast_config())
            .retry_all_errors("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok("done")
                }
            })
            .await
            .unwrap();

        assert_eq!(got, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_budget_is_finite() {
        let calls = AtomicUsize::new(0);
        let err = Backoff::new(&fast_config())
            .retry_all_errors::<_, _, (), _>("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Transient)
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.attempts, 3);
        assert_eq!(err.source, TestError::Transient);
        assert_eq!(err.to_string(), "'test' failed after 3 attempt(s): transient");
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let calls = AtomicUsize::new(0);
        let err = Backoff::new(&fast_config())
            .retry_if::<_, _, (), _, _>(
                "test",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                },
                |e| matches!(e, TestError::Transient),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.attempts, 1);
        assert_eq!(err.source, TestError::Fatal);
    }
}
