//! Helpers shared by the workspace's tests.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_docs, clippy::todo, clippy::dbg_macro)]

use std::future::Future;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Install a terse tracing subscriber for the current test binary if
/// `RUST_LOG` is set. Safe to call from every test; only the first call wins.
pub fn maybe_start_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        start_logging()
    }
}

/// Install a tracing subscriber honoring `RUST_LOG`, defaulting to `debug`.
pub fn start_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .with_test_writer()
        .try_init();
}

/// Extension trait bounding the runtime of test futures.
///
/// Tests exercising worker pools and polling loops must terminate even when a
/// liveness property is broken; wrap those futures so a hang becomes a
/// failure instead of a stuck CI job.
pub trait WithTimeout: Future + Sized {
    /// Panic if the future does not complete within `d`.
    fn with_timeout(
        self,
        d: Duration,
    ) -> impl Future<Output = Self::Output> {
        async move {
            tokio::time::timeout(d, self)
                .await
                .expect("test future timed out")
        }
    }

    /// [`Self::with_timeout`] with a default budget of 10 seconds.
    fn with_timeout_panic(self) -> impl Future<Output = Self::Output> {
        self.with_timeout(Duration::from_secs(10))
    }
}

impl<F> WithTimeout for F where F: Future + Sized {}
