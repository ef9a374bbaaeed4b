//! Abstraction over the system clock.
//!
//! All timestamps in this workspace are naive UTC: the upstream object store
//! and the ingestion API both exchange wall-clock UTC instants without an
//! offset, so carrying a timezone through the domain types would only invite
//! accidental conversions. [`TimeProvider`] is the single seam through which
//! components observe "now", letting tests drive the import loop with a
//! [`MockProvider`].

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

use std::fmt::Debug;

use chrono::{Duration, NaiveDateTime, Timelike, Utc};
use parking_lot::Mutex;

/// A source of the current wall-clock time, in naive UTC.
pub trait TimeProvider: Debug + Send + Sync + 'static {
    /// Returns the current instant.
    fn now(&self) -> NaiveDateTime;
}

/// A [`TimeProvider`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProvider;

impl SystemProvider {
    /// Create a new system clock provider.
    pub fn new() -> Self {
        Self
    }
}

impl TimeProvider for SystemProvider {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// A [`TimeProvider`] returning a programmable instant, for tests.
#[derive(Debug)]
pub struct MockProvider {
    now: Mutex<NaiveDateTime>,
}

impl MockProvider {
    /// Create a provider frozen at `now`.
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Replace the frozen instant.
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock() = now;
    }

    /// Advance the frozen instant by `d`.
    pub fn inc(&self, d: Duration) {
        let mut now = self.now.lock();
        *now += d;
    }
}

impl TimeProvider for MockProvider {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock()
    }
}

/// Returns the start of the next whole UTC hour strictly after `dt`.
///
/// `2022-01-01 10:17:31` maps to `2022-01-01 11:00:00`, and a whole hour
/// `2022-01-01 10:00:00` maps to `2022-01-01 11:00:00` as well: the result is
/// always strictly greater than the input.
pub fn next_full_hour(dt: NaiveDateTime) -> NaiveDateTime {
    let truncated = dt
        .date()
        .and_hms_opt(dt.hour(), 0, 0)
        .expect("truncating to a whole hour always yields a valid time");
    truncated + Duration::hours(1)
}
