//! The concurrent collection import pipeline.
//!
//! One bulk cycle moves every newly modified artifact from the upstream
//! cloud-drive folder into the ingestion API, recording per-artifact
//! lifecycle in the catalog:
//!
//! ```text
//!  [Discovery]   resolve watermark, list folder, reconcile catalog,
//!      │         build ordered work items
//!      ▼
//!  [Download]    bounded pool of P workers, parallel,
//!      │         per-item timeout
//!      ▼
//!  [Upload]      single consumer, strictly sequential in item order
//!      │
//!      ▼
//!  [Catalog]     change records applied through a unit of work
//! ```
//!
//! The [`Importer`] owns one OS-level task per cycle that drives the upload
//! loop and the catalog writer; downloads run on a pool of `P` tokio tasks.
//! There is no other concurrency, and no unbounded queue: a cycle's memory is
//! O(N) work items plus the O(P) payloads in flight on disk.
//!
//! Ordering is the heart of the design. The ingestion API rejects duplicate
//! logical timestamps, so uploads happen strictly in ascending item order and
//! a rejected duplicate is recorded as success; together these make a cycle
//! idempotent and give the resume watermark its monotonicity.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

mod builder;
mod catalog_writer;
mod download;
mod importer;
mod status;
pub mod upload;
mod watermark;
mod work_item;

pub use crate::builder::BuildError;
pub use crate::importer::{CycleError, Importer, ImporterConfig};
pub use crate::status::WorkItemStatus;
pub use crate::upload::CollectionUploader;
pub use crate::watermark::resolve_cursor;
pub use crate::work_item::WorkItem;
