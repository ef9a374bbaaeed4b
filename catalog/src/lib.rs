//! The durable catalog of observed collection files.
//!
//! One table, one entity: a [`CollectionFile`](data_types::CollectionFile)
//! row per artifact ever listed in the upstream folder. All access goes
//! through a short-lived [`UnitOfWork`](interface::UnitOfWork) so that a
//! cycle's discovery insert and each per-item flag change commit (or roll
//! back) as a whole.
//!
//! Two implementations: [`MemCatalog`](mem::MemCatalog) backs tests,
//! [`PostgresCatalog`](postgres::PostgresCatalog) backs production.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

pub mod interface;
pub mod mem;
pub mod postgres;

pub use interface::{Catalog, CollectionFileRepository, Error, Result, UnitOfWork};
