//! Building blocks for the importer's CLI, one clap block per external
//! collaborator. Binaries `#[clap(flatten)]` the blocks they need, keeping
//! flag names and env fallbacks consistent in one place.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

pub mod catalog_dsn;
pub mod cloud_drive;
pub mod importer;
pub mod ingest_api;
