//! This crate exists to coordinate versions of the observability ecosystem
//! used by the rest of the workspace, so that they are all upgraded in one
//! place and stay compatible with each other.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(missing_docs)]

// Export the observability dependencies.
pub use tracing;
