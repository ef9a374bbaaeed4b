//! Client contract for the upstream cloud-drive folder.
//!
//! The importer consumes the drive through the narrow [`CloudDriveClient`]
//! trait: list artifact descriptors bounded by modified date, and fetch one
//! artifact's content. Everything else about the drive (auth bootstrap,
//! pagination, API versions) stays behind the [`google`] implementation.
//!
//! Listing bounds are strict (`>` / `<`) and pushed to the remote, so only
//! matching artifacts travel. Listing order is NOT guaranteed; callers sort.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use data_types::SourceFileId;
use snafu::Snafu;

pub mod google;
pub mod mock;

/// Descriptor of one artifact in the drive folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// The drive's id for this artifact.
    pub id: SourceFileId,

    /// The artifact's file name.
    pub name: String,

    /// Size in bytes, as reported by the drive.
    pub size: u64,

    /// Last-modified instant, naive UTC.
    pub modified_date: NaiveDateTime,
}

/// Errors listing the folder.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum ListError {
    #[snafu(display("listing drive folder failed: {message}"))]
    Request { message: String },

    #[snafu(display("malformed drive listing entry: {message}"))]
    MalformedEntry { message: String },
}

/// Errors fetching one artifact's content.
///
/// Both variants are worth retrying a bounded number of times: the drive
/// intermittently serves `NotDownloadable` for artifacts that later download
/// fine.
#[derive(Debug, Clone, Snafu)]
#[allow(missing_docs)]
pub enum FetchError {
    #[snafu(display("transient drive error: {message}"))]
    Transient { message: String },

    #[snafu(display("drive reports artifact not downloadable: {message}"))]
    NotDownloadable { message: String },
}

/// A client for the drive folder holding the collection files.
#[async_trait]
pub trait CloudDriveClient: Debug + Send + Sync {
    /// List all artifacts with `modified_after < modified_date <
    /// modified_before` (either bound optional, both strict). The result is
    /// finite and fully materialized; order is unspecified.
    async fn list_by_modified_date(
        &self,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> Result<Vec<SourceFile>, ListError>;

    /// Fetch the content of one artifact as text.
    async fn fetch_content(&self, file: &SourceFile) -> Result<String, FetchError>;
}
