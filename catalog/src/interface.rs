//! Traits implemented by every catalog backend.

use std::fmt::{Debug, Display};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use data_types::{CollectionFile, CollectionFileId, CollectionFileParams, SourceFileId};
use snafu::Snafu;

/// Catalog errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("unique constraint violated: {description}"))]
    AlreadyExists { description: String },

    #[snafu(display("collection file {id} not found"))]
    NotFound { id: CollectionFileId },

    #[snafu(display("database error: {source}"))]
    Database { source: sqlx::Error },
}

/// Result alias for catalog operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A catalog backend.
///
/// A catalog only hands out [`UnitOfWork`] instances; every read and write
/// happens inside one.
#[async_trait]
pub trait Catalog: Debug + Display + Send + Sync {
    /// Begin a new unit of work.
    async fn unit_of_work(&self) -> Result<Box<dyn UnitOfWork>>;
}

/// A short-lived transactional boundary over the catalog.
///
/// Dropping a unit of work without calling [`commit`](Self::commit) discards
/// its staged changes, so an early return on error never leaves a partial
/// write behind.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Access the collection file repository bound to this unit of work.
    fn collection_files(&mut self) -> &mut dyn CollectionFileRepository;

    /// Persist all staged changes.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Explicitly discard all staged changes.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Operations over [`CollectionFile`] rows.
#[async_trait]
pub trait CollectionFileRepository: Send {
    /// Insert a new row, assigning its id. Fails with
    /// [`Error::AlreadyExists`] when `source_file_id`, `file_name` or
    /// `timestamp` collide with an existing row.
    async fn create(&mut self, params: CollectionFileParams) -> Result<CollectionFile>;

    /// Fetch a row by id.
    async fn get_by_id(&mut self, id: CollectionFileId) -> Result<Option<CollectionFile>>;

    /// Fetch all rows whose `source_file_id` is in `ids`.
    async fn list_by_source_file_ids(
        &mut self,
        ids: &[SourceFileId],
    ) -> Result<Vec<CollectionFile>>;

    /// The largest `source_modified_date` among successfully imported rows,
    /// if any row was ever imported. This is the basis of the resume
    /// watermark.
    async fn latest_imported_source_modified_date(&mut self) -> Result<Option<NaiveDateTime>>;

    /// Persist the mutable lifecycle columns (`imported`, `error`) of an
    /// existing row.
    async fn save(&mut self, file: CollectionFile) -> Result<CollectionFile>;
}
