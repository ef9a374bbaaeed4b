//! An in-memory catalog backend for tests.

use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use data_types::{CollectionFile, CollectionFileId, CollectionFileParams, SourceFileId};
use parking_lot::Mutex;

use crate::interface::{
    Catalog, CollectionFileRepository, Error, Result, UnitOfWork,
};

#[derive(Debug, Default, Clone)]
struct MemState {
    files: Vec<CollectionFile>,
    next_id: i64,
}

/// An in-memory [`Catalog`].
///
/// Unit-of-work semantics are modeled by staging a copy of the shared state:
/// repository operations act on the copy, `commit` swaps it back in, and a
/// drop or `rollback` simply discards it.
#[derive(Debug, Default)]
pub struct MemCatalog {
    state: Arc<Mutex<MemState>>,
}

impl MemCatalog {
    /// Create an empty in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Display for MemCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "memory")
    }
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn unit_of_work(&self) -> Result<Box<dyn UnitOfWork>> {
        let staged = self.state.lock().clone();
        Ok(Box::new(MemUnitOfWork {
            shared: Arc::clone(&self.state),
            staged,
        }))
    }
}

#[derive(Debug)]
struct MemUnitOfWork {
    shared: Arc<Mutex<MemState>>,
    staged: MemState,
}

#[async_trait]
impl UnitOfWork for MemUnitOfWork {
    fn collection_files(&mut self) -> &mut dyn CollectionFileRepository {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.shared.lock() = self.staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl CollectionFileRepository for MemUnitOfWork {
    async fn create(&mut self, params: CollectionFileParams) -> Result<CollectionFile> {
        let collision = self.staged.files.iter().find(|f| {
            f.source_file_id == params.source_file_id
                || f.file_name == params.file_name
                || f.timestamp == params.timestamp
        });
        if let Some(existing) = collision {
            return Err(Error::AlreadyExists {
                description: format!(
                    "collection file colliding with '{}' exists",
                    existing.file_name
                ),
            });
        }

        self.staged.next_id += 1;
        let file = CollectionFile::from_params(params, CollectionFileId::new(self.staged.next_id));
        self.staged.files.push(file.clone());
        Ok(file)
    }

    async fn get_by_id(&mut self, id: CollectionFileId) -> Result<Option<CollectionFile>> {
        Ok(self
            .staged
            .files
            .iter()
            .find(|f| f.collection_file_id == id)
            .cloned())
    }

    async fn list_by_source_file_ids(
        &mut self,
        ids: &[SourceFileId],
    ) -> Result<Vec<CollectionFile>> {
        Ok(self
            .staged
            .files
            .iter()
            .filter(|f| ids.contains(&f.source_file_id))
            .cloned()
            .collect())
    }

    async fn latest_imported_source_modified_date(&mut self) -> Result<Option<NaiveDateTime>> {
        Ok(self
            .staged
            .files
            .iter()
            .filter(|f| f.imported == Some(true))
            .map(|f| f.source_modified_date)
            .max())
    }

    async fn save(&mut self, file: CollectionFile) -> Result<CollectionFile> {
        let id = file.collection_file_id;
        let existing = self
            .staged
            .files
            .iter_mut()
            .find(|f| f.collection_file_id == id)
            .ok_or(Error::NotFound { id })?;

        existing.imported = file.imported;
        existing.error = file.error;
        Ok(existing.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::NaiveDate;

    fn params(n: u32) -> CollectionFileParams {
        let timestamp = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(n, 0, 0)
            .unwrap();
        CollectionFileParams {
            source_file_id: SourceFileId::new(format!("source-{n}")),
            file_name: data_types::format_file_name(timestamp, data_types::Separator::Underscore),
            source_modified_date: timestamp + chrono::Duration::minutes(1),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_create_get_save() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let created = repo.create(params(0)).await.unwrap();
        assert_eq!(created.imported, None);
        assert_eq!(created.error, None);
        uow.commit().await.unwrap();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let mut fetched = repo
            .get_by_id(created.collection_file_id)
            .await
            .unwrap()
            .expect("row committed");
        assert_eq!(fetched, created);

        fetched.imported = Some(true);
        fetched.error = Some(false);
        let saved = repo.save(fetched).await.unwrap();
        assert_eq!(saved.imported, Some(true));
        uow.commit().await.unwrap();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let latest = uow
            .collection_files()
            .latest_imported_source_modified_date()
            .await
            .unwrap();
        assert_eq!(latest, Some(created.source_modified_date));
    }

    #[tokio::test]
    async fn test_create_enforces_uniqueness() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        repo.create(params(0)).await.unwrap();

        let err = repo.create(params(0)).await.unwrap_err();
        assert_matches!(err, Error::AlreadyExists { .. });
    }

    #[tokio::test]
    async fn test_uncommitted_unit_of_work_is_discarded() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let created = uow.collection_files().create(params(0)).await.unwrap();
        uow.rollback().await.unwrap();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let fetched = uow
            .collection_files()
            .get_by_id(created.collection_file_id)
            .await
            .unwrap();
        assert_eq!(fetched, None);
    }

    #[tokio::test]
    async fn test_list_by_source_file_ids() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let a = repo.create(params(0)).await.unwrap();
        let _b = repo.create(params(1)).await.unwrap();
        let c = repo.create(params(2)).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let listed = uow
            .collection_files()
            .list_by_source_file_ids(&[
                a.source_file_id.clone(),
                c.source_file_id.clone(),
                SourceFileId::new("source-unknown"),
            ])
            .await
            .unwrap();
        assert_eq!(listed, vec![a, c]);
    }

    #[tokio::test]
    async fn test_save_missing_row_is_not_found() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let mut file = repo.create(params(0)).await.unwrap();
        file.collection_file_id = CollectionFileId::new(4242);

        let err = repo.save(file).await.unwrap_err();
        assert_matches!(err, Error::NotFound { id } if id.get() == 4242);
    }

    #[tokio::test]
    async fn test_latest_imported_ignores_failed_rows() {
        let catalog = MemCatalog::new();

        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let mut failed = repo.create(params(5)).await.unwrap();
        failed.imported = Some(false);
        failed.error = Some(true);
        repo.save(failed).await.unwrap();

        let latest = repo.latest_imported_source_modified_date().await.unwrap();
        assert_eq!(latest, None);
    }
}
