//! The ordered upload stage.
//!
//! A single consumer walks the cycle's work items in ascending item order,
//! waiting for each to reach a terminal download state before acting. This
//! is the serialization point of the pipeline: the ingestion API rejects
//! duplicate logical timestamps, and uploading in timestamp order keeps that
//! rejection unambiguous and the resume watermark monotonic.

use std::fmt::Debug;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{Backoff, BackoffConfig, BackoffError};
use catalog::Catalog;
use chrono::NaiveDateTime;
use clock::TimeProvider;
use data_types::CollectionFileChange;
use ingest_api_client::{CollectionMetadata, RequestError};
use observability_deps::tracing::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::catalog_writer::apply_change_logging_errors;
use crate::work_item::WorkItem;

pub mod mock;

/// How often the upload loop re-checks the head item's download state.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The ingestion API operations the upload stage consumes.
///
/// [`ingest_api_client::Client`] is the production implementation; tests
/// substitute [`mock::MockUploader`].
#[async_trait]
pub trait CollectionUploader: Debug + Send + Sync {
    /// Check that the API answers at all.
    async fn ping(&self) -> Result<(), RequestError>;

    /// Upload a new collection from the JSON file at `path`.
    async fn upload_collection(&self, path: &Path) -> Result<CollectionMetadata, RequestError>;

    /// Replace the contents of the existing collection `collection_id`.
    async fn update_collection(
        &self,
        collection_id: i64,
        path: &Path,
    ) -> Result<CollectionMetadata, RequestError>;

    /// Fetch the metadata of the collection holding `timestamp`, if any.
    async fn collection_by_timestamp(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<Option<CollectionMetadata>, RequestError>;
}

#[async_trait]
impl CollectionUploader for ingest_api_client::Client {
    async fn ping(&self) -> Result<(), RequestError> {
        self.ping().await
    }

    async fn upload_collection(&self, path: &Path) -> Result<CollectionMetadata, RequestError> {
        self.upload_collection(path).await
    }

    async fn update_collection(
        &self,
        collection_id: i64,
        path: &Path,
    ) -> Result<CollectionMetadata, RequestError> {
        self.update_collection(collection_id, path).await
    }

    async fn collection_by_timestamp(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<Option<CollectionMetadata>, RequestError> {
        self.collection_by_timestamp(timestamp).await
    }
}

/// Tuning of the upload stage.
#[derive(Debug, Clone)]
pub(crate) struct UploadConfig {
    /// Retry discipline for upload attempts.
    pub(crate) backoff: BackoffConfig,

    /// Keep local payload files after a successful upload.
    pub(crate) keep_local_files: bool,

    /// On a duplicate timestamp, replace the server-side collection instead
    /// of only skipping.
    pub(crate) update_existing_collections: bool,
}

/// Consume all items in order, driving the catalog writer with the outcome
/// of each.
///
/// Ends early when a download timed out (the pool is tearing down; every
/// unprocessed item's row is marked errored so the cycle's record is
/// complete) or when cancellation fires at an item boundary (rows are left
/// as they are; the next run picks the items up again).
pub(crate) async fn upload_all(
    items: &[std::sync::Arc<WorkItem>],
    uploader: &dyn CollectionUploader,
    catalog: &dyn Catalog,
    time_provider: &dyn TimeProvider,
    config: &UploadConfig,
    cancel: &CancellationToken,
) {
    let mut sweep_from = None;

    for (idx, item) in items.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("cancellation requested, stopping uploads at item boundary");
            break;
        }

        if !wait_for_download(item, cancel).await {
            info!(
                item_no = item.item_no,
                "cancellation requested while waiting for download"
            );
            break;
        }

        if item.status.download_timed_out() {
            warn!(
                item_no = item.item_no,
                "download timed out, ending cycle early"
            );
            sweep_from = Some(idx);
            break;
        }

        if item.status.download_error() {
            apply_change_logging_errors(
                catalog,
                CollectionFileChange {
                    collection_file_id: item.collection_file_id,
                    imported: None,
                    error: Some(true),
                },
                item.item_no,
            )
            .await;
            continue;
        }

        upload_one(item, uploader, catalog, time_provider, config).await;
    }

    if let Some(idx) = sweep_from {
        for item in &items[idx..] {
            apply_change_logging_errors(
                catalog,
                CollectionFileChange {
                    collection_file_id: item.collection_file_id,
                    imported: None,
                    error: Some(true),
                },
                item.item_no,
            )
            .await;
        }
    }
}

/// Wait until `item` reaches a terminal download state. Returns `false` when
/// cancellation fired first.
async fn wait_for_download(item: &WorkItem, cancel: &CancellationToken) -> bool {
    loop {
        if item.status.downloaded()
            || item.status.download_error()
            || item.status.download_timed_out()
        {
            return true;
        }
        if cancel.is_cancelled() {
            return false;
        }
        tokio::time::sleep(READY_POLL_INTERVAL).await;
    }
}

enum UploadOutcome {
    /// The server accepted the collection.
    Imported(CollectionMetadata),
    /// The server already held this timestamp; equivalent to success.
    AlreadyPresent,
    /// The local payload is unusable; nothing was sent.
    Unusable(&'static str),
    /// All attempts failed.
    Failed(BackoffError<RequestError>),
}

/// Upload one downloaded item and record the outcome on its catalog row.
async fn upload_one(
    item: &WorkItem,
    uploader: &dyn CollectionUploader,
    catalog: &dyn Catalog,
    time_provider: &dyn TimeProvider,
    config: &UploadConfig,
) {
    debug!(
        item_no = item.item_no,
        path = %item.target_path.display(),
        "importing collection file"
    );

    let change = match try_upload(item, uploader, config).await {
        UploadOutcome::Imported(metadata) => {
            info!(
                item_no = item.item_no,
                collection_id = metadata.collection_id,
                "collection imported"
            );
            finish_success(item, time_provider, config).await
        }
        UploadOutcome::AlreadyPresent => {
            info!(
                item_no = item.item_no,
                timestamp = %item.timestamp,
                "server already holds this timestamp, recording as imported"
            );
            if config.update_existing_collections {
                update_existing(item, uploader, config).await;
            }
            finish_success(item, time_provider, config).await
        }
        UploadOutcome::Unusable(reason) => {
            warn!(item_no = item.item_no, reason, "skipping unusable local file");
            item.status.set_import_error();
            CollectionFileChange {
                collection_file_id: item.collection_file_id,
                imported: Some(false),
                error: Some(true),
            }
        }
        UploadOutcome::Failed(e) => {
            warn!(item_no = item.item_no, %e, "import failed");
            item.status.set_import_error();
            CollectionFileChange {
                collection_file_id: item.collection_file_id,
                imported: Some(false),
                error: Some(true),
            }
        }
    };

    apply_change_logging_errors(catalog, change, item.item_no).await;
}

/// Mark the item imported and drop the local payload unless configured to
/// keep it.
async fn finish_success(
    item: &WorkItem,
    time_provider: &dyn TimeProvider,
    config: &UploadConfig,
) -> CollectionFileChange {
    item.status.set_imported(time_provider.now());

    if !config.keep_local_files {
        let _ = tokio::fs::remove_file(&item.target_path).await;
    }

    CollectionFileChange {
        collection_file_id: item.collection_file_id,
        imported: Some(true),
        error: Some(false),
    }
}

async fn try_upload(
    item: &WorkItem,
    uploader: &dyn CollectionUploader,
    config: &UploadConfig,
) -> UploadOutcome {
    match local_payload_state(&item.target_path).await {
        PayloadState::Usable => {}
        PayloadState::Missing => return UploadOutcome::Unusable("local file missing"),
        PayloadState::Empty => {
            return UploadOutcome::Unusable("local file holds an empty JSON value")
        }
    }

    enum Accepted {
        Imported(CollectionMetadata),
        AlreadyPresent,
    }

    let attempt = || async move {
        match uploader.upload_collection(&item.target_path).await {
            Ok(metadata) => Ok(Accepted::Imported(metadata)),
            Err(RequestError::NonUniqueTimestamp) => Ok(Accepted::AlreadyPresent),
            Err(e) => Err(e),
        }
    };

    match Backoff::new(&config.backoff)
        .retry_all_errors("upload collection", attempt)
        .await
    {
        Ok(Accepted::Imported(metadata)) => UploadOutcome::Imported(metadata),
        Ok(Accepted::AlreadyPresent) => UploadOutcome::AlreadyPresent,
        Err(e) => UploadOutcome::Failed(e),
    }
}

/// Replace the server-side collection holding this item's timestamp.
///
/// Best effort: whatever happens here, the existing server-side record stays
/// valid, so failures only log.
async fn update_existing(item: &WorkItem, uploader: &dyn CollectionUploader, config: &UploadConfig) {
    let existing = match uploader.collection_by_timestamp(item.timestamp).await {
        Ok(Some(metadata)) => metadata,
        Ok(None) => {
            warn!(
                item_no = item.item_no,
                timestamp = %item.timestamp,
                "timestamp reported as taken but no collection found, skipping update"
            );
            return;
        }
        Err(e) => {
            warn!(item_no = item.item_no, %e, "collection lookup failed, skipping update");
            return;
        }
    };

    let collection_id = existing.collection_id;
    let attempt = || async move {
        uploader
            .update_collection(collection_id, &item.target_path)
            .await
    };

    match Backoff::new(&config.backoff)
        .retry_if("update collection", attempt, |e| {
            !matches!(e, RequestError::Conflict)
        })
        .await
    {
        Ok(metadata) => {
            info!(
                item_no = item.item_no,
                collection_id = metadata.collection_id,
                "existing collection updated"
            );
        }
        Err(BackoffError {
            source: RequestError::Conflict,
            ..
        }) => {
            info!(
                item_no = item.item_no,
                collection_id = existing.collection_id,
                "concurrent update of existing collection, skipping"
            );
        }
        Err(e) => {
            warn!(
                item_no = item.item_no,
                %e,
                "updating existing collection failed, keeping server-side record"
            );
        }
    }
}

enum PayloadState {
    Usable,
    Missing,
    Empty,
}

/// A payload is usable when it exists and parses to a non-empty JSON value.
async fn local_payload_state(path: &Path) -> PayloadState {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(_) => return PayloadState::Missing,
    };

    match serde_json::from_str::<serde_json::Value>(&contents) {
        Err(_) => PayloadState::Empty,
        Ok(value) => {
            let empty = match &value {
                serde_json::Value::Null => true,
                serde_json::Value::Object(map) => map.is_empty(),
                serde_json::Value::Array(values) => values.is_empty(),
                serde_json::Value::String(s) => s.is_empty(),
                _ => false,
            };
            if empty {
                PayloadState::Empty
            } else {
                PayloadState::Usable
            }
        }
    }
}
