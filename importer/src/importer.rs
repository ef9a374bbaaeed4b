//! The cycle orchestrator and import loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use backoff::BackoffConfig;
use catalog::Catalog;
use chrono::NaiveDateTime;
use clock::{next_full_hour, TimeProvider};
use cloud_drive::{CloudDriveClient, ListError};
use observability_deps::tracing::{info, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::builder::{self, BuildError};
use crate::download::{DownloadConfig, DownloadPool};
use crate::upload::{self, CollectionUploader, UploadConfig};
use crate::watermark;

/// How long past the hour boundary the loop waits before starting a cycle,
/// giving the upstream publisher time to finish writing the new artifact.
const PAST_THE_HOUR_SLACK_SECS: i64 = 60;

/// Tuning of the import pipeline.
#[derive(Debug, Clone)]
pub struct ImporterConfig {
    /// Size of the parallel download worker pool.
    pub download_workers: usize,

    /// Deadline for one item's download. Exceeding it ends the cycle.
    pub download_timeout: Duration,

    /// Retry discipline for download fetch and write attempts.
    pub download_backoff: BackoffConfig,

    /// Retry discipline for upload attempts.
    pub upload_backoff: BackoffConfig,

    /// Directory downloaded payloads are staged in.
    pub download_dir: PathBuf,

    /// Keep local payload files after a successful upload.
    pub keep_local_files: bool,

    /// On a duplicate timestamp, replace the server-side collection instead
    /// of only skipping.
    pub update_existing_collections: bool,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            download_workers: 2,
            download_timeout: Duration::from_secs(60),
            download_backoff: BackoffConfig::default()
                .with_max_attempts(std::num::NonZeroUsize::new(3).unwrap()),
            upload_backoff: BackoffConfig::default()
                .with_max_attempts(std::num::NonZeroUsize::new(2).unwrap()),
            download_dir: PathBuf::from("./downloads"),
            keep_local_files: false,
            update_existing_collections: false,
        }
    }
}

/// Errors aborting a bulk cycle (and with it the import loop).
#[derive(Debug, Error)]
pub enum CycleError {
    /// Listing the drive folder failed.
    #[error("listing the drive folder failed: {source}")]
    List {
        /// The listing failure.
        source: ListError,
    },

    /// Building the cycle's work items failed; a
    /// [`BuildError::RowDescriptorMismatch`] in here is an internal
    /// invariant violation and must end the process.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// The download staging directory could not be created.
    #[error("could not create download directory '{}': {source}", path.display())]
    DownloadDir {
        /// The directory.
        path: PathBuf,
        /// The underlying failure.
        source: std::io::Error,
    },

    /// Resolving the resume watermark failed.
    #[error("catalog access failed: {0}")]
    Catalog(#[from] catalog::Error),
}

/// Drives bulk import cycles against the drive folder, the ingestion API and
/// the catalog.
///
/// All collaborators are injected; the importer itself holds no global
/// state. The cancellation token is process-wide: once set it stays set, and
/// every stage observes it at its suspension points.
#[derive(Debug)]
pub struct Importer {
    config: ImporterConfig,
    catalog: Arc<dyn Catalog>,
    drive: Arc<dyn CloudDriveClient>,
    uploader: Arc<dyn CollectionUploader>,
    time_provider: Arc<dyn TimeProvider>,
    cancel: CancellationToken,
}

impl Importer {
    /// Create an importer over the given collaborators.
    pub fn new(
        config: ImporterConfig,
        catalog: Arc<dyn Catalog>,
        drive: Arc<dyn CloudDriveClient>,
        uploader: Arc<dyn CollectionUploader>,
        time_provider: Arc<dyn TimeProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            catalog,
            drive,
            uploader,
            time_provider,
            cancel,
        }
    }

    /// Whether the ingestion API currently answers at all. Checked once at
    /// startup; a dead API means there is no point running cycles.
    pub async fn check_api_connection(&self) -> bool {
        match self.uploader.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(%e, "ingestion API is not reachable");
                false
            }
        }
    }

    /// Run bulk cycles until cancellation, an error, or (with `run_once`)
    /// the end of the first cycle.
    ///
    /// `modified_after` / `modified_before` bound the artifacts considered;
    /// the resume watermark from the catalog only ever tightens the lower
    /// bound.
    pub async fn run_import_loop(
        &self,
        run_once: bool,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> Result<(), CycleError> {
        let mut cursor = watermark::resolve_cursor(&*self.catalog, modified_after).await?;

        loop {
            if self.cancel.is_cancelled() {
                info!("import cancelled, exiting import loop");
                return Ok(());
            }

            if let (Some(cursor), Some(before)) = (cursor, modified_before) {
                if cursor >= before {
                    info!(%cursor, %before, "cursor reached upper bound, exiting import loop");
                    return Ok(());
                }
            }

            match cursor {
                // The artifact after the cursor is not due yet.
                Some(cursor) if next_full_hour(cursor) > self.time_provider.now() => {
                    self.wait_for_next_cycle().await;
                }
                _ => {
                    cursor = self.run_bulk_cycle(cursor, modified_before).await?;
                    cursor = cursor.map(next_full_hour);

                    if run_once {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Run one bulk cycle: discovery, parallel download, ordered upload,
    /// catalog updates.
    ///
    /// Returns the largest `source_modified_date` among items that reached a
    /// terminal outcome, or the input cursor when nothing was discovered (or
    /// nothing finished).
    pub async fn run_bulk_cycle(
        &self,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> Result<Option<NaiveDateTime>, CycleError> {
        let start = self.time_provider.now();
        let wall_clock = std::time::Instant::now();
        info!(%start, ?modified_after, ?modified_before, "bulk import cycle starting");

        let descriptors = self
            .drive
            .list_by_modified_date(modified_after, modified_before)
            .await
            .map_err(|source| CycleError::List { source })?;
        info!(file_count = descriptors.len(), "drive folder listed");

        if descriptors.is_empty() {
            info!("nothing to import");
            return Ok(modified_after);
        }

        tokio::fs::create_dir_all(&self.config.download_dir)
            .await
            .map_err(|source| CycleError::DownloadDir {
                path: self.config.download_dir.clone(),
                source,
            })?;

        let items = builder::build(
            descriptors,
            &*self.catalog,
            &self.config.download_dir,
            &self.cancel,
        )
        .await?;
        if items.is_empty() {
            return Ok(modified_after);
        }

        info!(
            item_count = items.len(),
            download_workers = self.config.download_workers,
            "work items created, downloading and uploading"
        );

        let pool = DownloadPool::spawn(
            &items,
            Arc::clone(&self.drive),
            Arc::clone(&self.time_provider),
            DownloadConfig {
                timeout: self.config.download_timeout,
                backoff: self.config.download_backoff.clone(),
            },
            self.config.download_workers,
            self.cancel.child_token(),
        );

        upload::upload_all(
            &items,
            &*self.uploader,
            &*self.catalog,
            &*self.time_provider,
            &UploadConfig {
                backoff: self.config.upload_backoff.clone(),
                keep_local_files: self.config.keep_local_files,
                update_existing_collections: self.config.update_existing_collections,
            },
            &self.cancel,
        )
        .await;

        pool.join().await;

        let done_count = items.iter().filter(|item| item.status.done()).count();
        let end = self.time_provider.now();
        info!(
            %end,
            item_count = items.len(),
            done_count,
            duration = ?wall_clock.elapsed(),
            "bulk import cycle finished"
        );

        Ok(items
            .iter()
            .filter(|item| item.status.done())
            .map(|item| item.source.modified_date)
            .max()
            .or(modified_after))
    }

    /// Sleep until shortly after the next hour boundary, or cancellation.
    async fn wait_for_next_cycle(&self) {
        let now = self.time_provider.now();
        let wait_until = next_full_hour(now) + chrono::Duration::seconds(PAST_THE_HOUR_SLACK_SECS);
        let wait_for = (wait_until - now).to_std().unwrap_or_default();

        info!(
            %wait_until,
            wait_secs = wait_for.as_secs(),
            "waiting for next import cycle"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(wait_for) => {}
        }
    }
}
