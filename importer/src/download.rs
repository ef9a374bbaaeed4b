//! The parallel download stage.
//!
//! A bounded pool of worker tasks drains a per-cycle queue of work items,
//! fetching each artifact's content and persisting it to the item's target
//! path. Completions may land in any order; the upload stage re-serializes.
//!
//! A single download exceeding its deadline tears the whole pool down. The
//! drive client has been observed to hang indefinitely, and because the
//! ordered upload stage blocks on the head item, one hung fetch would starve
//! the pipeline forever; ending the cycle lets the next one resume from the
//! watermark instead.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use backoff::{Backoff, BackoffConfig, BackoffError};
use clock::TimeProvider;
use cloud_drive::{CloudDriveClient, FetchError};
use observability_deps::tracing::{debug, warn};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::work_item::WorkItem;

/// Tuning of the download stage.
#[derive(Debug, Clone)]
pub(crate) struct DownloadConfig {
    /// Deadline for one item's download, fetch and disk write included.
    pub(crate) timeout: Duration,

    /// Retry discipline for fetch and write attempts.
    pub(crate) backoff: BackoffConfig,
}

/// Why one download attempt sequence ended without a payload on disk.
#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    #[error("fetching '{file_name}' failed after {attempts} attempt(s): {source}")]
    Fetch {
        file_name: String,
        attempts: usize,
        source: FetchError,
    },

    #[error("downloaded file '{file_name}' was empty")]
    EmptyPayload { file_name: String },

    #[error("writing '{file_name}' failed after {attempts} attempt(s): {source}")]
    Write {
        file_name: String,
        attempts: usize,
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,
}

/// The running download worker pool of one bulk cycle.
#[derive(Debug)]
pub(crate) struct DownloadPool {
    handles: Vec<JoinHandle<()>>,
}

impl DownloadPool {
    /// Spawn `workers` download tasks over `items`.
    ///
    /// Items are queued in input order; the pool size is the only
    /// parallelism bound. Cancelling `pool_cancel` (or any parent of it)
    /// makes every worker stop picking up new items.
    pub(crate) fn spawn(
        items: &[Arc<WorkItem>],
        client: Arc<dyn CloudDriveClient>,
        time_provider: Arc<dyn TimeProvider>,
        config: DownloadConfig,
        workers: usize,
        pool_cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = async_channel::bounded(items.len().max(1));
        for item in items {
            tx.try_send(Arc::clone(item))
                .expect("queue is sized to hold every item");
        }
        // Close the queue; workers exit once it drains.
        drop(tx);

        debug!(workers, item_count = items.len(), "download pool starting");

        let handles = (0..workers)
            .map(|_| {
                tokio::spawn(run_worker(
                    rx.clone(),
                    Arc::clone(&client),
                    Arc::clone(&time_provider),
                    config.clone(),
                    pool_cancel.clone(),
                ))
            })
            .collect();

        Self { handles }
    }

    /// Wait for every worker to exit.
    pub(crate) async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(%e, "download worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    queue: async_channel::Receiver<Arc<WorkItem>>,
    client: Arc<dyn CloudDriveClient>,
    time_provider: Arc<dyn TimeProvider>,
    config: DownloadConfig,
    pool_cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            // Check the shutdown signal ahead of new work.
            biased;

            _ = pool_cancel.cancelled() => break,
            recv = queue.recv() => match recv {
                Ok(item) => item,
                // Queue drained and closed.
                Err(async_channel::RecvError) => break,
            },
        };

        match tokio::time::timeout(config.timeout, download_one(&item, &*client, &config)).await {
            Ok(Ok(())) => {
                item.status.set_downloaded(time_provider.now());
                debug!(
                    item_no = item.item_no,
                    file_name = %item.source.name,
                    "artifact downloaded"
                );
            }
            Ok(Err(DownloadError::Cancelled)) => {
                debug!(item_no = item.item_no, "download cancelled");
            }
            Ok(Err(e)) => {
                warn!(item_no = item.item_no, %e, "download failed");
                item.status.set_download_error();
            }
            Err(_elapsed) => {
                warn!(
                    item_no = item.item_no,
                    timeout = ?config.timeout,
                    "download timed out, shutting the pool down"
                );
                item.status.set_download_timed_out();
                pool_cancel.cancel();
                break;
            }
        }
    }
}

/// Download one item's payload to its target path.
async fn download_one(
    item: &WorkItem,
    client: &dyn CloudDriveClient,
    config: &DownloadConfig,
) -> Result<(), DownloadError> {
    if already_downloaded(item).await {
        debug!(
            item_no = item.item_no,
            path = %item.target_path.display(),
            "matching local copy exists, skipping fetch"
        );
        return Ok(());
    }

    let content = fetch_with_retry(item, client, config).await?;
    if content.is_empty() {
        return Err(DownloadError::EmptyPayload {
            file_name: item.source.name.clone(),
        });
    }

    write_with_retry(item, &content, config).await
}

/// A local file of exactly the advertised size counts as already downloaded;
/// any other local file is stale and removed.
async fn already_downloaded(item: &WorkItem) -> bool {
    match tokio::fs::metadata(&item.target_path).await {
        Ok(metadata) if metadata.len() == item.source.size => true,
        Ok(_) => {
            debug!(item_no = item.item_no, "deleting stale local copy");
            let _ = tokio::fs::remove_file(&item.target_path).await;
            false
        }
        Err(_) => false,
    }
}

#[derive(Debug, Error)]
enum FetchAttemptError {
    #[error(transparent)]
    Drive(#[from] FetchError),

    #[error("cancelled")]
    Cancelled,
}

async fn fetch_with_retry(
    item: &WorkItem,
    client: &dyn CloudDriveClient,
    config: &DownloadConfig,
) -> Result<String, DownloadError> {
    let attempt = || async move {
        if item.cancel.is_cancelled() {
            return Err(FetchAttemptError::Cancelled);
        }
        debug!(
            item_no = item.item_no,
            file_name = %item.source.name,
            "fetching artifact content"
        );
        client
            .fetch_content(&item.source)
            .await
            .map_err(FetchAttemptError::from)
    };

    Backoff::new(&config.backoff)
        .retry_if("fetch artifact content", attempt, |e| {
            matches!(e, FetchAttemptError::Drive(_))
        })
        .await
        .map_err(|e| match e {
            BackoffError {
                source: FetchAttemptError::Cancelled,
                ..
            } => DownloadError::Cancelled,
            BackoffError {
                attempts,
                source: FetchAttemptError::Drive(source),
                ..
            } => DownloadError::Fetch {
                file_name: item.source.name.clone(),
                attempts,
                source,
            },
        })
}

#[derive(Debug, Error)]
enum WriteAttemptError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,
}

async fn write_with_retry(
    item: &WorkItem,
    content: &str,
    config: &DownloadConfig,
) -> Result<(), DownloadError> {
    let attempt = || async move {
        if item.cancel.is_cancelled() {
            return Err(WriteAttemptError::Cancelled);
        }
        write_atomic(&item.target_path, content)
            .await
            .map_err(WriteAttemptError::from)
    };

    Backoff::new(&config.backoff)
        .retry_if("write artifact to disk", attempt, |e| {
            matches!(e, WriteAttemptError::Io(_))
        })
        .await
        .map(|()| {
            debug!(
                item_no = item.item_no,
                path = %item.target_path.display(),
                "artifact written"
            );
        })
        .map_err(|e| match e {
            BackoffError {
                source: WriteAttemptError::Cancelled,
                ..
            } => DownloadError::Cancelled,
            BackoffError {
                attempts,
                source: WriteAttemptError::Io(source),
                ..
            } => DownloadError::Write {
                file_name: item.source.name.clone(),
                attempts,
                source,
            },
        })
}

/// Write-then-rename so readers never observe a partial payload, and an
/// aborted write never corrupts an existing good copy.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("part");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await
}
