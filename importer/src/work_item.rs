//! The in-memory unit of pipeline work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use cloud_drive::SourceFile;
use data_types::{CollectionFile, CollectionFileId};
use tokio_util::sync::CancellationToken;

use crate::status::WorkItemStatus;

/// One artifact's worth of pipeline work within a single bulk cycle.
///
/// Work items are owned by the cycle orchestrator as a slice and shared with
/// the download pool as `Arc`s; they link to their catalog row by id only.
/// All references drop when the cycle ends.
#[derive(Debug)]
pub struct WorkItem {
    /// 1-based position within the cycle, in upload order.
    pub item_no: usize,

    /// The drive descriptor this item was built from.
    pub source: SourceFile,

    /// Id of the catalog row tracking this artifact.
    pub collection_file_id: CollectionFileId,

    /// Logical timestamp of the artifact.
    pub timestamp: NaiveDateTime,

    /// Absolute path the downloader writes the payload to.
    pub target_path: PathBuf,

    /// Pipeline status flags.
    pub status: WorkItemStatus,

    /// The process-wide cancellation handle.
    pub cancel: CancellationToken,
}

impl WorkItem {
    /// Build the work item for `source`, linked to catalog `row`, targeting
    /// `target_dir / file_name`. File names are globally unique, so distinct
    /// items never contend on a path.
    pub fn new(
        item_no: usize,
        source: SourceFile,
        row: &CollectionFile,
        target_dir: &Path,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let target_path = target_dir.join(&source.name);
        Arc::new(Self {
            item_no,
            source,
            collection_file_id: row.collection_file_id,
            timestamp: row.timestamp,
            target_path,
            status: WorkItemStatus::default(),
            cancel,
        })
    }
}
