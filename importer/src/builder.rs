//! Builds a cycle's ordered work items from listed drive descriptors.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use catalog::Catalog;
use chrono::NaiveDateTime;
use cloud_drive::SourceFile;
use data_types::{
    file_name_sort_key, parse_file_name, CollectionFileParams, SourceFileId,
};
use observability_deps::tracing::{debug, warn};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::work_item::WorkItem;

/// Errors building a cycle's work items.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Reconciling descriptors against the catalog failed; the cycle aborts.
    #[error("catalog access failed during discovery: {0}")]
    Catalog(#[from] catalog::Error),

    /// The set of listed descriptors and the set of reconciled catalog rows
    /// diverged. This is an internal invariant violation, not an input
    /// error; the process must not continue importing on top of it.
    #[error("descriptor/row reconciliation mismatch for source file id {source_file_id}")]
    RowDescriptorMismatch {
        /// The unmatched id.
        source_file_id: SourceFileId,
    },
}

/// Build one [`WorkItem`] per well-formed descriptor, numbered 1..N in
/// upload order, with a catalog row reconciled for each.
///
/// * Descriptors whose name fails the file-name grammar are rejected with a
///   warning; the cycle continues without them.
/// * Ordering is ascending by the separator-normalized file name, which
///   equals ascending logical timestamp.
/// * Missing catalog rows are inserted in ONE unit of work, committed once.
pub(crate) async fn build(
    descriptors: Vec<SourceFile>,
    catalog: &dyn Catalog,
    target_dir: &Path,
    cancel: &CancellationToken,
) -> Result<Vec<Arc<WorkItem>>, BuildError> {
    let mut candidates: Vec<(SourceFile, NaiveDateTime)> = Vec::with_capacity(descriptors.len());
    for descriptor in descriptors {
        match parse_file_name(&descriptor.name) {
            Ok(timestamp) => candidates.push((descriptor, timestamp)),
            Err(e) => {
                warn!(file_name = %descriptor.name, %e, "rejecting artifact with malformed name")
            }
        }
    }

    candidates.sort_by_key(|(descriptor, _)| file_name_sort_key(&descriptor.name));

    let mut rows = reconcile(&candidates, catalog).await?;

    let mut items = Vec::with_capacity(candidates.len());
    for (idx, (descriptor, _timestamp)) in candidates.into_iter().enumerate() {
        let row = rows
            .remove(&descriptor.id)
            .ok_or_else(|| BuildError::RowDescriptorMismatch {
                source_file_id: descriptor.id.clone(),
            })?;
        items.push(WorkItem::new(
            idx + 1,
            descriptor,
            &row,
            target_dir,
            cancel.clone(),
        ));
    }

    if let Some(orphan) = rows.into_keys().next() {
        return Err(BuildError::RowDescriptorMismatch {
            source_file_id: orphan,
        });
    }

    debug!(item_count = items.len(), "work items built");
    Ok(items)
}

/// Fetch the catalog rows for all candidates, inserting rows for descriptors
/// never seen before, in one committed unit of work.
async fn reconcile(
    candidates: &[(SourceFile, NaiveDateTime)],
    catalog: &dyn Catalog,
) -> Result<HashMap<SourceFileId, data_types::CollectionFile>, BuildError> {
    let ids: Vec<SourceFileId> = candidates
        .iter()
        .map(|(descriptor, _)| descriptor.id.clone())
        .collect();

    let mut uow = catalog.unit_of_work().await?;
    let repo = uow.collection_files();

    let existing = repo.list_by_source_file_ids(&ids).await?;
    let mut rows: HashMap<SourceFileId, _> = existing
        .into_iter()
        .map(|row| (row.source_file_id.clone(), row))
        .collect();

    let mut inserted = 0;
    for (descriptor, timestamp) in candidates {
        if rows.contains_key(&descriptor.id) {
            continue;
        }
        let created = repo
            .create(CollectionFileParams {
                source_file_id: descriptor.id.clone(),
                file_name: descriptor.name.clone(),
                source_modified_date: descriptor.modified_date,
                timestamp: *timestamp,
            })
            .await?;
        rows.insert(created.source_file_id.clone(), created);
        inserted += 1;
    }

    uow.commit().await?;
    debug!(
        row_count = rows.len(),
        inserted, "catalog rows reconciled with drive listing"
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::mem::MemCatalog;
    use chrono::NaiveDate;
    use data_types::Separator;

    fn descriptor(n: u32, separator: Separator) -> SourceFile {
        let timestamp = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(n, 0, 0)
            .unwrap();
        SourceFile {
            id: SourceFileId::new(format!("source-{n}")),
            name: data_types::format_file_name(timestamp, separator),
            size: 2,
            modified_date: timestamp + chrono::Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn test_builds_numbered_items_in_timestamp_order() {
        let catalog = MemCatalog::new();
        let target_dir = Path::new("/tmp/collections");

        // Listed out of order, with mixed separators.
        let descriptors = vec![
            descriptor(2, Separator::Underscore),
            descriptor(0, Separator::Hyphen),
            descriptor(1, Separator::Underscore),
        ];

        let items = build(descriptors, &catalog, target_dir, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(
            items.iter().map(|i| i.item_no).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        let timestamps: Vec<_> = items.iter().map(|i| i.timestamp).collect();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);

        assert_eq!(
            items[0].target_path,
            target_dir.join(&items[0].source.name)
        );
        assert!(!items[0].status.downloaded());
    }

    #[tokio::test]
    async fn test_inserts_only_unseen_descriptors() {
        let catalog = MemCatalog::new();
        let cancel = CancellationToken::new();

        let first = build(
            vec![descriptor(0, Separator::Underscore)],
            &catalog,
            Path::new("/tmp"),
            &cancel,
        )
        .await
        .unwrap();

        let second = build(
            vec![
                descriptor(0, Separator::Underscore),
                descriptor(1, Separator::Underscore),
            ],
            &catalog,
            Path::new("/tmp"),
            &cancel,
        )
        .await
        .unwrap();

        // The row for the already-seen descriptor is reused.
        assert_eq!(second[0].collection_file_id, first[0].collection_file_id);
        assert_ne!(second[1].collection_file_id, first[0].collection_file_id);
    }

    #[tokio::test]
    async fn test_rejects_malformed_names_and_continues() {
        let catalog = MemCatalog::new();

        let mut bad = descriptor(0, Separator::Underscore);
        bad.name = "not-a-collection-file.json".to_owned();
        bad.id = SourceFileId::new("source-bad");

        let items = build(
            vec![bad, descriptor(1, Separator::Underscore)],
            &catalog,
            Path::new("/tmp"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].source.id, SourceFileId::new("source-1"));
        assert_eq!(items[0].item_no, 1);
    }

    #[tokio::test]
    async fn test_duplicate_descriptor_is_an_invariant_violation() {
        let catalog = MemCatalog::new();

        let items = build(
            vec![
                descriptor(0, Separator::Underscore),
                descriptor(0, Separator::Underscore),
            ],
            &catalog,
            Path::new("/tmp"),
            &CancellationToken::new(),
        )
        .await;

        assert_matches::assert_matches!(items, Err(BuildError::RowDescriptorMismatch { .. }));
    }
}
