//! Applies change records to the catalog.
//!
//! Single-writer discipline: this runs only on the cycle orchestrator's
//! task, between upload outcomes. Each change gets its own unit of work, so
//! a failed transaction never spans items.

use catalog::Catalog;
use data_types::CollectionFileChange;
use observability_deps::tracing::{debug, warn};

/// Apply one change record: load the row, set the carried fields, commit.
///
/// A database error rolls the unit of work back (dropping it suffices) and
/// is returned; it is fatal for this item only, the caller continues with
/// the next.
pub(crate) async fn apply_change(
    catalog: &dyn Catalog,
    change: &CollectionFileChange,
    item_no: usize,
) -> Result<(), catalog::Error> {
    let mut uow = catalog.unit_of_work().await?;
    let repo = uow.collection_files();

    let Some(mut file) = repo.get_by_id(change.collection_file_id).await? else {
        warn!(
            item_no,
            collection_file_id = %change.collection_file_id,
            "catalog row vanished, dropping change"
        );
        return uow.rollback().await;
    };

    if let Some(imported) = change.imported {
        file.imported = Some(imported);
    }
    if let Some(error) = change.error {
        file.error = Some(error);
    }

    repo.save(file).await?;
    uow.commit().await?;

    debug!(item_no, %change, "catalog row updated");
    Ok(())
}

/// [`apply_change`], with errors demoted to a warning so the upload loop can
/// move on to the next item.
pub(crate) async fn apply_change_logging_errors(
    catalog: &dyn Catalog,
    change: CollectionFileChange,
    item_no: usize,
) {
    if let Err(e) = apply_change(catalog, &change, item_no).await {
        warn!(item_no, %change, %e, "applying catalog change failed");
    }
}
