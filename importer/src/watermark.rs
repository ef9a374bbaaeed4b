//! Resume watermark resolution.

use catalog::Catalog;
use chrono::NaiveDateTime;
use clock::next_full_hour;
use observability_deps::tracing::debug;

/// Decide the `modified_after` cursor for the next listing call.
///
/// The upstream folder receives a new artifact at the top of each hour, so
/// advancing to the whole hour after the last successful import guarantees
/// the listing neither re-fetches that artifact nor skips a later one. A
/// user-supplied lower bound only ever tightens the cursor.
pub async fn resolve_cursor(
    catalog: &dyn Catalog,
    user_after: Option<NaiveDateTime>,
) -> Result<Option<NaiveDateTime>, catalog::Error> {
    let mut uow = catalog.unit_of_work().await?;
    let last_imported = uow
        .collection_files()
        .latest_imported_source_modified_date()
        .await?;
    uow.rollback().await?;

    let resumed = last_imported.map(next_full_hour);
    let cursor = match (user_after, resumed) {
        (Some(user), Some(resumed)) => Some(user.max(resumed)),
        (user, resumed) => user.or(resumed),
    };

    debug!(?last_imported, ?user_after, ?cursor, "resolved import cursor");
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog::mem::MemCatalog;
    use chrono::NaiveDate;
    use data_types::{CollectionFileParams, SourceFileId};

    fn datetime(d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    async fn insert(catalog: &MemCatalog, n: u32, modified: NaiveDateTime, imported: Option<bool>) {
        let timestamp = datetime(1, n, 0);
        let mut uow = catalog.unit_of_work().await.unwrap();
        let repo = uow.collection_files();
        let mut file = repo
            .create(CollectionFileParams {
                source_file_id: SourceFileId::new(format!("source-{n}")),
                file_name: data_types::format_file_name(
                    timestamp,
                    data_types::Separator::Underscore,
                ),
                source_modified_date: modified,
                timestamp,
            })
            .await
            .unwrap();
        if imported.is_some() {
            file.imported = imported;
            repo.save(file).await.unwrap();
        }
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_catalog_returns_user_bound() {
        let catalog = MemCatalog::new();

        assert_eq!(resolve_cursor(&catalog, None).await.unwrap(), None);
        assert_eq!(
            resolve_cursor(&catalog, Some(datetime(5, 0, 0))).await.unwrap(),
            Some(datetime(5, 0, 0)),
        );
    }

    #[tokio::test]
    async fn test_resumes_after_latest_imported_row() {
        let catalog = MemCatalog::new();
        insert(&catalog, 0, datetime(1, 0, 30), Some(true)).await;
        insert(&catalog, 1, datetime(1, 1, 30), Some(true)).await;

        // The next whole hour strictly after the latest import, advanced once.
        assert_eq!(
            resolve_cursor(&catalog, None).await.unwrap(),
            Some(datetime(1, 2, 0)),
        );
    }

    #[tokio::test]
    async fn test_failed_rows_do_not_advance_the_cursor() {
        let catalog = MemCatalog::new();
        insert(&catalog, 0, datetime(1, 0, 30), Some(true)).await;
        insert(&catalog, 1, datetime(1, 1, 30), Some(false)).await;

        assert_eq!(
            resolve_cursor(&catalog, None).await.unwrap(),
            Some(datetime(1, 1, 0)),
        );
    }

    #[tokio::test]
    async fn test_user_bound_combines_via_max() {
        let catalog = MemCatalog::new();
        insert(&catalog, 0, datetime(1, 0, 30), Some(true)).await;

        // Earlier user bound loses against the resume point.
        assert_eq!(
            resolve_cursor(&catalog, Some(datetime(1, 0, 0))).await.unwrap(),
            Some(datetime(1, 1, 0)),
        );

        // Later user bound wins.
        assert_eq!(
            resolve_cursor(&catalog, Some(datetime(3, 0, 0))).await.unwrap(),
            Some(datetime(3, 0, 0)),
        );
    }
}
