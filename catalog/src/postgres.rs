//! A Postgres catalog backend over sqlx.

use std::fmt::Display;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use data_types::{CollectionFile, CollectionFileId, CollectionFileParams, SourceFileId};
use observability_deps::tracing::{debug, info};
use snafu::ResultExt;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;

use crate::interface::{
    Catalog, CollectionFileRepository, DatabaseSnafu, Error, Result, UnitOfWork,
};

/// Postgres error code raised on unique index violations.
const PG_UNIQUE_VIOLATION: &str = "23505";

/// Maximum number of pooled connections. The importer is effectively a
/// single writer, so the pool stays small.
const MAX_CONNECTIONS: u32 = 5;

/// Schema of the one table this system owns.
const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS collection_file (
    collection_file_id   BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
    source_file_id       TEXT NOT NULL,
    file_name            TEXT NOT NULL,
    source_modified_date TIMESTAMP NOT NULL,
    timestamp            TIMESTAMP NOT NULL,
    imported             BOOLEAN,
    error                BOOLEAN
)
"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS collection_file_source_file_id_idx \
     ON collection_file (source_file_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS collection_file_file_name_idx \
     ON collection_file (file_name)",
    "CREATE UNIQUE INDEX IF NOT EXISTS collection_file_timestamp_idx \
     ON collection_file (timestamp)",
];

/// A [`Catalog`] backed by Postgres.
#[derive(Debug)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    /// Connect to the catalog database at `dsn`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(dsn)
            .await
            .context(DatabaseSnafu)?;
        Ok(Self { pool })
    }

    /// Create the schema if it does not exist yet. With `reinitialize` set
    /// the table is dropped first, discarding all recorded state.
    pub async fn initialize(&self, reinitialize: bool) -> Result<()> {
        if reinitialize {
            info!("reinitializing catalog schema, dropping recorded state");
            sqlx::query("DROP TABLE IF EXISTS collection_file")
                .execute(&self.pool)
                .await
                .context(DatabaseSnafu)?;
        }

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context(DatabaseSnafu)?;
        }

        debug!("catalog schema up to date");
        Ok(())
    }
}

impl Display for PostgresCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "postgres")
    }
}

#[async_trait]
impl Catalog for PostgresCatalog {
    async fn unit_of_work(&self) -> Result<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.context(DatabaseSnafu)?;
        Ok(Box::new(PostgresUnitOfWork { tx }))
    }
}

/// A unit of work wrapping one Postgres transaction. Dropping it without
/// commit rolls the transaction back (sqlx behavior), matching the
/// [`UnitOfWork`] contract.
#[derive(Debug)]
struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    fn collection_files(&mut self) -> &mut dyn CollectionFileRepository {
        self
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context(DatabaseSnafu)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await.context(DatabaseSnafu)
    }
}

/// Map unique index violations onto [`Error::AlreadyExists`].
fn map_insert_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_UNIQUE_VIOLATION) => {
            Error::AlreadyExists {
                description: db.message().to_owned(),
            }
        }
        _ => Error::Database { source: e },
    }
}

#[async_trait]
impl CollectionFileRepository for PostgresUnitOfWork {
    async fn create(&mut self, params: CollectionFileParams) -> Result<CollectionFile> {
        sqlx::query_as::<_, CollectionFile>(
            r#"
INSERT INTO collection_file (source_file_id, file_name, source_modified_date, timestamp)
VALUES ($1, $2, $3, $4)
RETURNING collection_file_id, source_file_id, file_name, source_modified_date, timestamp,
          imported, error
"#,
        )
        .bind(&params.source_file_id)
        .bind(&params.file_name)
        .bind(params.source_modified_date)
        .bind(params.timestamp)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(map_insert_error)
    }

    async fn get_by_id(&mut self, id: CollectionFileId) -> Result<Option<CollectionFile>> {
        sqlx::query_as::<_, CollectionFile>(
            r#"
SELECT collection_file_id, source_file_id, file_name, source_modified_date, timestamp,
       imported, error
FROM collection_file
WHERE collection_file_id = $1
"#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await
        .context(DatabaseSnafu)
    }

    async fn list_by_source_file_ids(
        &mut self,
        ids: &[SourceFileId],
    ) -> Result<Vec<CollectionFile>> {
        let ids: Vec<String> = ids.iter().map(|id| id.as_str().to_owned()).collect();

        sqlx::query_as::<_, CollectionFile>(
            r#"
SELECT collection_file_id, source_file_id, file_name, source_modified_date, timestamp,
       imported, error
FROM collection_file
WHERE source_file_id = ANY($1)
ORDER BY collection_file_id
"#,
        )
        .bind(&ids)
        .fetch_all(&mut *self.tx)
        .await
        .context(DatabaseSnafu)
    }

    async fn latest_imported_source_modified_date(&mut self) -> Result<Option<NaiveDateTime>> {
        sqlx::query_scalar(
            r#"
SELECT MAX(source_modified_date)
FROM collection_file
WHERE imported IS TRUE
"#,
        )
        .fetch_one(&mut *self.tx)
        .await
        .context(DatabaseSnafu)
    }

    async fn save(&mut self, file: CollectionFile) -> Result<CollectionFile> {
        sqlx::query_as::<_, CollectionFile>(
            r#"
UPDATE collection_file
SET imported = $2, error = $3
WHERE collection_file_id = $1
RETURNING collection_file_id, source_file_id, file_name, source_modified_date, timestamp,
          imported, error
"#,
        )
        .bind(file.collection_file_id)
        .bind(file.imported)
        .bind(file.error)
        .fetch_optional(&mut *self.tx)
        .await
        .context(DatabaseSnafu)?
        .ok_or(Error::NotFound {
            id: file.collection_file_id,
        })
    }
}
