//! Catalog DSN configuration.

use catalog::postgres::PostgresCatalog;
use snafu::{ResultExt, Snafu};

/// Errors constructing a catalog from CLI configuration.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("a catalog DSN is required (--catalog-dsn / DATABASE_URL)"))]
    DsnMissing,

    #[snafu(display("catalog connection failed: {source}"))]
    Connect { source: catalog::Error },

    #[snafu(display("catalog schema setup failed: {source}"))]
    Setup { source: catalog::Error },
}

/// CLI config for the catalog database.
#[derive(Debug, Clone, clap::Parser)]
pub struct CatalogDsnConfig {
    /// Postgres connection string of the catalog database.
    #[clap(long = "catalog-dsn", env = "DATABASE_URL", action)]
    pub dsn: Option<String>,

    /// Drop and recreate the catalog schema on startup, discarding all
    /// recorded import state.
    #[clap(
        long = "reinitialize-database",
        env = "REINITIALIZE_DATABASE",
        default_value = "false",
        action
    )]
    pub reinitialize_database: bool,
}

impl CatalogDsnConfig {
    /// Connect to the configured catalog and bring its schema up.
    pub async fn get_catalog(&self) -> Result<PostgresCatalog, Error> {
        let dsn = self.dsn.as_deref().ok_or(Error::DsnMissing)?;

        let catalog = PostgresCatalog::connect(dsn).await.context(ConnectSnafu)?;
        catalog
            .initialize(self.reinitialize_database)
            .await
            .context(SetupSnafu)?;
        Ok(catalog)
    }
}
