//! Entrypoint of the collection importer.
//!
//! Wires configuration, the catalog, the drive client and the ingestion API
//! client into an [`Importer`] and runs its import loop until it finishes or
//! SIGINT asks it to stop.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(clippy::todo, clippy::dbg_macro, clippy::clone_on_ref_ptr)]

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use observability_deps::tracing::{error, info};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use clap_blocks::{
    catalog_dsn::CatalogDsnConfig, cloud_drive::CloudDriveConfig, importer::ImporterRunConfig,
    ingest_api::IngestApiConfig,
};
use cloud_drive::google::GoogleDriveClient;
use importer::Importer;

/// The process was cancelled by the user (SIGINT) or failed.
const EXIT_FAILURE: u8 = 1;

/// The ingestion API was unreachable at startup; no cycle was run.
const EXIT_API_UNREACHABLE: u8 = 2;

#[derive(Debug, Parser)]
#[clap(
    name = "collection_importer",
    about = "Mirrors timestamped collection files from a cloud-drive folder into the ingestion API",
    version
)]
struct Args {
    #[clap(flatten)]
    catalog_dsn: CatalogDsnConfig,

    #[clap(flatten)]
    cloud_drive: CloudDriveConfig,

    #[clap(flatten)]
    ingest_api: IngestApiConfig,

    #[clap(flatten)]
    run: ImporterRunConfig,

    /// Tracing filter, e.g. "info" or "importer=debug,info".
    #[clap(long = "log-filter", env = "LOG_FILTER", default_value = "info", action)]
    log_filter: String,
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&args.log_filter))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(%e, "could not start tokio runtime");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        api_url = %args.ingest_api.url,
        drive_folder_id = %args.cloud_drive.folder_id,
        download_dir = %args.run.download_dir.display(),
        download_workers = %args.run.download_workers,
        "collection importer starting"
    );

    let catalog = match args.catalog_dsn.get_catalog().await {
        Ok(catalog) => Arc::new(catalog) as Arc<dyn catalog::Catalog>,
        Err(e) => {
            error!(%e, "catalog setup failed");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let drive = Arc::new(GoogleDriveClient::new(
        args.cloud_drive.folder_id.clone(),
        args.cloud_drive.access_token.clone(),
    ));
    let api_client = Arc::new(args.ingest_api.client());

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let importer = Importer::new(
        args.run.importer_config(),
        catalog,
        drive,
        api_client,
        Arc::new(clock::SystemProvider::new()),
        cancel.clone(),
    );

    if !importer.check_api_connection().await {
        error!(api_url = %args.ingest_api.url, "ingestion API unreachable, refusing to start");
        return ExitCode::from(EXIT_API_UNREACHABLE);
    }

    info!("starting import loop");
    let result = importer
        .run_import_loop(args.run.run_once, args.run.modified_after, args.run.modified_before)
        .await;

    match result {
        Ok(()) if cancel.is_cancelled() => {
            info!("import aborted by user");
            ExitCode::from(EXIT_FAILURE)
        }
        Ok(()) => {
            info!("import loop finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(%e, "import loop failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

/// Translate the first SIGINT into the process-wide cancellation token. The
/// token is never reset; workers wind down cooperatively.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, cancelling workers");
            cancel.cancel();
        }
    });
}
