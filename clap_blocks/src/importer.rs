//! Import pipeline configuration.

use std::num::NonZeroUsize;
use std::path::PathBuf;

use backoff::BackoffConfig;
use chrono::NaiveDateTime;
use ::importer::ImporterConfig;

/// Accepted formats for `--modified-after` / `--modified-before`, naive UTC.
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

fn parse_naive_datetime(s: &str) -> Result<NaiveDateTime, String> {
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .ok_or_else(|| format!("'{s}' is not a UTC datetime (expected e.g. 2022-01-01T00:00:00)"))
}

/// CLI config for the import pipeline itself.
#[derive(Debug, Clone, clap::Parser)]
pub struct ImporterRunConfig {
    /// Number of parallel download workers.
    #[clap(
        long = "download-workers",
        env = "WORKER_COUNT",
        default_value = "2",
        action
    )]
    pub download_workers: NonZeroUsize,

    /// Per-item download deadline. A download exceeding it ends the cycle.
    #[clap(
        long = "download-timeout",
        env = "DOWNLOAD_TIMEOUT",
        default_value = "60s",
        action
    )]
    pub download_timeout: humantime::Duration,

    /// Attempts per artifact fetch (and per disk write) before giving up.
    #[clap(
        long = "download-attempts",
        env = "DOWNLOAD_ATTEMPTS",
        default_value = "3",
        action
    )]
    pub download_attempts: NonZeroUsize,

    /// Attempts per collection upload before recording a failure.
    #[clap(
        long = "upload-attempts",
        env = "UPLOAD_ATTEMPTS",
        default_value = "2",
        action
    )]
    pub upload_attempts: NonZeroUsize,

    /// Directory downloaded payloads are staged in.
    #[clap(
        long = "download-dir",
        env = "DOWNLOAD_DIR",
        default_value = "./downloads",
        action
    )]
    pub download_dir: PathBuf,

    /// Keep downloaded payload files after a successful upload.
    #[clap(
        long = "keep-downloaded-files",
        env = "KEEP_DOWNLOADED_FILES",
        default_value = "false",
        action
    )]
    pub keep_downloaded_files: bool,

    /// On a duplicate timestamp, replace the server-side collection instead
    /// of only skipping the upload.
    #[clap(
        long = "update-existing-collections",
        env = "UPDATE_EXISTING_COLLECTIONS",
        default_value = "false",
        action
    )]
    pub update_existing_collections: bool,

    /// Run exactly one bulk cycle, then exit.
    #[clap(long = "run-once", action)]
    pub run_once: bool,

    /// Only consider artifacts modified strictly after this UTC instant.
    #[clap(long = "modified-after", value_parser = parse_naive_datetime, action)]
    pub modified_after: Option<NaiveDateTime>,

    /// Only consider artifacts modified strictly before this UTC instant.
    #[clap(long = "modified-before", value_parser = parse_naive_datetime, action)]
    pub modified_before: Option<NaiveDateTime>,
}

impl ImporterRunConfig {
    /// Map the CLI values onto the pipeline's own configuration.
    pub fn importer_config(&self) -> ImporterConfig {
        ImporterConfig {
            download_workers: self.download_workers.get(),
            download_timeout: self.download_timeout.into(),
            download_backoff: BackoffConfig::default().with_max_attempts(self.download_attempts),
            upload_backoff: BackoffConfig::default().with_max_attempts(self.upload_attempts),
            download_dir: self.download_dir.clone(),
            keep_local_files: self.keep_downloaded_files,
            update_existing_collections: self.update_existing_collections,
        }
    }
}
