//! Cloud drive configuration.

/// CLI config for the drive folder holding the collection files.
#[derive(Debug, Clone, clap::Parser)]
pub struct CloudDriveConfig {
    /// Id of the drive folder to mirror.
    #[clap(long = "drive-folder-id", env = "DRIVE_FOLDER_ID", action)]
    pub folder_id: String,

    /// Pre-issued OAuth bearer token used against the drive API.
    #[clap(long = "drive-access-token", env = "DRIVE_ACCESS_TOKEN", action)]
    pub access_token: String,
}
