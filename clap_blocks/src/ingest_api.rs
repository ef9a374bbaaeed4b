//! Ingestion API configuration.

use url::Url;

/// CLI config for the collection ingestion API.
#[derive(Debug, Clone, clap::Parser)]
pub struct IngestApiConfig {
    /// Base URL of the ingestion API.
    #[clap(long = "api-url", env = "FLEET_DATA_API_URL", action)]
    pub url: Url,

    /// API key sent with every request, if the deployment requires one.
    #[clap(long = "api-key", env = "FLEET_DATA_API_KEY", action)]
    pub api_key: Option<String>,
}

impl IngestApiConfig {
    /// Build the API client for this configuration.
    pub fn client(&self) -> ingest_api_client::Client {
        ingest_api_client::Client::new(self.url.clone(), self.api_key.clone())
    }
}
