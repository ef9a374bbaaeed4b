//! Client for the collection ingestion API.
//!
//! The API accepts one JSON collection file per logical timestamp. Its
//! observable behaviors, as far as the importer cares:
//!
//! * `POST` of a collection whose timestamp the server already holds fails
//!   with a distinct conflict ([`RequestError::NonUniqueTimestamp`]). The
//!   importer treats that as success, which is what makes re-running a cycle
//!   idempotent against a non-idempotent remote.
//! * `PUT` on an existing collection can race other writers and reports that
//!   as [`RequestError::Conflict`].
//! * a `/ping` endpoint answers when the service is reachable.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

use std::path::Path;

use chrono::NaiveDateTime;
use observability_deps::tracing::debug;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use snafu::{ResultExt, Snafu};
use url::Url;

// Re-exported so callers can match on API status codes without a direct
// reqwest dependency.
pub use reqwest::StatusCode;

/// Errors talking to the ingestion API.
#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum RequestError {
    #[snafu(display("could not connect to the ingestion API: {source}"))]
    Connect { source: reqwest::Error },

    #[snafu(display("error while processing the request: {source}"))]
    ReqwestProcessing { source: reqwest::Error },

    #[snafu(display("the server already holds a collection with this timestamp"))]
    NonUniqueTimestamp,

    #[snafu(display("conflicting concurrent update of the collection"))]
    Conflict,

    #[snafu(display("ingestion API returned {status}: {text}"))]
    Api { status: StatusCode, text: String },

    #[snafu(display("could not read collection file: {source}"))]
    ReadFile { source: std::io::Error },
}

/// Metadata the API reports for an ingested collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionMetadata {
    /// Server-side id of the collection.
    pub collection_id: i64,

    /// Logical timestamp of the collection, naive UTC.
    pub timestamp: NaiveDateTime,
}

/// Client for the collection ingestion API.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl Client {
    /// Create a client for the API at `base_url`, optionally authenticating
    /// with `api_key`.
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            base_url,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    /// The base URL this client talks to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = self.base_url.join(path).expect("valid api url");
        let request = self.http.request(method, url);
        match &self.api_key {
            Some(key) => request.header("Authorization", key),
            None => request,
        }
    }

    /// Check that the API answers at all.
    pub async fn ping(&self) -> Result<(), RequestError> {
        self.request(Method::GET, "ping")
            .send()
            .await
            .context(ConnectSnafu)?;
        Ok(())
    }

    /// Upload a new collection from the JSON file at `path`.
    ///
    /// Fails with [`RequestError::NonUniqueTimestamp`] when the server
    /// already holds a collection with the file's logical timestamp.
    pub async fn upload_collection(&self, path: &Path) -> Result<CollectionMetadata, RequestError> {
        let form = collection_form(path).await?;
        let response = self
            .request(Method::POST, "collections/upload")
            .multipart(form)
            .send()
            .await
            .context(ReqwestProcessingSnafu)?;

        match response.status() {
            StatusCode::CONFLICT => Err(RequestError::NonUniqueTimestamp),
            _ => parse_metadata(response).await,
        }
    }

    /// Replace the contents of the existing collection `collection_id` with
    /// the JSON file at `path`.
    ///
    /// Fails with [`RequestError::Conflict`] when a concurrent writer got
    /// there first.
    pub async fn update_collection(
        &self,
        collection_id: i64,
        path: &Path,
    ) -> Result<CollectionMetadata, RequestError> {
        let form = collection_form(path).await?;
        let response = self
            .request(Method::PUT, &format!("collections/{collection_id}"))
            .multipart(form)
            .send()
            .await
            .context(ReqwestProcessingSnafu)?;

        match response.status() {
            StatusCode::CONFLICT => Err(RequestError::Conflict),
            _ => parse_metadata(response).await,
        }
    }

    /// Fetch the metadata of the collection holding the given logical
    /// timestamp, if the server has one.
    pub async fn collection_by_timestamp(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<Option<CollectionMetadata>, RequestError> {
        let response = self
            .request(Method::GET, "collections")
            .query(&[("timestamp", format_timestamp(timestamp))])
            .send()
            .await
            .context(ReqwestProcessingSnafu)?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let mut collections: Vec<CollectionMetadata> =
            response.json().await.context(ReqwestProcessingSnafu)?;
        debug!(
            %timestamp,
            matches = collections.len(),
            "looked up collection by timestamp"
        );
        let first = collections.drain(..).next();
        Ok(first)
    }
}

fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format("%Y-%m-%dT%H:%M:%S").to_string()
}

async fn collection_form(path: &Path) -> Result<Form, RequestError> {
    let bytes = tokio::fs::read(path).await.context(ReadFileSnafu)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "collection.json".to_owned());

    let part = Part::bytes(bytes)
        .file_name(file_name)
        .mime_str("application/json")
        .expect("static mime type is valid");
    Ok(Form::new().part("collection_file", part))
}

async fn parse_metadata(response: Response) -> Result<CollectionMetadata, RequestError> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response.json().await.context(ReqwestProcessingSnafu)
}

async fn api_error(response: Response) -> RequestError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    RequestError::Api { status, text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn collection_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"meta": {{"timestamp": "2022-01-01T00:00:00"}}}}"#).unwrap();
        file
    }

    fn client_for(server: &mockito::ServerGuard) -> Client {
        Client::new(
            Url::parse(&format!("{}/", server.url())).unwrap(),
            Some("secret-key".to_owned()),
        )
    }

    #[tokio::test]
    async fn test_upload_collection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collections/upload")
            .match_header("authorization", "secret-key")
            .with_body(r#"{"collection_id": 9, "timestamp": "2022-01-01T00:00:00"}"#)
            .expect(1)
            .create_async()
            .await;

        let metadata = client_for(&server)
            .upload_collection(collection_file().path())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(metadata.collection_id, 9);
    }

    #[tokio::test]
    async fn test_upload_conflict_is_non_unique_timestamp() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/collections/upload")
            .with_status(409)
            .create_async()
            .await;

        let err = client_for(&server)
            .upload_collection(collection_file().path())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::NonUniqueTimestamp));
    }

    #[tokio::test]
    async fn test_update_conflict_is_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/collections/9")
            .with_status(409)
            .create_async()
            .await;

        let err = client_for(&server)
            .update_collection(9, collection_file().path())
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::Conflict));
    }

    #[tokio::test]
    async fn test_server_error_surfaces_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/collections/upload")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server)
            .upload_collection(collection_file().path())
            .await
            .unwrap_err();
        assert!(
            matches!(err, RequestError::Api { status, ref text } if status == 500 && text == "boom")
        );
    }
}
