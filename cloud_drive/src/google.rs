//! [`CloudDriveClient`] implementation over the Google Drive v3 REST API.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use data_types::SourceFileId;
use observability_deps::tracing::debug;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::{CloudDriveClient, FetchError, ListError, SourceFile};

/// Page size requested from the listing endpoint.
const PAGE_SIZE: usize = 1000;

/// Name fragment every collection file carries; pushed into the listing
/// query so unrelated folder contents never travel.
const NAME_FILTER: &str = "name contains 'pss-top-100' and not name contains 'of'";

#[derive(Debug, Deserialize)]
struct FileResource {
    id: String,
    name: String,
    // The drive serializes int64 fields as JSON strings.
    size: String,
    #[serde(rename = "modifiedTime")]
    modified_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileResource>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

/// A Google Drive folder holding collection files.
///
/// Authentication bootstrap is not this type's business: it is handed
/// pre-issued bearer-token material and sends it verbatim.
#[derive(Debug)]
pub struct GoogleDriveClient {
    http: reqwest::Client,
    base_url: Url,
    folder_id: String,
    access_token: String,
}

impl GoogleDriveClient {
    /// Create a client for the given folder.
    pub fn new(folder_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::new_with_base_url(
            "https://www.googleapis.com/drive/v3/",
            folder_id,
            access_token,
        )
    }

    /// Create a client against a non-default endpoint, for tests.
    pub fn new_with_base_url(
        base_url: impl AsRef<str>,
        folder_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url.as_ref()).expect("valid drive base url"),
            folder_id: folder_id.into(),
            access_token: access_token.into(),
        }
    }

    fn list_query(
        &self,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> String {
        let mut criteria = vec![format!("'{}' in parents", self.folder_id), NAME_FILTER.into()];

        if let Some(after) = modified_after {
            criteria.push(format!("modifiedTime > '{}'", rfc3339(after)));
        }
        if let Some(before) = modified_before {
            criteria.push(format!("modifiedTime < '{}'", rfc3339(before)));
        }

        criteria.join(" and ")
    }
}

fn rfc3339(dt: NaiveDateTime) -> String {
    dt.and_utc().to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl TryFrom<FileResource> for SourceFile {
    type Error = ListError;

    fn try_from(resource: FileResource) -> Result<Self, Self::Error> {
        let size = resource
            .size
            .parse()
            .map_err(|_| ListError::MalformedEntry {
                message: format!("file '{}' has non-numeric size", resource.name),
            })?;

        Ok(Self {
            id: SourceFileId::new(resource.id),
            name: resource.name,
            size,
            modified_date: resource.modified_time.naive_utc(),
        })
    }
}

#[async_trait]
impl CloudDriveClient for GoogleDriveClient {
    async fn list_by_modified_date(
        &self,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> Result<Vec<SourceFile>, ListError> {
        let url = self
            .base_url
            .join("files")
            .expect("valid files listing url");
        let q = self.list_query(modified_after, modified_before);
        debug!(%q, "listing drive folder");

        let page_size = PAGE_SIZE.to_string();
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut request = self
                .http
                .get(url.clone())
                .bearer_auth(&self.access_token)
                .query(&[
                    ("q", q.as_str()),
                    ("orderBy", "createdTime"),
                    ("fields", "nextPageToken, files(id, name, size, modifiedTime)"),
                    ("pageSize", page_size.as_str()),
                ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let response = request
                .send()
                .await
                .map_err(|e| ListError::Request {
                    message: e.to_string(),
                })?
                .error_for_status()
                .map_err(|e| ListError::Request {
                    message: e.to_string(),
                })?;

            let page: FileList = response.json().await.map_err(|e| ListError::Request {
                message: e.to_string(),
            })?;

            for resource in page.files {
                files.push(resource.try_into()?);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(file_count = files.len(), "drive folder listed");
        Ok(files)
    }

    async fn fetch_content(&self, file: &SourceFile) -> Result<String, FetchError> {
        let url = self
            .base_url
            .join(&format!("files/{}", file.id))
            .expect("valid file content url");

        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| FetchError::Transient {
                message: e.to_string(),
            })?;

        match response.status() {
            status if status.is_success() => {
                response.text().await.map_err(|e| FetchError::Transient {
                    message: e.to_string(),
                })
            }
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => Err(FetchError::NotDownloadable {
                message: format!("'{}' returned {}", file.name, response.status()),
            }),
            status => Err(FetchError::Transient {
                message: format!("'{}' returned {}", file.name, status),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn client_for(server: &mockito::ServerGuard) -> GoogleDriveClient {
        GoogleDriveClient::new_with_base_url(format!("{}/", server.url()), "folder-1", "token")
    }

    #[test]
    fn test_list_query_bounds_are_strict() {
        let client = GoogleDriveClient::new("folder-1", "token");
        let after = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap();

        let q = client.list_query(Some(after), None);
        assert_eq!(
            q,
            "'folder-1' in parents and name contains 'pss-top-100' and not name contains 'of' \
             and modifiedTime > '2022-01-01T03:00:00Z'"
        );
    }

    #[tokio::test]
    async fn test_list_paginates() {
        let mut server = mockito::Server::new_async().await;

        let page_1 = server
            .mock("GET", "/files")
            .match_query(mockito::Matcher::Regex("pageSize".into()))
            .with_body(
                r#"{
                    "nextPageToken": "page-2",
                    "files": [{
                        "id": "a",
                        "name": "pss-top-100_20220101-000000.json",
                        "size": "17",
                        "modifiedTime": "2022-01-01T00:01:00Z"
                    }]
                }"#,
            )
            .expect(1)
            .create_async()
            .await;
        let page_2 = server
            .mock("GET", "/files")
            .match_query(mockito::Matcher::Regex("pageToken=page-2".into()))
            .with_body(
                r#"{
                    "files": [{
                        "id": "b",
                        "name": "pss-top-100_20220101-010000.json",
                        "size": "18",
                        "modifiedTime": "2022-01-01T01:01:00Z"
                    }]
                }"#,
            )
            .expect(1)
            .create_async()
            .await;

        let files = client_for(&server)
            .list_by_modified_date(None, None)
            .await
            .unwrap();

        page_1.assert_async().await;
        page_2.assert_async().await;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].id, SourceFileId::new("a"));
        assert_eq!(files[0].size, 17);
        assert_eq!(files[1].name, "pss-top-100_20220101-010000.json");
    }

    #[tokio::test]
    async fn test_fetch_content_status_taxonomy() {
        let mut server = mockito::Server::new_async().await;
        let file = SourceFile {
            id: SourceFileId::new("a"),
            name: "pss-top-100_20220101-000000.json".to_owned(),
            size: 2,
            modified_date: NaiveDate::from_ymd_opt(2022, 1, 1)
                .unwrap()
                .and_hms_opt(0, 1, 0)
                .unwrap(),
        };
        let client = client_for(&server);

        server
            .mock("GET", "/files/a")
            .match_query(mockito::Matcher::UrlEncoded("alt".into(), "media".into()))
            .with_body("{}")
            .create_async()
            .await;
        assert_eq!(client.fetch_content(&file).await.unwrap(), "{}");

        server
            .mock("GET", "/files/a")
            .match_query(mockito::Matcher::Any)
            .with_status(404)
            .create_async()
            .await;
        let err = client.fetch_content(&file).await.unwrap_err();
        assert!(matches!(err, FetchError::NotDownloadable { .. }));

        server
            .mock("GET", "/files/a")
            .match_query(mockito::Matcher::Any)
            .with_status(503)
            .create_async()
            .await;
        let err = client.fetch_content(&file).await.unwrap_err();
        assert!(matches!(err, FetchError::Transient { .. }));
    }
}
