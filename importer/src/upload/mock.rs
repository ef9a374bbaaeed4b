//! A scripted [`CollectionUploader`] for tests.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::NaiveDateTime;
use ingest_api_client::{CollectionMetadata, RequestError, StatusCode};
use parking_lot::Mutex;

use super::CollectionUploader;

/// One scripted response to an `upload_collection` call.
#[derive(Debug, Clone, Copy)]
pub enum UploadScript {
    /// Accept the collection.
    Ok,
    /// Reject it: the server already holds this logical timestamp.
    NonUniqueTimestamp,
    /// Fail with a server error.
    Error,
}

/// A [`CollectionUploader`] yielding pre-programmed outcomes and recording
/// every call, keyed by uploaded file name.
///
/// Scripts are consumed front to back; once exhausted the last entry
/// repeats. Files without a script upload successfully. Accepted uploads are
/// assigned increasing collection ids and report the timestamp parsed from
/// the uploaded file's name, so tests can assert on the observed upload
/// order.
#[derive(Debug)]
pub struct MockUploader {
    scripts: Mutex<HashMap<String, VecDeque<UploadScript>>>,
    uploads: Mutex<Vec<PathBuf>>,
    updates: Mutex<Vec<(i64, PathBuf)>>,
    lookups: Mutex<Vec<NaiveDateTime>>,
    reachable: AtomicBool,
    next_collection_id: AtomicI64,
}

impl Default for MockUploader {
    fn default() -> Self {
        Self {
            scripts: Default::default(),
            uploads: Default::default(),
            updates: Default::default(),
            lookups: Default::default(),
            reachable: AtomicBool::new(true),
            next_collection_id: AtomicI64::new(1000),
        }
    }
}

impl MockUploader {
    /// Script the upload responses for the file named `file_name`.
    pub fn with_script(
        self,
        file_name: &str,
        script: impl IntoIterator<Item = UploadScript>,
    ) -> Self {
        self.scripts
            .lock()
            .insert(file_name.to_owned(), script.into_iter().collect());
        self
    }

    /// Make `ping` fail, simulating an unreachable API.
    pub fn unreachable(self) -> Self {
        self.reachable.store(false, Ordering::SeqCst);
        self
    }

    /// Paths of every upload attempt observed, in call order.
    pub fn uploads(&self) -> Vec<PathBuf> {
        self.uploads.lock().clone()
    }

    /// `(collection_id, path)` of every update attempt observed.
    pub fn updates(&self) -> Vec<(i64, PathBuf)> {
        self.updates.lock().clone()
    }

    /// Timestamps of every lookup observed.
    pub fn lookups(&self) -> Vec<NaiveDateTime> {
        self.lookups.lock().clone()
    }

    fn next_script(&self, file_name: &str) -> UploadScript {
        let mut scripts = self.scripts.lock();
        match scripts.get_mut(file_name) {
            None => UploadScript::Ok,
            Some(script) => {
                if script.len() > 1 {
                    script.pop_front().expect("script non-empty")
                } else {
                    *script.front().expect("script non-empty")
                }
            }
        }
    }

    fn metadata_for(&self, file_name: &str) -> CollectionMetadata {
        let timestamp = data_types::parse_file_name(file_name)
            .expect("mock uploads carry well-formed file names");
        CollectionMetadata {
            collection_id: self.next_collection_id.fetch_add(1, Ordering::SeqCst),
            timestamp,
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .expect("upload paths end in a file name")
        .to_string_lossy()
        .into_owned()
}

#[async_trait]
impl CollectionUploader for MockUploader {
    async fn ping(&self) -> Result<(), RequestError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RequestError::Api {
                status: StatusCode::SERVICE_UNAVAILABLE,
                text: "unreachable".to_owned(),
            })
        }
    }

    async fn upload_collection(&self, path: &Path) -> Result<CollectionMetadata, RequestError> {
        self.uploads.lock().push(path.to_owned());

        let file_name = file_name_of(path);
        match self.next_script(&file_name) {
            UploadScript::Ok => Ok(self.metadata_for(&file_name)),
            UploadScript::NonUniqueTimestamp => Err(RequestError::NonUniqueTimestamp),
            UploadScript::Error => Err(RequestError::Api {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                text: "scripted failure".to_owned(),
            }),
        }
    }

    async fn update_collection(
        &self,
        collection_id: i64,
        path: &Path,
    ) -> Result<CollectionMetadata, RequestError> {
        self.updates.lock().push((collection_id, path.to_owned()));

        let file_name = file_name_of(path);
        Ok(CollectionMetadata {
            collection_id,
            timestamp: data_types::parse_file_name(&file_name)
                .expect("mock updates carry well-formed file names"),
        })
    }

    async fn collection_by_timestamp(
        &self,
        timestamp: NaiveDateTime,
    ) -> Result<Option<CollectionMetadata>, RequestError> {
        self.lookups.lock().push(timestamp);
        Ok(Some(CollectionMetadata {
            collection_id: 4242,
            timestamp,
        }))
    }
}
