//! A scripted [`CloudDriveClient`] for tests.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use data_types::SourceFileId;
use parking_lot::Mutex;

use crate::{CloudDriveClient, FetchError, ListError, SourceFile};

/// One scripted response to a `fetch_content` call.
#[derive(Debug, Clone)]
pub enum FetchScript {
    /// Return this content.
    Ok(String),
    /// Fail with this error.
    Err(FetchError),
    /// Never return, simulating the drive's observed hang failure mode.
    Hang,
}

/// A [`CloudDriveClient`] yielding pre-programmed descriptors and content,
/// recording every call it receives.
///
/// Per-file fetch responses are scripts consumed front to back; once a script
/// is exhausted its last entry repeats. A file without a script serves its
/// name as content.
#[derive(Debug, Default)]
pub struct MockCloudDrive {
    files: Mutex<Vec<SourceFile>>,
    scripts: Mutex<HashMap<SourceFileId, VecDeque<FetchScript>>>,
    list_calls: Mutex<Vec<(Option<NaiveDateTime>, Option<NaiveDateTime>)>>,
    fetch_calls: Mutex<Vec<SourceFileId>>,
}

impl MockCloudDrive {
    /// Create an empty mock drive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listable file.
    pub fn with_file(self, file: SourceFile) -> Self {
        self.files.lock().push(file);
        self
    }

    /// Script the `fetch_content` responses for `id`.
    pub fn with_fetch_script(
        self,
        id: SourceFileId,
        script: impl IntoIterator<Item = FetchScript>,
    ) -> Self {
        self.scripts.lock().insert(id, script.into_iter().collect());
        self
    }

    /// The `(modified_after, modified_before)` bounds of every listing call
    /// observed so far.
    pub fn list_calls(&self) -> Vec<(Option<NaiveDateTime>, Option<NaiveDateTime>)> {
        self.list_calls.lock().clone()
    }

    /// The file ids of every fetch call observed so far.
    pub fn fetch_calls(&self) -> Vec<SourceFileId> {
        self.fetch_calls.lock().clone()
    }

    /// Number of fetch calls observed for `id`.
    pub fn fetch_count(&self, id: &SourceFileId) -> usize {
        self.fetch_calls.lock().iter().filter(|v| *v == id).count()
    }
}

#[async_trait]
impl CloudDriveClient for MockCloudDrive {
    async fn list_by_modified_date(
        &self,
        modified_after: Option<NaiveDateTime>,
        modified_before: Option<NaiveDateTime>,
    ) -> Result<Vec<SourceFile>, ListError> {
        self.list_calls
            .lock()
            .push((modified_after, modified_before));

        Ok(self
            .files
            .lock()
            .iter()
            .filter(|f| modified_after.map_or(true, |after| f.modified_date > after))
            .filter(|f| modified_before.map_or(true, |before| f.modified_date < before))
            .cloned()
            .collect())
    }

    async fn fetch_content(&self, file: &SourceFile) -> Result<String, FetchError> {
        self.fetch_calls.lock().push(file.id.clone());

        let script = {
            let mut scripts = self.scripts.lock();
            match scripts.get_mut(&file.id) {
                None => return Ok(file.name.clone()),
                Some(script) => {
                    if script.len() > 1 {
                        script.pop_front().expect("script non-empty")
                    } else {
                        script.front().cloned().expect("script non-empty")
                    }
                }
            }
        };

        match script {
            FetchScript::Ok(content) => Ok(content),
            FetchScript::Err(e) => Err(e),
            FetchScript::Hang => {
                // Simulates the hung-fetch failure mode; only the caller's
                // timeout gets the test out of here.
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}
