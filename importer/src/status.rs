//! Per-item pipeline status.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use parking_lot::Mutex;

/// Lifecycle flags of one work item.
///
/// Every flag is monotonic: it transitions `false -> true` at most once, so a
/// compare-and-set is all the synchronization the pipeline needs. The
/// download pool and the upload loop observe each other exclusively through
/// this type.
#[derive(Debug, Default)]
pub struct WorkItemStatus {
    downloaded: AtomicBool,
    download_error: AtomicBool,
    download_timed_out: AtomicBool,
    imported: AtomicBool,
    import_error: AtomicBool,

    downloaded_at: Mutex<Option<NaiveDateTime>>,
    imported_at: Mutex<Option<NaiveDateTime>>,
}

impl WorkItemStatus {
    /// The item's payload is on disk at its target path.
    pub fn downloaded(&self) -> bool {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Downloading failed terminally.
    pub fn download_error(&self) -> bool {
        self.download_error.load(Ordering::SeqCst)
    }

    /// The item's download exceeded its deadline, ending the cycle.
    pub fn download_timed_out(&self) -> bool {
        self.download_timed_out.load(Ordering::SeqCst)
    }

    /// The item was ingested (or the server already held its timestamp).
    pub fn imported(&self) -> bool {
        self.imported.load(Ordering::SeqCst)
    }

    /// Uploading failed terminally.
    pub fn import_error(&self) -> bool {
        self.import_error.load(Ordering::SeqCst)
    }

    /// When the payload landed on disk.
    pub fn downloaded_at(&self) -> Option<NaiveDateTime> {
        *self.downloaded_at.lock()
    }

    /// When the item was ingested.
    pub fn imported_at(&self) -> Option<NaiveDateTime> {
        *self.imported_at.lock()
    }

    /// An item is done once it reached any terminal outcome. Timed-out items
    /// are deliberately NOT done: the watermark must not advance past them,
    /// so the next cycle lists them again.
    pub fn done(&self) -> bool {
        self.imported() || self.import_error() || self.download_error()
    }

    pub(crate) fn set_downloaded(&self, at: NaiveDateTime) {
        if self.transition(&self.downloaded) {
            *self.downloaded_at.lock() = Some(at);
        }
    }

    pub(crate) fn set_download_error(&self) {
        self.transition(&self.download_error);
    }

    pub(crate) fn set_download_timed_out(&self) {
        self.transition(&self.download_timed_out);
    }

    pub(crate) fn set_imported(&self, at: NaiveDateTime) {
        if self.transition(&self.imported) {
            *self.imported_at.lock() = Some(at);
        }
    }

    pub(crate) fn set_import_error(&self) {
        self.transition(&self.import_error);
    }

    /// Flip `flag` from `false` to `true`, returning whether this call made
    /// the transition.
    fn transition(&self, flag: &AtomicBool) -> bool {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_flags_start_cleared() {
        let status = WorkItemStatus::default();
        assert!(!status.downloaded());
        assert!(!status.download_error());
        assert!(!status.download_timed_out());
        assert!(!status.imported());
        assert!(!status.import_error());
        assert!(!status.done());
        assert_eq!(status.downloaded_at(), None);
        assert_eq!(status.imported_at(), None);
    }

    #[test]
    fn test_transitions_are_monotonic() {
        let status = WorkItemStatus::default();

        status.set_downloaded(at(1));
        assert!(status.downloaded());
        assert_eq!(status.downloaded_at(), Some(at(1)));

        // A second transition does not move the timestamp.
        status.set_downloaded(at(2));
        assert_eq!(status.downloaded_at(), Some(at(1)));
    }

    #[test]
    fn test_done_requires_terminal_outcome() {
        let status = WorkItemStatus::default();
        status.set_downloaded(at(1));
        assert!(!status.done());

        status.set_imported(at(2));
        assert!(status.done());

        let status = WorkItemStatus::default();
        status.set_download_error();
        assert!(status.done());

        let status = WorkItemStatus::default();
        status.set_import_error();
        assert!(status.done());
    }

    #[test]
    fn test_timed_out_item_is_not_done() {
        let status = WorkItemStatus::default();
        status.set_download_timed_out();
        assert!(status.download_timed_out());
        assert!(!status.done());
    }
}
