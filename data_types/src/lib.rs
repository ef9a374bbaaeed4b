//! Shared data types of the collection importer.
//!
//! The durable unit of this system is the [`CollectionFile`] catalog row: one
//! row per artifact ever observed in the upstream cloud-drive folder,
//! recording whether the artifact has been ingested. Everything in here is
//! plain data; behavior lives in the crates that own it.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    missing_docs,
    clippy::todo,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::clone_on_ref_ptr,
    missing_debug_implementations
)]

use std::fmt;

use chrono::NaiveDateTime;

mod file_name;
pub use file_name::{
    file_name_sort_key, format_file_name, parse_file_name, FileNameError, Separator,
};

/// Unique identifier of a [`CollectionFile`] row, assigned by the catalog on
/// first insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct CollectionFileId(i64);

#[allow(missing_docs)]
impl CollectionFileId {
    pub fn new(v: i64) -> Self {
        Self(v)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for CollectionFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of an artifact in the upstream object store. Opaque to
/// this system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct SourceFileId(String);

#[allow(missing_docs)]
impl SourceFileId {
    pub fn new(v: impl Into<String>) -> Self {
        Self(v.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The durable catalog record for one upstream artifact.
///
/// Invariants upheld by the catalog:
///
/// * `source_file_id`, `file_name` and `timestamp` are each globally unique.
/// * `timestamp` is exactly the instant parsed from `file_name`.
/// * once `imported` is `Some(true)` the row is never mutated again by this
///   system.
/// * `source_modified_date >= timestamp` for every row this system writes.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CollectionFile {
    /// Catalog-assigned id.
    pub collection_file_id: CollectionFileId,

    /// Id of the artifact in the object store.
    pub source_file_id: SourceFileId,

    /// Name of the artifact, matching the file-name grammar.
    pub file_name: String,

    /// Last-modified timestamp reported by the object store, naive UTC.
    pub source_modified_date: NaiveDateTime,

    /// Logical timestamp parsed from `file_name`, naive UTC.
    pub timestamp: NaiveDateTime,

    /// `None` = never attempted, `Some(true)` = ingested,
    /// `Some(false)` = attempted and failed.
    pub imported: Option<bool>,

    /// `None` = no error observed, `Some(true)` = a processing error
    /// occurred, `Some(false)` = cleared.
    pub error: Option<bool>,
}

/// Data to insert a new [`CollectionFile`], everything the catalog needs
/// except the id it assigns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFileParams {
    /// Id of the artifact in the object store.
    pub source_file_id: SourceFileId,

    /// Name of the artifact.
    pub file_name: String,

    /// Last-modified timestamp reported by the object store.
    pub source_modified_date: NaiveDateTime,

    /// Logical timestamp parsed from `file_name`.
    pub timestamp: NaiveDateTime,
}

impl CollectionFile {
    /// Construct a row from its insert parameters and a freshly assigned id.
    /// New rows start with both lifecycle flags unset.
    pub fn from_params(params: CollectionFileParams, collection_file_id: CollectionFileId) -> Self {
        let CollectionFileParams {
            source_file_id,
            file_name,
            source_modified_date,
            timestamp,
        } = params;

        Self {
            collection_file_id,
            source_file_id,
            file_name,
            source_modified_date,
            timestamp,
            imported: None,
            error: None,
        }
    }
}

/// An immutable change record applied to a [`CollectionFile`] row by the
/// catalog writer. An absent field means "leave as is".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionFileChange {
    /// The row to change.
    pub collection_file_id: CollectionFileId,

    /// New value of the `imported` flag, if any.
    pub imported: Option<bool>,

    /// New value of the `error` flag, if any.
    pub error: Option<bool>,
}

impl fmt::Display for CollectionFileChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sep = "";
        if let Some(imported) = self.imported {
            write!(f, "imported={imported}")?;
            sep = ", ";
        }
        if let Some(error) = self.error {
            write!(f, "{sep}error={error}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_change_display_renders_only_set_fields() {
        let id = CollectionFileId::new(1);

        let c = CollectionFileChange {
            collection_file_id: id,
            imported: Some(true),
            error: Some(false),
        };
        assert_eq!(c.to_string(), "imported=true, error=false");

        let c = CollectionFileChange {
            collection_file_id: id,
            imported: None,
            error: Some(true),
        };
        assert_eq!(c.to_string(), "error=true");

        let c = CollectionFileChange {
            collection_file_id: id,
            imported: Some(false),
            error: None,
        };
        assert_eq!(c.to_string(), "imported=false");
    }

    #[test]
    fn test_from_params_starts_unattempted() {
        let ts = NaiveDate::from_ymd_opt(2022, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let params = CollectionFileParams {
            source_file_id: SourceFileId::new("abc"),
            file_name: "pss-top-100_20220101-000000.json".to_owned(),
            source_modified_date: ts,
            timestamp: ts,
        };

        let file = CollectionFile::from_params(params, CollectionFileId::new(7));
        assert_eq!(file.collection_file_id.get(), 7);
        assert_eq!(file.imported, None);
        assert_eq!(file.error, None);
    }
}
