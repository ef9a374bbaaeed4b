//! The artifact file-name grammar.
//!
//! Every artifact in the upstream folder is named after its logical
//! timestamp, in one of two historical spellings that differ only in the
//! separator before the date:
//!
//! ```text
//! pss-top-100_YYYYMMDD-HHMMSS.json
//! pss-top-100-YYYYMMDD-HHMMSS.json
//! ```

use chrono::NaiveDateTime;
use thiserror::Error;

/// The two accepted forms, as chrono format strings.
const FORMATS: [&str; 2] = [
    "pss-top-100_%Y%m%d-%H%M%S.json",
    "pss-top-100-%Y%m%d-%H%M%S.json",
];

/// Length of every well-formed file name.
const EXPECTED_LEN: usize = "pss-top-100_YYYYMMDD-HHMMSS.json".len();

/// Which separator a formatted name uses before the date part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// `pss-top-100_...`, the common spelling.
    Underscore,
    /// `pss-top-100-...`, used by a subset of older artifacts.
    Hyphen,
}

/// Errors raised when a file name does not match the grammar.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FileNameError {
    /// The name has the wrong length; no parse was attempted.
    #[error("file name '{name}' has length {len}, expected {EXPECTED_LEN}")]
    UnexpectedLength {
        /// The offending name.
        name: String,
        /// Its length.
        len: usize,
    },

    /// The name has the right length but matches neither pattern.
    #[error("file name '{name}' matches no known pattern")]
    PatternMismatch {
        /// The offending name.
        name: String,
    },
}

/// Extracts the logical timestamp from an artifact file name.
pub fn parse_file_name(file_name: &str) -> Result<NaiveDateTime, FileNameError> {
    if file_name.len() != EXPECTED_LEN {
        return Err(FileNameError::UnexpectedLength {
            name: file_name.to_owned(),
            len: file_name.len(),
        });
    }

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(file_name, format).ok())
        .ok_or_else(|| FileNameError::PatternMismatch {
            name: file_name.to_owned(),
        })
}

/// Renders the artifact file name for a logical timestamp.
pub fn format_file_name(timestamp: NaiveDateTime, separator: Separator) -> String {
    let format = match separator {
        Separator::Underscore => FORMATS[0],
        Separator::Hyphen => FORMATS[1],
    };
    timestamp.format(format).to_string()
}

/// Key under which artifact file names are sorted.
///
/// A subset of artifacts spells the separator before the date as `-` instead
/// of `_`; mapping every `-` to `_` makes the two spellings collate
/// identically, so the sort order equals logical timestamp order.
pub fn file_name_sort_key(file_name: &str) -> String {
    file_name.replace('-', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn timestamp(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn test_parse_underscore_form() {
        assert_eq!(
            parse_file_name("pss-top-100_20220101-020000.json").unwrap(),
            timestamp(2022, 1, 1, 2, 0, 0),
        );
    }

    #[test]
    fn test_parse_hyphen_form() {
        assert_eq!(
            parse_file_name("pss-top-100-20191010-121314.json").unwrap(),
            timestamp(2019, 10, 10, 12, 13, 14),
        );
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = parse_file_name("pss-top-100_2022-01-01.json").unwrap_err();
        assert!(matches!(err, FileNameError::UnexpectedLength { len: 27, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_pattern() {
        // Right length, wrong prefix.
        let err = parse_file_name("xss-top-100_20220101-020000.json").unwrap_err();
        assert!(matches!(err, FileNameError::PatternMismatch { .. }));
    }

    #[test]
    fn test_parse_rejects_invalid_date() {
        let err = parse_file_name("pss-top-100_20221301-020000.json").unwrap_err();
        assert!(matches!(err, FileNameError::PatternMismatch { .. }));
    }

    #[test]
    fn test_format_both_separators() {
        let ts = timestamp(2022, 1, 1, 2, 0, 0);
        assert_eq!(
            format_file_name(ts, Separator::Underscore),
            "pss-top-100_20220101-020000.json"
        );
        assert_eq!(
            format_file_name(ts, Separator::Hyphen),
            "pss-top-100-20220101-020000.json"
        );
    }

    prop_compose! {
        fn arb_timestamp()(
            y in 2016i32..2100,
            mo in 1u32..=12,
            d in 1u32..=28,
            h in 0u32..24,
            mi in 0u32..60,
            s in 0u32..60,
        ) -> NaiveDateTime {
            timestamp(y, mo, d, h, mi, s)
        }
    }

    fn arb_separator() -> impl Strategy<Value = Separator> {
        prop_oneof![Just(Separator::Underscore), Just(Separator::Hyphen)]
    }

    proptest! {
        #[test]
        fn prop_format_parse_round_trip(ts in arb_timestamp(), sep in arb_separator()) {
            let name = format_file_name(ts, sep);
            prop_assert_eq!(name.len(), EXPECTED_LEN);
            prop_assert_eq!(parse_file_name(&name).unwrap(), ts);
        }

        #[test]
        fn prop_sort_key_order_equals_timestamp_order(
            a in arb_timestamp(),
            b in arb_timestamp(),
            sep_a in arb_separator(),
            sep_b in arb_separator(),
        ) {
            let name_a = format_file_name(a, sep_a);
            let name_b = format_file_name(b, sep_b);
            prop_assert_eq!(
                file_name_sort_key(&name_a).cmp(&file_name_sort_key(&name_b)),
                a.cmp(&b),
            );
        }
    }
}
