//! SQL identifier sanitization.
//!
//! Table and column names are assembled into statement text instead of being
//! bound as parameters, so every caller-supplied name passes through this
//! module first. Only ASCII alphanumerics, `_` and `.` (as a nested-path
//! separator) are accepted; dots become underscores in the flat column name.

use crate::error::{Result, StoreError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Longest identifier accepted after dot mapping.
pub const MAX_IDENT_LEN: usize = 63;

/// Column names reserved by the row layout.
pub const RESERVED_COLUMNS: &[&str] = &[
    "namespace",
    "name",
    "value",
    "resource_version",
    "created",
    "deleted",
    "uid",
];

/// Suffixes of the identifiers derived from a table name.
pub const DERIVED_SUFFIXES: &[&str] = &["_meta", "_name_idx", "_deleted_idx", "_fields_idx"];

/// Longest table name whose derived identifiers all fit in [`MAX_IDENT_LEN`].
pub const MAX_TABLE_LEN: usize = MAX_IDENT_LEN - "_deleted_idx".len();

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)*$").expect("identifier pattern is valid")
});

/// A validated SQL identifier.
///
/// The inner name only ever contains `[A-Za-z0-9_]`, so double-quoting it
/// cannot be escaped out of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident {
    source: String,
    name: String,
}

impl Ident {
    /// The flat identifier, unquoted.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The caller-supplied form (field path or resource name).
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The identifier wrapped in double quotes.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.name)
    }

    /// Derive a sibling identifier such as `widgets_meta`.
    ///
    /// The suffix is a crate constant, never caller input.
    pub(crate) fn with_suffix(&self, suffix: &str) -> Result<Self> {
        let derived = format!("{}_{suffix}", self.name);
        sanitize(&derived)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Validate a resource/table name.
///
/// # Errors
///
/// Returns `InvalidIdentifier` if the name is empty, too long, contains
/// characters outside the allow-list, or could alias a derived identifier of
/// another table.
pub fn sanitize_table(name: &str) -> Result<Ident> {
    let ident = sanitize(name)?;
    if ident.as_str().len() > MAX_TABLE_LEN {
        return Err(StoreError::invalid_identifier(
            name,
            format!("table names are limited to {MAX_TABLE_LEN} characters"),
        ));
    }
    let flat = ident.as_str().to_ascii_lowercase();
    if flat.starts_with("sqlite_") {
        return Err(StoreError::invalid_identifier(
            name,
            "the sqlite_ prefix is reserved",
        ));
    }
    if let Some(suffix) = DERIVED_SUFFIXES.iter().find(|s| flat.ends_with(**s)) {
        return Err(StoreError::invalid_identifier(
            name,
            format!("the {suffix} suffix is reserved"),
        ));
    }
    Ok(ident)
}

/// Validate a field path such as `spec.color` and map it to `spec_color`.
///
/// # Errors
///
/// Returns `InvalidIdentifier` for unsafe input or a path that maps onto a
/// reserved row column. SQLite column names ignore case, so `Name` is
/// reserved as well.
pub fn sanitize_field(path: &str) -> Result<Ident> {
    let ident = sanitize(path)?;
    if RESERVED_COLUMNS.contains(&ident.as_str().to_ascii_lowercase().as_str()) {
        return Err(StoreError::invalid_identifier(
            path,
            format!("column {} is reserved", ident.as_str()),
        ));
    }
    Ok(ident)
}

fn sanitize(input: &str) -> Result<Ident> {
    if input.is_empty() {
        return Err(StoreError::invalid_identifier(input, "empty identifier"));
    }
    if !PATH_RE.is_match(input) {
        return Err(StoreError::invalid_identifier(
            input,
            "only ASCII letters, digits, '_' and '.' path separators are allowed",
        ));
    }

    let name = input.replace('.', "_");
    if name.len() > MAX_IDENT_LEN {
        return Err(StoreError::invalid_identifier(
            input,
            format!("longer than {MAX_IDENT_LEN} characters"),
        ));
    }

    Ok(Ident {
        source: input.to_string(),
        name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn field_paths_map_dots_to_underscores() {
        let ident = sanitize_field("spec.color").unwrap();
        assert_eq!(ident.as_str(), "spec_color");
        assert_eq!(ident.source(), "spec.color");
        assert_eq!(ident.quoted(), "\"spec_color\"");
    }

    #[test]
    fn rejects_injection_attempts() {
        for bad in [
            "",
            "widgets\"; DROP TABLE x; --",
            "a b",
            "a-b",
            ".leading",
            "trailing.",
            "double..dot",
            "caf\u{e9}",
            "quote'",
        ] {
            let err = sanitize_table(bad).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidIdentifier { .. }),
                "expected InvalidIdentifier for {bad:?}"
            );
        }
    }

    #[test]
    fn rejects_reserved_columns() {
        assert!(sanitize_field("name").is_err());
        assert!(sanitize_field("resource_version").is_err());
        assert!(sanitize_field("metadata.name").is_ok());
    }

    #[test]
    fn reserved_columns_ignore_case() {
        for field in ["Name", "Created", "RESOURCE_VERSION", "Uid"] {
            let err = sanitize_field(field).unwrap_err();
            assert!(
                matches!(err, StoreError::InvalidIdentifier { .. }),
                "expected InvalidIdentifier for {field:?}"
            );
        }
    }

    #[test]
    fn rejects_overlong_names() {
        let long = "a".repeat(MAX_IDENT_LEN + 1);
        assert!(sanitize_table(&long).is_err());
        assert!(sanitize_field(&"a".repeat(MAX_IDENT_LEN)).is_ok());
    }

    #[test]
    fn table_length_leaves_room_for_derived_names() {
        let longest = "t".repeat(MAX_TABLE_LEN);
        let table = sanitize_table(&longest).unwrap();
        for suffix in DERIVED_SUFFIXES {
            let derived = table.with_suffix(suffix.trim_start_matches('_')).unwrap();
            assert!(derived.as_str().len() <= MAX_IDENT_LEN);
        }

        let too_long = "t".repeat(MAX_TABLE_LEN + 1);
        match sanitize_table(&too_long).unwrap_err() {
            StoreError::InvalidIdentifier { input, .. } => assert_eq!(input, too_long),
            other => panic!("expected InvalidIdentifier, got {other}"),
        }
    }

    #[test]
    fn rejects_names_that_alias_derived_tables() {
        assert!(sanitize_table("widgets_meta").is_err());
        assert!(sanitize_table("widgets_fields_idx").is_err());
        assert!(sanitize_table("sqlite_master").is_err());
        assert!(sanitize_table("widgets_metadata").is_ok());
    }

    #[test]
    fn suffix_derivation_stays_valid() {
        let table = sanitize_table("widgets").unwrap();
        assert_eq!(table.with_suffix("meta").unwrap().quoted(), "\"widgets_meta\"");
    }

    proptest! {
        #[test]
        fn accepted_identifiers_are_quote_safe(input in "\\PC{0,24}") {
            if let Ok(ident) = sanitize_table(&input) {
                prop_assert!(ident.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
                prop_assert_eq!(ident.quoted().matches('"').count(), 2);
            }
        }

        #[test]
        fn valid_paths_round_trip(parts in proptest::collection::vec("[a-z][a-z0-9_]{0,6}", 1..4)) {
            let path = parts.join(".");
            let ident = sanitize(&path).unwrap();
            prop_assert_eq!(ident.as_str(), parts.join("_"));
        }
    }
}
