//! Data types shared by the storage engine and the change feed.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Field selector key addressing the object namespace.
pub const NAMESPACE_FIELD: &str = "metadata.namespace";
/// Field selector key addressing the object name.
pub const NAME_FIELD: &str = "metadata.name";

/// An object as handed to the write path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    /// Empty for cluster-scoped kinds.
    #[serde(default)]
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub value: Value,
}

impl Object {
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
            value,
        }
    }

    #[must_use]
    pub fn with_uid(mut self, uid: impl Into<String>) -> Self {
        self.uid = Some(uid.into());
        self
    }
}

/// One persisted resource instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub namespace: String,
    pub name: String,
    pub value: Value,
    pub resource_version: u64,
    /// Set while the row still carries the version it was created at.
    pub created: bool,
    /// The version at which the row was deleted, if it is a tombstone.
    pub deleted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl Row {
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }

    /// Decode a row selected with [`crate::storage::statements::ROW_COLUMNS`].
    pub(crate) fn from_sql(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = row.get(2)?;
        let value = serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?;
        let version: i64 = row.get(3)?;
        let created: Option<i64> = row.get(4)?;
        let deleted: Option<i64> = row.get(5)?;
        Ok(Self {
            namespace: row.get(0)?,
            name: row.get(1)?,
            value,
            resource_version: from_sql_version(version),
            created: created.is_some_and(|c| c != 0),
            deleted: deleted.map(from_sql_version),
            uid: row.get(6)?,
        })
    }
}

pub(crate) fn to_sql_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_version(version: i64) -> u64 {
    u64::try_from(version).unwrap_or(0)
}

/// Read the scalar at a dotted path inside a payload.
///
/// Strings are returned as-is, numbers and booleans in their JSON text form.
/// Missing paths, nulls, arrays and objects project to `None`.
#[must_use]
pub fn project_field(value: &Value, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Equality field selector, e.g. `spec.color=red,metadata.name=a`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    terms: BTreeMap<String, String>,
}

impl FieldFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality term, replacing any earlier term for the same field.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.terms.insert(field.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.terms.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.terms.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromStr for FieldFilter {
    type Err = StoreError;

    fn from_str(input: &str) -> Result<Self> {
        let mut filter = Self::new();
        for term in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            if term.contains("!=") {
                return Err(StoreError::InvalidArgument(format!(
                    "field selector {term:?}: only equality is supported"
                )));
            }
            let (field, value) = term
                .split_once("==")
                .or_else(|| term.split_once('='))
                .ok_or_else(|| {
                    StoreError::InvalidArgument(format!(
                        "field selector {term:?} is not of the form field=value"
                    ))
                })?;
            let field = field.trim();
            if field.is_empty() {
                return Err(StoreError::InvalidArgument(format!(
                    "field selector {term:?} has no field"
                )));
            }
            filter.terms.insert(field.to_string(), value.trim().to_string());
        }
        Ok(filter)
    }
}

/// Options for list and list-after reads.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub filters: FieldFilter,
    /// Maximum rows per page; zero or negative means unlimited.
    pub limit: i64,
    pub continue_token: Option<String>,
    /// Include soft-deleted rows in `list` results.
    pub include_deleted: bool,
}

impl ListOptions {
    #[must_use]
    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: FieldFilter) -> Self {
        self.filters = filters;
        self
    }

    #[must_use]
    pub fn with_continue(mut self, token: Option<String>) -> Self {
        self.continue_token = token;
        self
    }
}

/// One page of rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowList {
    pub rows: Vec<Row>,
    /// The table's latest resource version when the listing started.
    pub resource_version: u64,
    /// Present when more rows exist past this page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// Cursor encoded in a continue token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinueToken {
    /// Table version reported for every page of the listing.
    pub snapshot: u64,
    /// Resume strictly after this resource version.
    pub after: u64,
}

impl ContinueToken {
    #[must_use]
    pub const fn new(snapshot: u64, after: u64) -> Self {
        Self { snapshot, after }
    }

    /// Parse a token produced by [`ContinueToken::to_string`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidContinueToken` for anything else.
    pub fn parse(token: &str) -> Result<Self> {
        let invalid = || StoreError::InvalidContinueToken(token.to_string());
        let body = token.strip_prefix("rv").ok_or_else(invalid)?;
        let (snapshot, after) = body.split_once('-').ok_or_else(invalid)?;
        let snapshot: u64 = snapshot.parse().map_err(|_| invalid())?;
        let after: u64 = after.parse().map_err(|_| invalid())?;
        if after > snapshot {
            return Err(invalid());
        }
        Ok(Self { snapshot, after })
    }
}

impl fmt::Display for ContinueToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rv{}-{}", self.snapshot, self.after)
    }
}

/// Per-table bookkeeping stored in the meta table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableMeta {
    pub latest_version: u64,
    /// Compaction watermark: tombstones at or below it may be gone.
    pub watermark: u64,
    /// Number of times the table lock has been taken.
    pub lock_generation: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn projects_nested_scalars() {
        let value = json!({"spec": {"color": "red", "size": 3, "on": true, "tags": ["a"]}});
        assert_eq!(project_field(&value, "spec.color").as_deref(), Some("red"));
        assert_eq!(project_field(&value, "spec.size").as_deref(), Some("3"));
        assert_eq!(project_field(&value, "spec.on").as_deref(), Some("true"));
        assert_eq!(project_field(&value, "spec.tags"), None);
        assert_eq!(project_field(&value, "spec.missing"), None);
        assert_eq!(project_field(&value, "status.phase"), None);
    }

    #[test]
    fn parses_field_selectors() {
        let filter: FieldFilter = "spec.color=red, metadata.name==a".parse().unwrap();
        assert_eq!(filter.get("spec.color"), Some("red"));
        assert_eq!(filter.get(NAME_FIELD), Some("a"));
        assert!("".parse::<FieldFilter>().unwrap().is_empty());
        assert!("spec.color!=red".parse::<FieldFilter>().is_err());
        assert!("spec.color".parse::<FieldFilter>().is_err());
        assert!("=red".parse::<FieldFilter>().is_err());
    }

    #[test]
    fn continue_token_round_trip_and_rejects_garbage() {
        let token = ContinueToken::new(12, 7);
        assert_eq!(token.to_string(), "rv12-7");
        assert_eq!(ContinueToken::parse("rv12-7").unwrap(), token);
        for bad in ["", "12-7", "rv12", "rvx-1", "rv1-2", "rv-1-2"] {
            assert!(ContinueToken::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
