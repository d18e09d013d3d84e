//! Per-table SQL statement factory.
//!
//! Every statement a table needs is built once, up front, from a sanitized
//! table name and the ordered list of extra field columns. Identifiers are
//! quoted exactly once by [`Ident::quoted`]; derived names (`T_meta`,
//! `T_name_idx`, `T_fields_idx`) are derived from the unquoted name and then
//! quoted, so no statement ever mixes quoted and unquoted forms of a name.
//!
//! # Parameter layout
//!
//! | Statement | Fixed parameters | Extra fields |
//! |-----------|------------------|--------------|
//! | `insert` | ?1 namespace, ?2 name, ?3 value, ?4 resource version, ?5 created, ?6 deleted, ?7 uid | ?8.. |
//! | `update` | ?1 namespace, ?2 name, ?3 value, ?4 new version, ?5 expected version | ?6.. |
//! | `delete` | ?1 namespace, ?2 name, ?3 deletion version, ?4 expected version | - |
//! | `list` | ?1 namespace, ?2 name, ?3 after version, ?4 include deleted | ?5.. |
//! | `list-after` | ?1 namespace, ?2 name, ?3 after version | ?4.. |

use crate::error::{Result, StoreError};
use crate::storage::ident::{Ident, sanitize_field, sanitize_table};
use std::collections::HashSet;
use std::fmt::{self, Write as _};

/// First parameter position of the extra field values in `insert`.
pub const INSERT_FIELD_OFFSET: usize = 8;
/// First parameter position of the extra field values in `update`.
pub const UPDATE_FIELD_OFFSET: usize = 6;
/// First parameter position of the filter values in `list`.
pub const LIST_FILTER_OFFSET: usize = 5;
/// First parameter position of the filter values in `list-after`.
pub const LIST_AFTER_FILTER_OFFSET: usize = 4;

/// Columns selected for every row read, in `Row` decoding order.
pub const ROW_COLUMNS: &str = "namespace, name, value, resource_version, created, deleted, uid";

/// Statement names that form the storage contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementName {
    CreateTable,
    AddColumn,
    AddFieldIndex,
    DropFieldIndex,
    Insert,
    Update,
    Delete,
    Get,
    GetVersion,
    List,
    ListAfter,
    TableMetadata,
    AllocateVersion,
    ClearCreated,
    UpdateCompaction,
    Compact,
    TableLock,
}

impl StatementName {
    pub const ALL: [Self; 17] = [
        Self::CreateTable,
        Self::AddColumn,
        Self::AddFieldIndex,
        Self::DropFieldIndex,
        Self::Insert,
        Self::Update,
        Self::Delete,
        Self::Get,
        Self::GetVersion,
        Self::List,
        Self::ListAfter,
        Self::TableMetadata,
        Self::AllocateVersion,
        Self::ClearCreated,
        Self::UpdateCompaction,
        Self::Compact,
        Self::TableLock,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateTable => "create-table",
            Self::AddColumn => "add-column",
            Self::AddFieldIndex => "add-field-index",
            Self::DropFieldIndex => "drop-field-index",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Get => "get",
            Self::GetVersion => "get-version",
            Self::List => "list",
            Self::ListAfter => "list-after",
            Self::TableMetadata => "table-metadata",
            Self::AllocateVersion => "allocate-version",
            Self::ClearCreated => "clear-created",
            Self::UpdateCompaction => "update-compaction",
            Self::Compact => "compact",
            Self::TableLock => "table-lock",
        }
    }
}

impl fmt::Display for StatementName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The complete, ready-to-execute statement set for one table.
#[derive(Debug, Clone)]
pub struct Statements {
    table: Ident,
    meta_table: Ident,
    fields_index: Ident,
    fields: Vec<Ident>,
    lock: bool,
    create_table: String,
    insert: String,
    update: String,
    delete: String,
    get: String,
    get_version: String,
    list: String,
    list_after: String,
    table_meta: String,
    allocate_version: String,
    clear_created: String,
    update_compaction: String,
    compact: String,
    drop_fields_index: String,
    table_lock: String,
    count_rows: String,
}

impl Statements {
    /// Build the statement set for `table` with the given extra field paths.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` if the table name or any field path is
    /// unsafe, or if two field paths map onto the same column.
    pub fn new<S: AsRef<str>>(table: &str, extra_fields: &[S], lock: bool) -> Result<Self> {
        let table = sanitize_table(table)?;
        let meta_table = table.with_suffix("meta")?;
        let name_index = table.with_suffix("name_idx")?;
        let deleted_index = table.with_suffix("deleted_idx")?;
        let fields_index = table.with_suffix("fields_idx")?;

        let mut seen = HashSet::new();
        let mut fields = Vec::with_capacity(extra_fields.len());
        for path in extra_fields {
            let field = sanitize_field(path.as_ref())?;
            if !seen.insert(field.as_str().to_ascii_lowercase()) {
                return Err(StoreError::invalid_identifier(
                    path.as_ref(),
                    format!("column {} is declared twice", field.as_str()),
                ));
            }
            fields.push(field);
        }

        let t = table.quoted();
        let m = meta_table.quoted();

        let mut field_defs = String::new();
        for f in &fields {
            let _ = write!(field_defs, ",\n    {} TEXT", f.quoted());
        }
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {t} (
    resource_version INTEGER PRIMARY KEY,
    namespace TEXT NOT NULL DEFAULT '',
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    created INTEGER,
    deleted INTEGER,
    uid TEXT{field_defs}
);
CREATE UNIQUE INDEX IF NOT EXISTS {name_idx} ON {t} (namespace, name) WHERE deleted IS NULL;
CREATE INDEX IF NOT EXISTS {deleted_idx} ON {t} (deleted) WHERE deleted IS NOT NULL;
CREATE TABLE IF NOT EXISTS {m} (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    latest_version INTEGER NOT NULL DEFAULT 0,
    compact_version INTEGER NOT NULL DEFAULT 0,
    lock_generation INTEGER NOT NULL DEFAULT 0
);
INSERT OR IGNORE INTO {m} (id) VALUES (1);",
            name_idx = name_index.quoted(),
            deleted_idx = deleted_index.quoted(),
        );

        let mut insert_cols = String::new();
        let mut insert_vals = String::new();
        let mut update_sets = String::new();
        for (i, f) in fields.iter().enumerate() {
            let _ = write!(insert_cols, ", {}", f.quoted());
            let _ = write!(insert_vals, ", ?{}", i + INSERT_FIELD_OFFSET);
            let _ = write!(update_sets, ", {} = ?{}", f.quoted(), i + UPDATE_FIELD_OFFSET);
        }

        let insert = format!(
            "INSERT INTO {t} ({ROW_COLUMNS}{insert_cols}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7{insert_vals})"
        );
        let update = format!(
            "UPDATE {t} SET value = ?3, resource_version = ?4, created = NULL{update_sets} \
             WHERE namespace = ?1 AND name = ?2 AND deleted IS NULL \
             AND (?5 IS NULL OR resource_version = ?5)"
        );
        let delete = format!(
            "UPDATE {t} SET deleted = ?3, resource_version = ?3, created = NULL \
             WHERE namespace = ?1 AND name = ?2 AND deleted IS NULL \
             AND (?4 IS NULL OR resource_version = ?4)"
        );
        let get = format!(
            "SELECT {ROW_COLUMNS} FROM {t} WHERE namespace = ?1 AND name = ?2 AND deleted IS NULL"
        );
        let get_version = format!("SELECT {ROW_COLUMNS} FROM {t} WHERE resource_version = ?1");

        let list = format!(
            "SELECT {ROW_COLUMNS}
FROM {t}
WHERE (?1 IS NULL OR namespace = ?1)
    AND (?2 IS NULL OR name = ?2)
    AND resource_version > ?3
    AND (?4 OR deleted IS NULL){filters}
ORDER BY resource_version ASC",
            filters = filter_clauses(&fields, LIST_FILTER_OFFSET),
        );
        let list_after = format!(
            "SELECT {ROW_COLUMNS}
FROM {t}
WHERE (?1 IS NULL OR namespace = ?1)
    AND (?2 IS NULL OR name = ?2)
    AND resource_version > ?3{filters}
ORDER BY resource_version ASC",
            filters = filter_clauses(&fields, LIST_AFTER_FILTER_OFFSET),
        );

        let table_meta =
            format!("SELECT latest_version, compact_version, lock_generation FROM {m} WHERE id = 1");
        let allocate_version = format!(
            "UPDATE {m} SET latest_version = latest_version + 1 WHERE id = 1 RETURNING latest_version"
        );
        let clear_created = format!(
            "UPDATE {t} SET created = NULL WHERE created IS NOT NULL AND resource_version <= ?1"
        );
        let update_compaction = format!(
            "UPDATE {m} SET compact_version = ?1 \
             WHERE id = 1 AND compact_version < ?1 AND ?1 <= latest_version"
        );
        let compact =
            format!("DELETE FROM {t} WHERE deleted IS NOT NULL AND resource_version <= ?1");
        let drop_fields_index = format!("DROP INDEX IF EXISTS {}", fields_index.quoted());
        let table_lock =
            format!("UPDATE {m} SET lock_generation = lock_generation + 1 WHERE id = 1");
        let count_rows = format!(
            "SELECT COALESCE(SUM(deleted IS NULL), 0), COALESCE(SUM(deleted IS NOT NULL), 0) FROM {t}"
        );

        Ok(Self {
            table,
            meta_table,
            fields_index,
            fields,
            lock,
            create_table,
            insert,
            update,
            delete,
            get,
            get_version,
            list,
            list_after,
            table_meta,
            allocate_version,
            clear_created,
            update_compaction,
            compact,
            drop_fields_index,
            table_lock,
            count_rows,
        })
    }

    #[must_use]
    pub fn table(&self) -> &Ident {
        &self.table
    }

    #[must_use]
    pub fn meta_table(&self) -> &Ident {
        &self.meta_table
    }

    /// Extra field columns in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Ident] {
        &self.fields
    }

    /// Position of the field with the given path, if declared.
    #[must_use]
    pub fn field_position(&self, path: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.source() == path)
    }

    #[must_use]
    pub const fn lock_enabled(&self) -> bool {
        self.lock
    }

    /// Look up a fixed statement by its contract name.
    ///
    /// `add-column` and `add-field-index` take arguments and are built by
    /// [`Self::add_column_sql`] and [`Self::add_fields_index_sql`];
    /// `table-lock` is `None` when locking is disabled.
    #[must_use]
    pub fn sql(&self, name: StatementName) -> Option<&str> {
        let sql = match name {
            StatementName::CreateTable => &self.create_table,
            StatementName::DropFieldIndex => &self.drop_fields_index,
            StatementName::Insert => &self.insert,
            StatementName::Update => &self.update,
            StatementName::Delete => &self.delete,
            StatementName::Get => &self.get,
            StatementName::GetVersion => &self.get_version,
            StatementName::List => &self.list,
            StatementName::ListAfter => &self.list_after,
            StatementName::TableMetadata => &self.table_meta,
            StatementName::AllocateVersion => &self.allocate_version,
            StatementName::ClearCreated => &self.clear_created,
            StatementName::UpdateCompaction => &self.update_compaction,
            StatementName::Compact => &self.compact,
            StatementName::TableLock => return self.table_lock_sql(),
            StatementName::AddColumn | StatementName::AddFieldIndex => return None,
        };
        Some(sql)
    }

    #[must_use]
    pub fn create_sql(&self) -> &str {
        &self.create_table
    }

    /// `ALTER TABLE` for one new extra field column.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for an unsafe field path.
    pub fn add_column_sql(&self, field: &str) -> Result<String> {
        let column = sanitize_field(field)?;
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            self.table.quoted(),
            column.quoted()
        ))
    }

    /// Composite index over the given fields; `None` when no field is given.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIdentifier` for an unsafe field path.
    pub fn add_fields_index_sql<S: AsRef<str>>(&self, fields: &[S]) -> Result<Option<String>> {
        let mut columns = Vec::new();
        for field in fields {
            let field = field.as_ref();
            if field.is_empty() {
                continue;
            }
            columns.push(sanitize_field(field)?.quoted());
        }
        if columns.is_empty() {
            return Ok(None);
        }
        Ok(Some(format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.fields_index.quoted(),
            self.table.quoted(),
            columns.join(", ")
        )))
    }

    /// Name of the composite field index.
    #[must_use]
    pub fn fields_index(&self) -> &Ident {
        &self.fields_index
    }

    #[must_use]
    pub fn drop_fields_index_sql(&self) -> &str {
        &self.drop_fields_index
    }

    #[must_use]
    pub fn insert_sql(&self) -> &str {
        &self.insert
    }

    #[must_use]
    pub fn update_sql(&self) -> &str {
        &self.update
    }

    #[must_use]
    pub fn delete_sql(&self) -> &str {
        &self.delete
    }

    #[must_use]
    pub fn get_sql(&self) -> &str {
        &self.get
    }

    #[must_use]
    pub fn get_version_sql(&self) -> &str {
        &self.get_version
    }

    /// The list statement, capped at `limit + 1` rows when `limit > 0`.
    #[must_use]
    pub fn list_sql(&self, limit: i64) -> String {
        with_limit(&self.list, limit)
    }

    /// The list-after statement, capped at `limit + 1` rows when `limit > 0`.
    #[must_use]
    pub fn list_after_sql(&self, limit: i64) -> String {
        with_limit(&self.list_after, limit)
    }

    #[must_use]
    pub fn table_meta_sql(&self) -> &str {
        &self.table_meta
    }

    #[must_use]
    pub fn allocate_version_sql(&self) -> &str {
        &self.allocate_version
    }

    #[must_use]
    pub fn clear_created_sql(&self) -> &str {
        &self.clear_created
    }

    #[must_use]
    pub fn update_compaction_sql(&self) -> &str {
        &self.update_compaction
    }

    #[must_use]
    pub fn compact_sql(&self) -> &str {
        &self.compact
    }

    #[must_use]
    pub fn table_lock_sql(&self) -> Option<&str> {
        self.lock.then_some(self.table_lock.as_str())
    }

    /// Live and tombstone row counts.
    #[must_use]
    pub fn count_rows_sql(&self) -> &str {
        &self.count_rows
    }
}

fn with_limit(sql: &str, limit: i64) -> String {
    if limit > 0 {
        format!("{sql} LIMIT {}", limit.saturating_add(1))
    } else {
        sql.to_string()
    }
}

fn filter_clauses(fields: &[Ident], offset: usize) -> String {
    let mut out = String::new();
    for (i, f) in fields.iter().enumerate() {
        let col = f.quoted();
        let pos = i + offset;
        let _ = write!(
            out,
            "\n    AND ({col} IS NULL OR {col} = ?{pos} OR ?{pos} IS NULL)"
        );
    }
    out
}
