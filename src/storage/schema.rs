//! Table creation and additive schema changes.
//!
//! Every operation here is idempotent and safe against a table that is
//! serving reads: columns and indexes are only ever added, and dropping the
//! field index leaves its columns in place.

use crate::error::Result;
use crate::storage::ident::sanitize_field;
use crate::storage::statements::Statements;
use rusqlite::Connection;
use std::time::Duration;
use tracing::{debug, info};

/// Apply connection-level pragmas.
///
/// WAL lets readers proceed while a writer holds the write lock; the busy
/// timeout bounds how long a writer waits for it.
///
/// # Errors
///
/// Returns an error if a pragma cannot be set.
pub fn apply_pragmas(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // journal_mode returns a row, which pragma_update tolerates.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // NORMAL synchronous is safe with WAL: committed data survives OS crash
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}

/// Create the table, its indexes and its meta row, then make sure every
/// declared extra field has a column.
///
/// # Errors
///
/// Returns an error if the DDL fails.
pub fn create_table(conn: &Connection, statements: &Statements) -> Result<()> {
    conn.execute_batch(statements.create_sql())?;

    // Tables created before a field was declared pick up its column here.
    for field in statements.fields() {
        add_column(conn, statements, field.source())?;
    }

    debug!(table = %statements.table(), "table ready");
    Ok(())
}

/// Add the column backing one extra field. No-op if it exists.
///
/// Existing rows get NULL, which every field filter treats as a match.
///
/// # Errors
///
/// Returns `InvalidIdentifier` for an unsafe field path, or a database error.
pub fn add_column(conn: &Connection, statements: &Statements, field: &str) -> Result<bool> {
    let sql = statements.add_column_sql(field)?;
    let column = sanitize_field(field)?;
    if column_exists(conn, statements.table().as_str(), column.as_str())? {
        return Ok(false);
    }
    conn.execute(&sql, [])?;
    info!(table = %statements.table(), column = %column, "added field column");
    Ok(true)
}

/// Build the composite index over `fields`. No-op for an empty list.
///
/// An existing index over a different column list is rebuilt. Returns
/// whether the index was created or rebuilt.
///
/// # Errors
///
/// Returns `InvalidIdentifier` for an unsafe field path, or a database error.
pub fn add_fields_index<S: AsRef<str>>(
    conn: &Connection,
    statements: &Statements,
    fields: &[S],
) -> Result<bool> {
    let Some(sql) = statements.add_fields_index_sql(fields)? else {
        return Ok(false);
    };
    let wanted = fields
        .iter()
        .map(|f| f.as_ref())
        .filter(|f| !f.is_empty())
        .map(|f| sanitize_field(f).map(|ident| ident.as_str().to_string()))
        .collect::<Result<Vec<_>>>()?;
    let index = statements.fields_index().as_str();
    let current = index_columns(conn, index)?;
    if current == wanted {
        debug!(table = %statements.table(), "field index already present");
        return Ok(false);
    }

    let tx = conn.unchecked_transaction()?;
    if !current.is_empty() {
        info!(table = %statements.table(), from = ?current, to = ?wanted, "rebuilding field index");
        tx.execute(statements.drop_fields_index_sql(), [])?;
    }
    tx.execute(&sql, [])?;
    tx.commit()?;
    debug!(table = %statements.table(), "field index built");
    Ok(true)
}

/// Drop the composite field index, keeping its columns.
///
/// # Errors
///
/// Returns an error if the statement fails.
pub fn drop_fields_index(conn: &Connection, statements: &Statements) -> Result<()> {
    conn.execute(statements.drop_fields_index_sql(), [])?;
    debug!(table = %statements.table(), "field index dropped");
    Ok(())
}

/// Whether a table exists.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

/// Whether `table` has `column`, compared the way SQLite does (ignoring
/// case).
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2 COLLATE NOCASE")?;
    Ok(stmt.exists([table, column])?)
}

/// Columns of `index` in key order; empty when the index does not exist.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn index_columns(conn: &Connection, index: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
    let columns = stmt
        .query_map([index], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

/// Whether an index exists.
///
/// # Errors
///
/// Returns an error if the catalog query fails.
pub fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1")?;
    Ok(stmt.exists([index])?)
}
