//! `SQLite` storage implementation: write path and read path.

use crate::config::TableConfig;
use crate::error::{Result, StoreError, is_unique_violation};
use crate::model::{
    ContinueToken, ListOptions, NAME_FIELD, NAMESPACE_FIELD, Object, Row, RowList, TableMeta,
    from_sql_version, project_field, to_sql_version,
};
use crate::storage::schema;
use crate::storage::statements::Statements;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params_from_iter};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace};

/// Default busy timeout for connections opened without a config.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Versioned object storage for one table.
///
/// Each store owns one connection. Concurrent writers use one store per
/// thread against the same database file.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    statements: Statements,
}

impl SqliteStore {
    /// Open (and if needed create) `table` in the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established, the table
    /// config is invalid, or schema application fails.
    pub fn open(path: &Path, table: &TableConfig, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::apply_pragmas(&conn, busy_timeout)?;
        Self::with_connection(conn, table)
    }

    /// Open an in-memory database for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the table config is invalid.
    pub fn open_memory(table: &TableConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, table)
    }

    /// Wrap an existing connection, creating the table if needed.
    ///
    /// With `index_fields`, a missing field index is built. An existing one
    /// is left alone; `schema::add_fields_index` reconciles its columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the table config is invalid or the DDL fails.
    pub fn with_connection(conn: Connection, table: &TableConfig) -> Result<Self> {
        let statements = table.statements()?;
        schema::create_table(&conn, &statements)?;
        if table.index_fields && !schema::index_exists(&conn, statements.fields_index().as_str())? {
            schema::add_fields_index(&conn, &statements, &table.fields)?;
        }
        Ok(Self { conn, statements })
    }

    #[must_use]
    pub const fn statements(&self) -> &Statements {
        &self.statements
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    fn table_name(&self) -> String {
        self.statements.table().to_string()
    }

    /// Run `f` in a transaction, committing on success and rolling back on
    /// error.
    pub(crate) fn transaction<F, R>(&mut self, behavior: TransactionBehavior, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>, &Statements) -> Result<R>,
    {
        let tx = self.conn.transaction_with_behavior(behavior)?;
        let result = f(&tx, &self.statements)?;
        tx.commit()?;
        Ok(result)
    }

    /// Execute a write with a freshly allocated resource version.
    ///
    /// With the table lock enabled the transaction begins IMMEDIATE and takes
    /// the lock row before anything is read. Without it, version allocation
    /// is the transaction's first statement, which acquires the database
    /// write lock just the same. Either way the allocated version and the row
    /// write commit together, so committed versions are gap-free and ordered
    /// by commit.
    fn mutate<F, R>(&mut self, op: &str, f: F) -> Result<R>
    where
        F: FnOnce(&Transaction<'_>, &Statements, u64) -> Result<R>,
    {
        let behavior = if self.statements.lock_enabled() {
            TransactionBehavior::Immediate
        } else {
            TransactionBehavior::Deferred
        };
        let table = self.table_name();

        self.transaction(behavior, |tx, statements| {
            if let Some(lock) = statements.table_lock_sql() {
                tx.execute(lock, [])?;
                trace!(table = %table, op, "table lock acquired");
            }
            let version: i64 =
                tx.query_row(statements.allocate_version_sql(), [], |row| row.get(0))?;
            let version = from_sql_version(version);
            let result = f(tx, statements, version)?;
            debug!(table = %table, op, resource_version = version, "write committed");
            Ok(result)
        })
    }

    fn field_values(&self, value: &serde_json::Value) -> Vec<SqlValue> {
        self.statements
            .fields()
            .iter()
            .map(|field| project_field(value, field.source()).map_or(SqlValue::Null, SqlValue::Text))
            .collect()
    }

    // ========== Write path ==========

    /// Insert a new object at the next resource version.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if a live object has the same namespace and
    /// name; the same error is returned on every retry of that name.
    pub fn create(&mut self, object: &Object) -> Result<Row> {
        let payload = serde_json::to_string(&object.value)?;
        let fields = self.field_values(&object.value);
        let table = self.table_name();

        self.mutate("create", |tx, statements, version| {
            let mut params = vec![
                SqlValue::Text(object.namespace.clone()),
                SqlValue::Text(object.name.clone()),
                SqlValue::Text(payload),
                SqlValue::Integer(to_sql_version(version)),
                SqlValue::Integer(1),
                SqlValue::Null,
                object.uid.clone().map_or(SqlValue::Null, SqlValue::Text),
            ];
            params.extend(fields);

            match tx.execute(statements.insert_sql(), params_from_iter(params.iter())) {
                Ok(_) => {}
                Err(err) if is_unique_violation(&err) => {
                    return Err(StoreError::AlreadyExists {
                        table,
                        namespace: object.namespace.clone(),
                        name: object.name.clone(),
                    });
                }
                Err(err) => return Err(err.into()),
            }

            fetch_version(tx, statements, version)
        })
    }

    /// Replace the payload of a live object.
    ///
    /// With `expected` set, the write only happens if the stored version
    /// still equals it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no live object exists and `Conflict` if the
    /// stored version differs from `expected`. Nothing is written on error.
    pub fn update(&mut self, object: &Object, expected: Option<u64>) -> Result<Row> {
        let payload = serde_json::to_string(&object.value)?;
        let fields = self.field_values(&object.value);
        let table = self.table_name();

        self.mutate("update", |tx, statements, version| {
            let mut params = vec![
                SqlValue::Text(object.namespace.clone()),
                SqlValue::Text(object.name.clone()),
                SqlValue::Text(payload),
                SqlValue::Integer(to_sql_version(version)),
                expected_param(expected),
            ];
            params.extend(fields);

            let changed = tx.execute(statements.update_sql(), params_from_iter(params.iter()))?;
            if changed == 0 {
                return Err(precondition_failure(
                    tx,
                    statements,
                    table,
                    &object.namespace,
                    &object.name,
                    expected,
                ));
            }

            fetch_version(tx, statements, version)
        })
    }

    /// Soft-delete a live object: set its deletion marker and bump its
    /// version. The row stays until compaction removes it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Conflict` as [`Self::update`] does.
    pub fn delete(&mut self, namespace: &str, name: &str, expected: Option<u64>) -> Result<Row> {
        let table = self.table_name();

        self.mutate("delete", |tx, statements, version| {
            let changed = tx.execute(
                statements.delete_sql(),
                rusqlite::params![namespace, name, to_sql_version(version), expected_param(expected)],
            )?;
            if changed == 0 {
                return Err(precondition_failure(
                    tx, statements, table, namespace, name, expected,
                ));
            }

            fetch_version(tx, statements, version)
        })
    }

    // ========== Read path ==========

    /// Get the live object `namespace/name`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is none.
    pub fn get(&self, namespace: &str, name: &str) -> Result<Row> {
        self.conn
            .query_row(self.statements.get_sql(), [namespace, name], Row::from_sql)
            .optional()?
            .ok_or_else(|| StoreError::NotFound {
                table: self.table_name(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    /// Current meta row: latest version, watermark, lock generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn table_meta(&self) -> Result<TableMeta> {
        read_meta(&self.conn, &self.statements)
    }

    /// Count live rows and tombstones.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn row_counts(&self) -> Result<(usize, usize)> {
        let (live, tombstones): (i64, i64) = self.conn.query_row(
            self.statements.count_rows_sql(),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((
            usize::try_from(live).unwrap_or(0),
            usize::try_from(tombstones).unwrap_or(0),
        ))
    }

    /// List live objects in ascending resource version order.
    ///
    /// `namespace` of `None` lists every namespace. With `options.limit > 0`
    /// at most that many rows are returned, plus a continue token when more
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a filter on an undeclared field and
    /// `InvalidContinueToken` for a malformed token.
    pub fn list(&self, namespace: Option<&str>, options: &ListOptions) -> Result<RowList> {
        let token = options
            .continue_token
            .as_deref()
            .map(ContinueToken::parse)
            .transpose()?;

        let tx = self.conn.unchecked_transaction()?;
        let meta = read_meta(&tx, &self.statements)?;
        let snapshot = token.map_or(meta.latest_version, |t| t.snapshot);
        let after = token.map_or(0, |t| t.after);

        let Some(fixed) = self.fixed_filters(namespace, options)? else {
            return Ok(empty_list(snapshot));
        };
        let mut params = vec![
            fixed.namespace,
            fixed.name,
            SqlValue::Integer(to_sql_version(after)),
            SqlValue::Integer(i64::from(options.include_deleted)),
        ];
        params.extend(fixed.fields);

        let rows = query_rows(&tx, &self.statements.list_sql(options.limit), &params)?;
        tx.finish()?;

        let (rows, more) = trim_page(rows, options.limit);
        let continue_token = more
            .then(|| rows.last())
            .flatten()
            .map(|last| {
                ContinueToken::new(snapshot.max(last.resource_version), last.resource_version)
                    .to_string()
            });

        trace!(table = %self.statements.table(), count = rows.len(), more, "list");
        Ok(RowList {
            rows,
            resource_version: snapshot,
            continue_token,
        })
    }

    /// Every row not yet compacted with a version strictly greater than
    /// `after`, ascending. Tombstones are included so a change feed can
    /// report deletions.
    ///
    /// # Errors
    ///
    /// Returns `Compacted` if `after` is below the compaction watermark, since
    /// history there may be gone.
    pub fn list_after(
        &self,
        namespace: Option<&str>,
        after: u64,
        options: &ListOptions,
    ) -> Result<RowList> {
        let tx = self.conn.unchecked_transaction()?;
        let meta = read_meta(&tx, &self.statements)?;
        if after < meta.watermark {
            return Err(StoreError::Compacted {
                requested: after,
                watermark: meta.watermark,
            });
        }

        let Some(fixed) = self.fixed_filters(namespace, options)? else {
            return Ok(empty_list(meta.latest_version));
        };
        let mut params = vec![
            fixed.namespace,
            fixed.name,
            SqlValue::Integer(to_sql_version(after)),
        ];
        params.extend(fixed.fields);

        let rows = query_rows(&tx, &self.statements.list_after_sql(options.limit), &params)?;
        tx.finish()?;

        let (rows, more) = trim_page(rows, options.limit);
        let continue_token = more
            .then(|| rows.last())
            .flatten()
            .map(|last| {
                let snapshot = meta.latest_version.max(last.resource_version);
                ContinueToken::new(snapshot, last.resource_version).to_string()
            });

        Ok(RowList {
            rows,
            resource_version: meta.latest_version,
            continue_token,
        })
    }

    /// Resolve namespace, name and extra field filter parameters.
    ///
    /// Returns `None` when the namespace argument and a `metadata.namespace`
    /// selector disagree, which no row can satisfy.
    fn fixed_filters(
        &self,
        namespace: Option<&str>,
        options: &ListOptions,
    ) -> Result<Option<FilterParams>> {
        let filters = &options.filters;
        let namespace = match (namespace, filters.get(NAMESPACE_FIELD)) {
            (Some(a), Some(b)) if a != b => return Ok(None),
            (Some(ns), _) | (None, Some(ns)) => SqlValue::Text(ns.to_string()),
            (None, None) => SqlValue::Null,
        };
        let name = filters
            .get(NAME_FIELD)
            .map_or(SqlValue::Null, |n| SqlValue::Text(n.to_string()));

        let mut fields = vec![SqlValue::Null; self.statements.fields().len()];
        for (key, value) in filters.iter() {
            if key == NAMESPACE_FIELD || key == NAME_FIELD {
                continue;
            }
            let position = self.statements.field_position(key).ok_or_else(|| {
                StoreError::InvalidArgument(format!(
                    "field {key:?} is not indexed on {}",
                    self.statements.table()
                ))
            })?;
            fields[position] = SqlValue::Text(value.to_string());
        }

        Ok(Some(FilterParams {
            namespace,
            name,
            fields,
        }))
    }
}

struct FilterParams {
    namespace: SqlValue,
    name: SqlValue,
    fields: Vec<SqlValue>,
}

fn expected_param(expected: Option<u64>) -> SqlValue {
    expected.map_or(SqlValue::Null, |v| SqlValue::Integer(to_sql_version(v)))
}

fn empty_list(resource_version: u64) -> RowList {
    RowList {
        rows: Vec::new(),
        resource_version,
        continue_token: None,
    }
}

/// Drop the look-ahead row fetched by the `limit + 1` query.
fn trim_page(mut rows: Vec<Row>, limit: i64) -> (Vec<Row>, bool) {
    let Ok(limit) = usize::try_from(limit) else {
        return (rows, false);
    };
    if limit == 0 || rows.len() <= limit {
        return (rows, false);
    }
    rows.truncate(limit);
    (rows, true)
}

fn query_rows(conn: &Connection, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), Row::from_sql)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn read_meta(conn: &Connection, statements: &Statements) -> Result<TableMeta> {
    let meta = conn.query_row(statements.table_meta_sql(), [], |row| {
        let latest: i64 = row.get(0)?;
        let watermark: i64 = row.get(1)?;
        let lock_generation: i64 = row.get(2)?;
        Ok(TableMeta {
            latest_version: from_sql_version(latest),
            watermark: from_sql_version(watermark),
            lock_generation: from_sql_version(lock_generation),
        })
    })?;
    Ok(meta)
}

fn fetch_version(tx: &Transaction<'_>, statements: &Statements, version: u64) -> Result<Row> {
    Ok(tx.query_row(
        statements.get_version_sql(),
        [to_sql_version(version)],
        Row::from_sql,
    )?)
}

/// Explain why a conditional update/delete matched no row.
fn precondition_failure(
    tx: &Transaction<'_>,
    statements: &Statements,
    table: String,
    namespace: &str,
    name: &str,
    expected: Option<u64>,
) -> StoreError {
    let current = match tx
        .query_row(statements.get_sql(), [namespace, name], Row::from_sql)
        .optional()
    {
        Ok(current) => current,
        Err(err) => return err.into(),
    };
    match (current, expected) {
        (Some(row), Some(expected)) => StoreError::Conflict {
            table,
            namespace: namespace.to_string(),
            name: name.to_string(),
            expected,
            actual: row.resource_version,
        },
        _ => StoreError::NotFound {
            table,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
    }
}
