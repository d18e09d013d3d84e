//! History compaction.
//!
//! The watermark is the highest resource version compaction covers. Rows
//! above it are never touched and live rows are never removed; tombstones at
//! or below it are physically deleted, and creation flags at or below it are
//! cleared. A change feed may resume from any version at or above the
//! watermark; below it, `list_after` fails with `Compacted`.
//!
//! The caller owns advancing the watermark: it must lag the oldest version
//! any live watcher may still resume from.

use crate::error::{Result, StoreError};
use crate::model::to_sql_version;
use crate::storage::sqlite::{SqliteStore, read_meta};
use rusqlite::TransactionBehavior;
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of a compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionStats {
    pub watermark: u64,
    /// Rows whose creation flag was cleared.
    pub cleared: usize,
    /// Tombstones physically removed.
    pub removed: usize,
}

impl SqliteStore {
    /// Clear creation flags at or below the watermark. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub fn clear_created(&mut self) -> Result<usize> {
        self.transaction(TransactionBehavior::Immediate, |tx, statements| {
            let meta = read_meta(tx, statements)?;
            let cleared = tx.execute(
                statements.clear_created_sql(),
                [to_sql_version(meta.watermark)],
            )?;
            debug!(table = %statements.table(), cleared, "cleared creation flags");
            Ok(cleared)
        })
    }

    /// Raise the compaction watermark to `watermark`.
    ///
    /// Returns `false` without writing when `watermark` is not greater than
    /// the current one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `watermark` is beyond the table's latest
    /// resource version.
    pub fn advance_watermark(&mut self, watermark: u64) -> Result<bool> {
        self.transaction(TransactionBehavior::Immediate, |tx, statements| {
            advance(tx, statements, watermark)
        })
    }

    /// Remove tombstones at or below the watermark. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn compact(&mut self) -> Result<CompactionStats> {
        self.transaction(TransactionBehavior::Immediate, |tx, statements| {
            let meta = read_meta(tx, statements)?;
            let removed = tx.execute(statements.compact_sql(), [to_sql_version(meta.watermark)])?;
            info!(
                table = %statements.table(),
                watermark = meta.watermark,
                removed,
                "compacted"
            );
            Ok(CompactionStats {
                watermark: meta.watermark,
                cleared: 0,
                removed,
            })
        })
    }

    /// Advance the watermark to `target` (if higher), clear creation flags and
    /// remove tombstones, all in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `target` is beyond the latest version.
    pub fn compact_to(&mut self, target: u64) -> Result<CompactionStats> {
        self.transaction(TransactionBehavior::Immediate, |tx, statements| {
            advance(tx, statements, target)?;
            let meta = read_meta(tx, statements)?;
            let watermark = to_sql_version(meta.watermark);
            let cleared = tx.execute(statements.clear_created_sql(), [watermark])?;
            let removed = tx.execute(statements.compact_sql(), [watermark])?;
            info!(
                table = %statements.table(),
                watermark = meta.watermark,
                cleared,
                removed,
                "compaction pass finished"
            );
            Ok(CompactionStats {
                watermark: meta.watermark,
                cleared,
                removed,
            })
        })
    }
}

fn advance(
    tx: &rusqlite::Transaction<'_>,
    statements: &crate::storage::statements::Statements,
    watermark: u64,
) -> Result<bool> {
    let meta = read_meta(tx, statements)?;
    if watermark > meta.latest_version {
        return Err(StoreError::InvalidArgument(format!(
            "watermark {watermark} is beyond the latest resource version {}",
            meta.latest_version
        )));
    }
    if watermark <= meta.watermark {
        debug!(
            table = %statements.table(),
            current = meta.watermark,
            requested = watermark,
            "watermark not advanced"
        );
        return Ok(false);
    }
    let changed = tx.execute(
        statements.update_compaction_sql(),
        [to_sql_version(watermark)],
    )?;
    Ok(changed > 0)
}
