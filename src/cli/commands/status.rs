//! Status command: version bookkeeping per table.

use crate::cli::commands::selected_tables;
use crate::cli::{CommandContext, StatusArgs};
use crate::error::Result;
use crate::model::TableMeta;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct TableStatus {
    table: String,
    #[serde(flatten)]
    meta: TableMeta,
    live: usize,
    tombstones: usize,
}

/// Report latest version, watermark and row counts.
///
/// # Errors
///
/// Returns an error if a table cannot be opened or queried.
pub fn execute(args: &StatusArgs, ctx: &CommandContext) -> Result<()> {
    let mut statuses = Vec::new();
    for name in selected_tables(ctx, &args.tables)? {
        let store = ctx.open(&name)?;
        let (live, tombstones) = store.row_counts()?;
        statuses.push(TableStatus {
            table: name,
            meta: store.table_meta()?,
            live,
            tombstones,
        });
    }

    if ctx.json {
        return ctx.print_json(&statuses);
    }
    for s in &statuses {
        println!(
            "{}: latest={} watermark={} live={} tombstones={} lock_generation={}",
            s.table,
            s.meta.latest_version,
            s.meta.watermark,
            s.live,
            s.tombstones,
            s.meta.lock_generation
        );
    }
    Ok(())
}
