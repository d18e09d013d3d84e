//! Compact command.

use crate::cli::{CommandContext, CompactArgs};
use crate::error::Result;

/// Advance the watermark (when `--watermark` is given), clear creation flags
/// and remove tombstones at or below it.
///
/// # Errors
///
/// Returns `InvalidArgument` if the watermark is beyond the latest version.
pub fn execute(args: &CompactArgs, ctx: &CommandContext) -> Result<()> {
    let mut store = ctx.open(&args.table)?;
    let target = match args.watermark {
        Some(watermark) => watermark,
        None => store.table_meta()?.watermark,
    };
    let stats = store.compact_to(target)?;

    if ctx.json {
        return ctx.print_json(&stats);
    }
    println!(
        "{}: watermark={} removed={} cleared={}",
        args.table, stats.watermark, stats.removed, stats.cleared
    );
    Ok(())
}
