//! Watch command: stream change events as JSON lines.

use crate::cli::{CommandContext, WatchArgs};
use crate::error::Result;
use crate::model::FieldFilter;
use crate::watch::{self, WatchEvent, WatchOptions};
use tracing::info;

/// Stream events until `--max-events` is reached, the feed fails, or the
/// process is interrupted.
///
/// # Errors
///
/// Returns `Compacted` if `--since` is below the watermark, or any error the
/// feed reports.
pub fn execute(args: &WatchArgs, ctx: &CommandContext) -> Result<()> {
    let filters = args
        .field_selector
        .as_deref()
        .map(str::parse::<FieldFilter>)
        .transpose()?
        .unwrap_or_default();
    let options = WatchOptions {
        resource_version: args.since,
        filters,
        allow_bookmarks: args.bookmarks,
        bookmark_every: ctx.config.watch.bookmark_every,
        ..WatchOptions::default()
    };

    let table = ctx.config.table(&args.table);
    let handle = watch::spawn(&ctx.config, &table, args.namespace.as_deref(), options)?;

    let mut delivered = 0usize;
    for event in handle.events() {
        let event = event?;
        print_event(&event, ctx.json)?;
        delivered += 1;
        if args.max_events.is_some_and(|max| delivered >= max) {
            break;
        }
    }

    info!(table = %args.table, delivered, "watch finished");
    handle.cancel();
    Ok(())
}

fn print_event(event: &WatchEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        WatchEvent::Added(row) | WatchEvent::Modified(row) | WatchEvent::Deleted(row) => {
            println!(
                "{}\t{}\t{}/{}",
                event.kind(),
                row.resource_version,
                row.namespace,
                row.name
            );
        }
        WatchEvent::Bookmark { resource_version } => {
            println!("{}\t{resource_version}", event.kind());
        }
    }
    Ok(())
}
