//! Schema commands: `init`, `add-field` and `index`.

use crate::cli::commands::selected_tables;
use crate::cli::{AddFieldArgs, CommandContext, IndexArgs, InitArgs};
use crate::error::Result;
use crate::storage::schema;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
struct TableReport {
    table: String,
    fields: Vec<String>,
    lock: bool,
}

/// Create the named tables, or every declared one.
///
/// # Errors
///
/// Returns an error if a table name is unsafe or the DDL fails.
pub fn init(args: &InitArgs, ctx: &CommandContext) -> Result<()> {
    let mut reports = Vec::new();
    for name in selected_tables(ctx, &args.tables)? {
        let store = ctx.open(&name)?;
        let statements = store.statements();
        reports.push(TableReport {
            table: statements.table().to_string(),
            fields: statements
                .fields()
                .iter()
                .map(|f| f.source().to_string())
                .collect(),
            lock: statements.lock_enabled(),
        });
        info!(table = %name, "initialized");
    }

    if ctx.json {
        return ctx.print_json(&reports);
    }
    for report in &reports {
        if report.fields.is_empty() {
            println!("{}: ready", report.table);
        } else {
            println!("{}: ready (fields: {})", report.table, report.fields.join(", "));
        }
    }
    Ok(())
}

/// Add one field column to an existing table.
///
/// # Errors
///
/// Returns `InvalidIdentifier` for an unsafe path, or a database error.
pub fn add_field(args: &AddFieldArgs, ctx: &CommandContext) -> Result<()> {
    let store = ctx.open(&args.table)?;
    let added = schema::add_column(store.connection(), store.statements(), &args.field)?;

    let declared = ctx
        .config
        .table(&args.table)
        .fields
        .iter()
        .any(|f| f == &args.field);
    if !declared {
        warn!(
            table = %args.table,
            field = %args.field,
            "field is not declared in the config; writes will leave it NULL"
        );
    }

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "table": args.table,
            "field": args.field,
            "added": added,
        }));
    }
    if added {
        println!("{}: added {}", args.table, args.field);
    } else {
        println!("{}: {} already present", args.table, args.field);
    }
    Ok(())
}

/// Build or drop the composite field index.
///
/// # Errors
///
/// Returns `InvalidIdentifier` for an unsafe path, or a database error.
pub fn index(args: &IndexArgs, ctx: &CommandContext) -> Result<()> {
    let store = ctx.open(&args.table)?;
    let (conn, statements) = (store.connection(), store.statements());

    if args.drop {
        schema::drop_fields_index(conn, statements)?;
        if ctx.json {
            return ctx.print_json(&serde_json::json!({"table": args.table, "dropped": true}));
        }
        println!("{}: field index dropped", args.table);
        return Ok(());
    }

    let fields = if args.fields.is_empty() {
        ctx.config.table(&args.table).fields
    } else {
        args.fields.clone()
    };
    for field in &fields {
        schema::add_column(conn, statements, field)?;
    }
    let built = schema::add_fields_index(conn, statements, &fields)?;

    if ctx.json {
        return ctx.print_json(&serde_json::json!({
            "table": args.table,
            "fields": fields,
            "built": built,
        }));
    }
    let indexed: Vec<&str> = fields.iter().map(String::as_str).filter(|f| !f.is_empty()).collect();
    if indexed.is_empty() {
        println!("{}: no fields to index", args.table);
    } else if built {
        println!("{}: field index on {}", args.table, indexed.join(", "));
    } else {
        println!("{}: field index on {} already present", args.table, indexed.join(", "));
    }
    Ok(())
}
