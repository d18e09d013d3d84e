//! Command-line interface for the `rvs` binary.

use crate::config::Config;
use crate::error::Result;
use crate::storage::SqliteStore;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;

pub mod commands;

#[derive(Parser, Debug)]
#[command(name = "rvs")]
#[command(version)]
#[command(about = "Versioned SQL storage and watch engine")]
#[command(long_about = r"
rvs stores JSON resource objects in SQLite tables with a table-wide,
gap-free resource version per write.

Example usage:
  rvs init widgets
  rvs apply widgets --file widget.json
  rvs list widgets --field-selector spec.color=red --limit 10
  rvs watch widgets --since 42
")]
pub struct Cli {
    /// Config file (defaults to ./rvstore.yaml)
    #[arg(long, global = true, env = "RVSTORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the config
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create tables (all declared tables when none are named)
    Init(InitArgs),

    /// Add the column backing an extra field
    AddField(AddFieldArgs),

    /// Build or drop the composite field index
    Index(IndexArgs),

    /// Create or update an object from a JSON document
    Apply(ApplyArgs),

    /// Show one live object
    Get(ObjectArgs),

    /// Soft-delete an object
    Delete(DeleteArgs),

    /// List objects
    List(ListArgs),

    /// Show version bookkeeping for tables
    Status(StatusArgs),

    /// Advance the watermark and remove old tombstones
    Compact(CompactArgs),

    /// Stream changes
    Watch(WatchArgs),
}

#[derive(Args, Debug, Default)]
pub struct InitArgs {
    /// Tables to create
    pub tables: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AddFieldArgs {
    pub table: String,

    /// Dotted payload path, e.g. spec.color
    pub field: String,
}

#[derive(Args, Debug)]
pub struct IndexArgs {
    pub table: String,

    /// Fields to index (defaults to the table's declared fields)
    pub fields: Vec<String>,

    /// Drop the index instead; columns are kept
    #[arg(long)]
    pub drop: bool,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    pub table: String,

    /// JSON document to read, or - for stdin
    #[arg(short, long, default_value = "-")]
    pub file: PathBuf,

    /// Namespace (defaults to metadata.namespace in the document)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Name (defaults to metadata.name in the document)
    #[arg(long)]
    pub name: Option<String>,

    /// Only update if the stored version still equals this
    #[arg(long)]
    pub expected_version: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ObjectArgs {
    pub table: String,

    pub name: String,

    #[arg(short, long, default_value = "")]
    pub namespace: String,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub object: ObjectArgs,

    /// Only delete if the stored version still equals this
    #[arg(long)]
    pub expected_version: Option<u64>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    pub table: String,

    /// Restrict to one namespace (all namespaces when omitted)
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Equality selectors, e.g. spec.color=red,metadata.name=a
    #[arg(long)]
    pub field_selector: Option<String>,

    /// Page size; 0 lists everything
    #[arg(long, default_value_t = 0)]
    pub limit: i64,

    /// Continue token from a previous page
    #[arg(long = "continue")]
    pub continue_token: Option<String>,

    /// Include soft-deleted rows
    #[arg(long)]
    pub include_deleted: bool,
}

#[derive(Args, Debug, Default)]
pub struct StatusArgs {
    /// Tables to report (all declared tables when none are named)
    pub tables: Vec<String>,
}

#[derive(Args, Debug)]
pub struct CompactArgs {
    pub table: String,

    /// Raise the watermark to this version first
    #[arg(long)]
    pub watermark: Option<u64>,
}

#[derive(Args, Debug)]
pub struct WatchArgs {
    pub table: String,

    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Resume after this resource version instead of starting with a snapshot
    #[arg(long)]
    pub since: Option<u64>,

    #[arg(long)]
    pub field_selector: Option<String>,

    /// Emit bookmark events while idle
    #[arg(long)]
    pub bookmarks: bool,

    /// Exit after this many events
    #[arg(long)]
    pub max_events: Option<usize>,

    /// Poll interval in milliseconds, overriding the config
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

/// Resolved settings shared by every command.
#[derive(Debug)]
pub struct CommandContext {
    pub config: Config,
    pub json: bool,
}

impl CommandContext {
    #[must_use]
    pub const fn new(config: Config, json: bool) -> Self {
        Self { config, json }
    }

    /// Open `table` in the configured database, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is unsafe or the database cannot be
    /// opened.
    pub fn open(&self, table: &str) -> Result<SqliteStore> {
        let table = self.config.table(table);
        SqliteStore::open(&self.config.database, &table, self.config.busy_timeout())
    }

    /// Print `value` as pretty JSON on stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
