//! Command implementations.

use crate::cli::{CommandContext, Commands};
use crate::error::Result;

pub mod compact;
pub mod objects;
pub mod schema;
pub mod status;
pub mod watch;

/// Run one parsed command.
///
/// # Errors
///
/// Returns whatever the command returns.
pub fn dispatch(command: &Commands, ctx: &CommandContext) -> Result<()> {
    match command {
        Commands::Init(args) => schema::init(args, ctx),
        Commands::AddField(args) => schema::add_field(args, ctx),
        Commands::Index(args) => schema::index(args, ctx),
        Commands::Apply(args) => objects::apply(args, ctx),
        Commands::Get(args) => objects::get(args, ctx),
        Commands::Delete(args) => objects::delete(args, ctx),
        Commands::List(args) => objects::list(args, ctx),
        Commands::Status(args) => status::execute(args, ctx),
        Commands::Compact(args) => compact::execute(args, ctx),
        Commands::Watch(args) => watch::execute(args, ctx),
    }
}

/// Tables named on the command line, or every declared table.
fn selected_tables(ctx: &CommandContext, named: &[String]) -> Result<Vec<String>> {
    if !named.is_empty() {
        return Ok(named.to_vec());
    }
    let declared: Vec<String> = ctx.config.tables.keys().cloned().collect();
    if declared.is_empty() {
        return Err(crate::error::StoreError::InvalidArgument(
            "no tables named and none declared in the config".to_string(),
        ));
    }
    Ok(declared)
}
