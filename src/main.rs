//! `rvs` - operator CLI for the rvstore engine.

use anyhow::Context;
use clap::Parser;
use rvstore::StoreError;
use rvstore::cli::commands::dispatch;
use rvstore::cli::{Cli, CommandContext, Commands};
use rvstore::config::{CliOverrides, Config};
use rvstore::logging::init_logging;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.quiet, cli.log_file.as_deref()) {
        eprintln!("error: failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    let json = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err, json);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = CliOverrides {
        db: cli.db.clone(),
        poll_interval_ms: match &cli.command {
            Commands::Watch(args) => args.poll_interval_ms,
            _ => None,
        },
        ..CliOverrides::default()
    };
    let config =
        Config::load(cli.config.as_deref(), &overrides).context("failed to load configuration")?;
    let ctx = CommandContext::new(config, cli.json);
    dispatch(&cli.command, &ctx)?;
    Ok(())
}

fn report(err: &anyhow::Error, json: bool) {
    let code = err
        .downcast_ref::<StoreError>()
        .or_else(|| err.chain().find_map(|e| e.downcast_ref::<StoreError>()))
        .map_or("INTERNAL", |e| e.code().as_str());
    if json {
        let body = serde_json::json!({
            "error": { "code": code, "message": format!("{err:#}") }
        });
        eprintln!("{body}");
    } else {
        eprintln!("error[{code}]: {err:#}");
    }
}
