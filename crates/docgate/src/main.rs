//! docgate launcher
//!
//! - `serve`: JSON-RPC admission gate on stdio
//! - `check-config`: validate a config file and summarize its tools
//! - `audit verify` / `audit query`: inspect an NDJSON audit trail

mod cli;
mod handler;

use anyhow::Result;
use clap::{Parser, Subcommand};
use docgate_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "docgate", version, about = "Admission gate for document-store tools")]
struct Cli {
    /// Enable verbose logging (debug to stderr and log file)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Gate configuration file
    #[arg(long, global = true, env = "DOCGATE_CONFIG", default_value = "docgate.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve tools over JSON-RPC on stdin/stdout
    Serve,

    /// Validate the configuration and print a summary
    CheckConfig {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect an audit trail
    Audit {
        #[command(subcommand)]
        action: cli::audit::AuditAction,
    },
}

fn run_command(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Serve => cli::serve::run(&cli.config).map(|()| ExitCode::SUCCESS),
        Commands::CheckConfig { json } => {
            cli::check_config::run(&cli.config, json).map(|()| ExitCode::SUCCESS)
        }
        Commands::Audit { action } => cli::audit::run(action),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Only the long-running server keeps a log file
    let serving = matches!(cli.command, Commands::Serve);
    let _log_guard = match init_logging(LogConfig {
        app_name: "docgate",
        verbose: cli.verbose,
        console_only: !serving,
    }) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
            None
        }
    };

    match run_command(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}
