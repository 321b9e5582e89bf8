// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Deconflict CLI
//!
//! The `deconflict` binary serves the negotiation stages over HTTP and runs
//! negotiations locally.
//!
//! ## Commands
//!
//! - `deconflict serve` - Serve all stages, the release log and health check
//! - `deconflict negotiate <FILE>` - Run the full cycle in process on a self-report
//! - `deconflict submit <FILE>` - Post a self-report to a running server
//! - `deconflict config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use deconflict::commands::{self, ConfigCommand};

/// Deconflict - negotiate conflict-free UAV trajectories
#[derive(Parser)]
#[command(name = "deconflict")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "DECONFLICT_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DECONFLICT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "DECONFLICT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the negotiation stages over HTTP
    #[command(name = "serve")]
    Serve {
        #[command(flatten)]
        args: commands::serve::ServeArgs,
    },

    /// Run a negotiation in process and print the outcome
    #[command(name = "negotiate")]
    Negotiate {
        #[command(flatten)]
        args: commands::negotiate::NegotiateArgs,
    },

    /// Submit a self-report to a running server
    #[command(name = "submit")]
    Submit {
        #[command(flatten)]
        args: commands::submit::SubmitArgs,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_json)?;

    match cli.command {
        Some(Commands::Serve { args }) => commands::serve::execute(args, cli.config).await,
        Some(Commands::Negotiate { args }) => commands::negotiate::execute(args, cli.config).await,
        Some(Commands::Submit { args }) => commands::submit::execute(args).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
