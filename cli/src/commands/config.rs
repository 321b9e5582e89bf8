// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use deconflict_core::domain::config::{NegotiatorConfigManifest, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./deconflict-config.yaml)
        #[arg(short, long, default_value = "./deconflict-config.yaml")]
        output: PathBuf,

        /// Include capability profiles and every optional section
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = NegotiatorConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./deconflict-config.yaml");
        println!("  4. ~/.deconflict/config.yaml");
        println!("  5. /etc/deconflict/config.yaml");
        println!();
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    println!("{}", "Negotiation:".bold());
    println!("  Threshold: {}", spec.negotiation.threshold);
    println!("  Max mutations: {}", spec.negotiation.max_mutations);
    println!();

    println!("{}", "Mutation:".bold());
    println!("  Strategies: {:?}", spec.mutation.strategies);
    println!("  Speed reduction: {}", spec.mutation.speed_reduction);
    println!("  Missing profile: {:?}", spec.mutation.missing_profile);
    if let Some(seed) = spec.mutation.seed {
        println!("  Seed: {}", seed);
    }
    println!("  Selection: {:?}", spec.selection.policy);
    println!();

    let capabilities = config.load_capabilities()?;
    println!("{}", "Capability Profiles:".bold());
    if capabilities.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    let mut profiles: Vec<_> = capabilities.iter().collect();
    profiles.sort_by(|a, b| a.0.cmp(b.0));
    for (uav_type, profile) in profiles {
        println!(
            "  {} speed {}..{} bearing ±{}",
            uav_type.bold(),
            profile.min_speed,
            profile.max_speed,
            profile.max_bearing
        );
    }
    println!();

    println!("{}", "Transport:".bold());
    println!("  Dispatch: {}", spec.dispatch.base_url);
    println!(
        "  Release topic: {} (flush {:?})",
        spec.release.topic, spec.release.flush_timeout
    );
    println!("  Recent window: {:?}", spec.storage.recent_ttl);
    println!(
        "  Listen: {}:{}",
        spec.server.bind_address, spec.server.port
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = NegotiatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool) -> Result<()> {
    let sample = if with_examples {
        include_str!("../../templates/config-with-examples.yaml")
    } else {
        include_str!("../../templates/config-minimal.yaml")
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
