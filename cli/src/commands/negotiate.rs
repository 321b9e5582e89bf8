// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Run one negotiation in process against a self-report file.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use deconflict_core::{
    application::{NegotiationOutcome, NegotiationReport, NegotiationServices, NegotiationWorkflow},
    domain::{config::NegotiatorConfigManifest, envelope::Envelope, trajectory::TrajectorySet},
    infrastructure::{EventBus, ProjectionOracle},
};

#[derive(Args, Debug)]
pub struct NegotiateArgs {
    /// Envelope JSON (`{"data": [...], "meta": {...}}`)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Print the full report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: NegotiateArgs, config_path: Option<PathBuf>) -> Result<()> {
    let config = NegotiatorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;

    let input = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read envelope {:?}", args.file))?;
    let envelope = Envelope::from_json(&input)
        .with_context(|| format!("Failed to decode envelope {:?}", args.file))?;

    let services = NegotiationServices::from_config(
        &config,
        Arc::new(ProjectionOracle::new()),
        Arc::new(EventBus::with_default_capacity()),
    )?;
    let report = NegotiationWorkflow::new(Arc::new(services))
        .run(envelope)
        .context("Negotiation failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &NegotiationReport) {
    let meta = report.meta();
    println!("Request: {}", meta.request_label().bold());

    match &report.outcome {
        NegotiationOutcome::NoActionRequired { .. } => {
            println!("{}", "✓ No conflict predicted, nothing to release".green());
        }
        NegotiationOutcome::Released { set, .. } => {
            println!(
                "{}",
                format!(
                    "✓ Resolved after {} mutation(s)",
                    meta.mutation_count.unwrap_or(0)
                )
                .green()
            );
            print_set(set);
        }
        NegotiationOutcome::Rejected { reason, .. } => {
            println!("{} {}", "✗ Rejected:".red(), reason);
        }
    }

    println!("Transitions: {}", report.transitions.len());
}

fn print_set(set: &TrajectorySet) {
    for record in set.records() {
        let marker = match record.mutation_cases {
            Some(case) => format!("[{}]", case.code()).yellow().to_string(),
            None => String::new(),
        };
        println!(
            "  {} {:<12} speed {:>7.2} heading {:>6.1} {}",
            record.uav_id, record.uav_type, record.speed, record.direction, marker
        );
    }
}
