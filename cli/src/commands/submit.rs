// Copyright (c) 2026 Deconflict Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Post an envelope to a running stage server.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use deconflict_core::domain::{
    dispatch::{StageId, ASYNC_HEADER},
    envelope::Envelope,
};

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Envelope JSON (`{"data": [...], "meta": {...}}`)
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Stage server base URL
    #[arg(long, env = "DECONFLICT_URL", default_value = "http://127.0.0.1:8000")]
    pub url: String,

    /// Target stage (update, trigger, risk-eval, threshold, mutate, selector, release)
    #[arg(long, default_value = "update")]
    pub stage: StageId,

    /// Wait for the stage to finish instead of asking for an acknowledgement
    #[arg(long)]
    pub sync: bool,

    /// Request timeout in seconds
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}

pub async fn execute(args: SubmitArgs) -> Result<()> {
    let input = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read envelope {:?}", args.file))?;
    // Decode locally so malformed files never reach the server
    let envelope = Envelope::from_json(&input)
        .with_context(|| format!("Failed to decode envelope {:?}", args.file))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()
        .context("Failed to create HTTP client")?;

    let url = format!("{}{}", args.url.trim_end_matches('/'), args.stage.path());
    let mut request = client.post(&url).json(&envelope);
    if !args.sync {
        request = request.header(ASYNC_HEADER, "true");
    }

    let response = request
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;

    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .context("Failed to decode server response")?;

    if status.is_success() {
        println!(
            "{}",
            format!("✓ {} {} ({})", args.stage, status.as_u16(), url).green()
        );
        println!("{}", serde_json::to_string_pretty(&body)?);
        Ok(())
    } else {
        let kind = body["error"]["kind"].as_str().unwrap_or("unknown");
        let message = body["error"]["message"].as_str().unwrap_or("");
        anyhow::bail!("{} rejected with {} ({}): {}", args.stage, status, kind, message)
    }
}
