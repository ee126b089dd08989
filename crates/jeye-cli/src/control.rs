//! One-shot commands against the approval API.

use crate::display::{level_badge, prompt_block};
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use jeye_core::{ApiError, ApprovalApi, HttpApprovalApi, JEyeConfig};
use jeye_proto::{DecisionKind, DecisionRequest, TrustStatus};
use serde_json::json;

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct DecideArgs {
    /// Prompt id
    pub id: String,

    /// approve, reject or delay
    pub decision: DecisionKind,
}

fn api(config: &JEyeConfig) -> Result<HttpApprovalApi> {
    HttpApprovalApi::new(config.server.clone()).context("Failed to build API client")
}

pub async fn status(config: &JEyeConfig, args: StatusArgs) -> Result<()> {
    let status = api(config)?
        .fetch_status()
        .await
        .context("Status query failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&status_json(&status))?);
        return Ok(());
    }

    let gate = if status.paused {
        "paused".red().bold()
    } else {
        "running".green()
    };
    println!("gate: {gate}");
    match &status.pending {
        Some(prompt) => println!("{}", prompt_block(prompt)),
        None => println!("no prompt pending"),
    }
    Ok(())
}

fn status_json(status: &TrustStatus) -> serde_json::Value {
    json!({
        "paused": status.paused,
        "pending": status.pending,
    })
}

pub async fn decide(config: &JEyeConfig, args: DecideArgs) -> Result<()> {
    let request = DecisionRequest {
        id: args.id,
        decision: args.decision,
    };
    match api(config)?.submit_decision(&request).await {
        Ok(ack) => {
            let recorded = ack.decision.unwrap_or(request.decision);
            println!("{} {} -> {}", "recorded".green(), request.id, recorded);
            Ok(())
        }
        Err(ApiError::AlreadyResolved { recorded }) => {
            match recorded {
                Some(kind) => println!("{} already resolved as {kind}", request.id),
                None => println!("{} was already resolved", request.id),
            }
            Ok(())
        }
        Err(e) => Err(e).context("Decision submission failed"),
    }
}

pub async fn set_paused(config: &JEyeConfig, paused: bool) -> Result<()> {
    let api = api(config)?;
    api.set_paused(paused)
        .await
        .context("Pause toggle failed")?;

    // The pause flag is server-owned; report what the server now says.
    let status = api
        .fetch_status()
        .await
        .context("Status query failed")?;
    if status.paused != paused {
        println!(
            "{} requested, not yet applied by the server",
            if paused { "pause" } else { "resume" }
        );
        return Ok(());
    }
    let state = if paused { "paused".red().bold() } else { "running".green() };
    println!("gate: {state}");
    if let Some(prompt) = &status.pending {
        println!("{} {} still pending", level_badge(prompt.level), prompt.id);
    }
    Ok(())
}
