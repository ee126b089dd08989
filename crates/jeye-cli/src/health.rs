//! Health command for validating client readiness.

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};
use colored::Colorize;
use futures::StreamExt;
use jeye_core::{ApprovalApi, EventSource, HttpApprovalApi, HttpEventSource, JEyeConfig};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Checks, in the order they run.
const CHECKS: [&str; 3] = ["config", "api", "stream"];

/// How long the stream check waits for the first bytes.
const STREAM_PROBE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
pub struct HealthArgs {
    /// Suppress all output except errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Run only specific check(s): config, api, stream
    #[arg(long, value_name = "NAME", action = ArgAction::Append)]
    pub check: Vec<String>,
}

#[derive(Debug)]
struct CheckResult {
    name: &'static str,
    passed: bool,
    detail: String,
}

pub async fn execute(config: &JEyeConfig, args: HealthArgs) -> Result<()> {
    for requested in &args.check {
        if !CHECKS.contains(&requested.as_str()) {
            bail!("unknown check '{requested}' (expected one of: {})", CHECKS.join(", "));
        }
    }

    let mut results = Vec::new();
    for name in CHECKS {
        if !args.check.is_empty() && !args.check.iter().any(|c| c == name) {
            continue;
        }
        let result = match name {
            "config" => check_config(config),
            "api" => check_api(config).await,
            _ => check_stream(config).await,
        };
        if result.passed {
            info!(check = result.name, "Health check passed");
        } else {
            warn!(check = result.name, detail = %result.detail, "Health check failed");
        }
        results.push(result);
    }

    if !args.quiet {
        for result in &results {
            let mark = if result.passed { "ok".green() } else { "FAIL".red().bold() };
            println!("{mark:>4}  {:<7} {}", result.name, result.detail);
        }
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if failed > 0 {
        bail!("{failed} health check(s) failed");
    }
    Ok(())
}

fn check_config(config: &JEyeConfig) -> CheckResult {
    let detail = format!(
        "server {} (token {})",
        config.server.base_url,
        if config.server.token.is_some() { "set" } else { "not set" }
    );
    CheckResult {
        name: "config",
        passed: config.validate().is_ok(),
        detail,
    }
}

async fn check_api(config: &JEyeConfig) -> CheckResult {
    let started = Instant::now();
    let outcome = match HttpApprovalApi::new(config.server.clone()) {
        Ok(api) => api.fetch_status().await.map(|status| {
            format!(
                "status query ok in {}ms (paused={}, pending={})",
                started.elapsed().as_millis(),
                status.paused,
                status.pending.map_or_else(|| "none".to_string(), |p| p.id)
            )
        }),
        Err(e) => Err(e),
    };
    match outcome {
        Ok(detail) => CheckResult {
            name: "api",
            passed: true,
            detail,
        },
        Err(e) => CheckResult {
            name: "api",
            passed: false,
            detail: e.to_string(),
        },
    }
}

async fn check_stream(config: &JEyeConfig) -> CheckResult {
    let source = match HttpEventSource::new(&config.server) {
        Ok(source) => source,
        Err(e) => {
            return CheckResult {
                name: "stream",
                passed: false,
                detail: e.to_string(),
            };
        }
    };

    match source.connect().await {
        Ok(mut stream) => {
            // An idle stream may send nothing for a while; connecting is enough.
            let first = tokio::time::timeout(STREAM_PROBE, stream.next()).await;
            let detail = match first {
                Ok(Some(Err(e))) => {
                    return CheckResult {
                        name: "stream",
                        passed: false,
                        detail: e.to_string(),
                    };
                }
                Ok(Some(Ok(_))) => format!("{} streaming", source.url()),
                Ok(None) => format!("{} connected but closed immediately", source.url()),
                Err(_) => format!("{} connected (idle)", source.url()),
            };
            CheckResult {
                name: "stream",
                passed: true,
                detail,
            }
        }
        Err(e) => CheckResult {
            name: "stream",
            passed: false,
            detail: e.to_string(),
        },
    }
}
