//! `jeye` - terminal front-end for the J-Eye trust gate.
//!
//! Subcommands:
//! - `watch`: live feed and prompt modal, decisions typed on stdin
//! - `voice`: like `watch`, with stdin lines treated as spoken commands
//! - `status`, `decide`, `pause`, `resume`: one-shot API calls
//! - `health`: configuration and server reachability checks

mod control;
mod display;
mod health;
mod voice_cli;
mod watch;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use jeye_core::JEyeConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "jeye", version, about = "Trust-gated approval client for home-automation agents")]
struct Cli {
    /// Config file (default: jeye.yml or jeye.yaml in the current directory)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server base URL, overriding config and JEYE_SERVER_URL
    #[arg(long, global = true, value_name = "URL")]
    server: Option<String>,

    /// Bearer token, overriding config and JEYE_TOKEN
    #[arg(long, global = true, value_name = "TOKEN")]
    token: Option<String>,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the activity feed and answer prompts
    Watch(watch::WatchArgs),

    /// Watch with voice commands read from stdin
    Voice(voice_cli::VoiceArgs),

    /// Show the pending prompt and pause state
    Status(control::StatusArgs),

    /// Resolve a prompt by id
    Decide(control::DecideArgs),

    /// Pause all agents
    Pause,

    /// Resume all agents
    Resume,

    /// Check configuration and server reachability
    Health(health::HealthArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    if cli.no_color {
        colored::control::set_override(false);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Watch(args) => watch::execute(&config, args).await,
        Commands::Voice(args) => voice_cli::execute(&config, args).await,
        Commands::Status(args) => control::status(&config, args).await,
        Commands::Decide(args) => control::decide(&config, args).await,
        Commands::Pause => control::set_paused(&config, true).await,
        Commands::Resume => control::set_paused(&config, false).await,
        Commands::Health(args) => health::execute(&config, args).await,
    }
}

fn init_tracing(verbose: u8) {
    let default_level = if verbose > 0 { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Resolves config: file, then environment, then command-line flags.
fn load_config(cli: &Cli) -> Result<JEyeConfig> {
    let config = match &cli.config {
        Some(path) => JEyeConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            JEyeConfig::discover(&cwd).context("Failed to load config")?
        }
    };
    let config = config
        .with_env_overrides()
        .with_overrides(cli.server.clone(), cli.token.clone());
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["jeye", "status", "--json", "--server", "http://hub:9000", "-vv"])
            .unwrap();
        assert_eq!(cli.server.as_deref(), Some("http://hub:9000"));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Status(ref args) if args.json));
    }

    #[test]
    fn test_decide_rejects_unknown_decision() {
        assert!(Cli::try_parse_from(["jeye", "decide", "p1", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["jeye", "decide", "p1", "approve"]).is_ok());
    }

    #[test]
    fn test_server_flag_overrides_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("jeye.yml");
        std::fs::write(&path, "server:\n  base_url: http://from-file:1\n").unwrap();

        let cli = Cli::try_parse_from([
            "jeye",
            "--config",
            path.to_str().unwrap(),
            "--server",
            "http://from-flag:2",
            "pause",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.server.base_url, "http://from-flag:2");
    }
}
