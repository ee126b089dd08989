//! `jeye watch`: mounts the widget and answers prompts from stdin.

use crate::display::Renderer;
use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use jeye_core::{
    ApiError, HttpApprovalApi, HttpEventSource, JEyeConfig, MountedWidget, StatusManager, SubmitOutcome,
    TrustWidget, VoiceHandle,
};
use jeye_proto::DecisionKind;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Parser, Debug)]
pub struct WatchArgs {
    /// Also write .jeye-status.json and .jeye-status.md into this directory
    #[arg(long, value_name = "DIR")]
    pub status_dir: Option<PathBuf>,
}

/// A line typed at the watch prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Decide(DecisionKind),
    Pause(bool),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.to_ascii_lowercase().as_str() {
        "pause" | "p" => Some(Command::Pause(true)),
        "resume" | "u" => Some(Command::Pause(false)),
        "help" | "h" | "?" => Some(Command::Help),
        "quit" | "q" | "exit" => Some(Command::Quit),
        other => other.parse().ok().map(Command::Decide),
    }
}

const HELP: &str = "commands: a/approve  r/reject  d/delay  p/pause  u/resume  q/quit";

/// Builds the widget and its HTTP collaborators from config.
pub fn build_widget(config: &JEyeConfig) -> Result<(TrustWidget, Arc<HttpEventSource>)> {
    let api = HttpApprovalApi::new(config.server.clone()).context("Failed to build API client")?;
    let source =
        HttpEventSource::new(&config.server).context("Failed to build event stream client")?;
    let widget = TrustWidget::new(Arc::new(api), config.feed.capacity);
    Ok((widget, Arc::new(source)))
}

/// Mounts `widget` and prints every visible change until the task is aborted.
pub fn mount_with_renderer(
    widget: &TrustWidget,
    source: Arc<HttpEventSource>,
    config: &JEyeConfig,
    voice: Option<VoiceHandle>,
    status_dir: Option<PathBuf>,
) -> (MountedWidget, JoinHandle<()>) {
    let mut changes = widget.changes();
    let mounted = widget.mount(source, &config.stream, voice);

    let view = widget.clone();
    let status = status_dir.map(|dir| StatusManager::new(&dir));
    let renderer = tokio::spawn(async move {
        let mut renderer = Renderer::new();
        loop {
            let snapshot = view.snapshot();
            for line in renderer.render(&snapshot) {
                println!("{line}");
            }
            if let Some(status) = &status {
                status.update(&snapshot);
            }
            if changes.changed().await.is_err() {
                break;
            }
        }
    });
    (mounted, renderer)
}

pub async fn execute(config: &JEyeConfig, args: WatchArgs) -> Result<()> {
    let (widget, source) = build_widget(config)?;
    let (mounted, renderer) = mount_with_renderer(&widget, source, config, None, args.status_dir);
    println!("{}", HELP.dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else { break };

        match parse_command(&line) {
            Some(Command::Quit) => break,
            Some(Command::Help) => println!("{HELP}"),
            Some(Command::Decide(kind)) => report_decision(&widget, kind).await,
            Some(Command::Pause(paused)) => {
                if let Err(e) = widget.toggle_pause(paused).await {
                    eprintln!(
                        "{} {e}; {}",
                        "pause toggle failed:".red(),
                        failure_hint(&e, "the gate kept its confirmed state")
                    );
                }
            }
            None if line.trim().is_empty() => {}
            None => println!("unknown command: {}. {HELP}", line.trim()),
        }
    }

    debug!("Leaving watch");
    mounted.unmount().await;
    renderer.abort();
    Ok(())
}

async fn report_decision(widget: &TrustWidget, kind: DecisionKind) {
    match widget.decide(kind).await {
        Ok(SubmitOutcome::Resolved(recorded)) if recorded != kind => {
            println!("{} server recorded {recorded}", "note:".yellow());
        }
        Ok(SubmitOutcome::Resolved(_)) => {}
        Ok(SubmitOutcome::AlreadyResolved) => println!("prompt was already resolved"),
        Ok(SubmitOutcome::InFlight) => println!("a decision is already being submitted"),
        Ok(SubmitOutcome::NotPending) => println!("no prompt is pending"),
        Ok(SubmitOutcome::NotOffered) => println!("{kind} is not offered for this prompt"),
        Err(e) => eprintln!(
            "{} {e}; {}",
            "decision failed:".red(),
            failure_hint(&e, "the prompt is still pending")
        ),
    }
}

/// What the operator should do after a failed request.
fn failure_hint(error: &ApiError, state: &str) -> String {
    if error.is_transient() {
        format!("{state}, try again")
    } else {
        format!("{state}, the server refused the request")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("a"), Some(Command::Decide(DecisionKind::Approve)));
        assert_eq!(parse_command(" Reject "), Some(Command::Decide(DecisionKind::Reject)));
        assert_eq!(parse_command("delay"), Some(Command::Decide(DecisionKind::Delay)));
        assert_eq!(parse_command("pause"), Some(Command::Pause(true)));
        assert_eq!(parse_command("resume"), Some(Command::Pause(false)));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(parse_command("launch"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_failure_hint_separates_retryable_errors() {
        let unavailable = ApiError::Status {
            url: "http://jeye.local/api/trust/decision".into(),
            status: 503,
            body: String::new(),
        };
        let refused = ApiError::Status {
            url: "http://jeye.local/api/trust/decision".into(),
            status: 400,
            body: "unknown option".into(),
        };
        assert_eq!(
            failure_hint(&unavailable, "the prompt is still pending"),
            "the prompt is still pending, try again"
        );
        assert!(failure_hint(&refused, "the prompt is still pending").ends_with("refused the request"));
    }
}
