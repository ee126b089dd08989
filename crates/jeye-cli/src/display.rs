//! Terminal rendering of widget snapshots.

use colored::{ColoredString, Colorize};
use jeye_core::{FeedEntry, GateStatus, StreamStatus, WidgetSnapshot};
use jeye_proto::{DecisionKind, TrustLevel, TrustPrompt};
use std::fmt::Write as _;

pub fn level_badge(level: TrustLevel) -> ColoredString {
    let text = format!("[{level}]");
    match level {
        TrustLevel::Low => text.green(),
        TrustLevel::Elevated => text.yellow(),
        TrustLevel::Critical => text.red().bold(),
    }
}

pub fn gate_badge(status: GateStatus, tentative: bool) -> ColoredString {
    let text = if tentative {
        format!("{status} (pending)")
    } else {
        status.to_string()
    };
    match status {
        GateStatus::Running => text.green(),
        GateStatus::AwaitingDecision => text.yellow().bold(),
        GateStatus::Paused => text.red().bold(),
    }
}

pub fn stream_badge(status: &StreamStatus) -> ColoredString {
    match status {
        StreamStatus::Connecting => "connecting".yellow(),
        StreamStatus::Connected => "connected".green(),
        StreamStatus::Disconnected => "disconnected".dimmed(),
        StreamStatus::Error(message) => format!("error: {message}").red(),
    }
}

pub fn feed_line(entry: &FeedEntry) -> String {
    format!(
        "{} {:<16} {}",
        entry.timestamp.format("%H:%M:%S").to_string().dimmed(),
        entry.kind.as_str().cyan(),
        entry.summary
    )
}

/// The confirmation modal as text.
pub fn prompt_block(prompt: &TrustPrompt) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} {}",
        level_badge(prompt.level),
        prompt.title.bold(),
        format!("({})", prompt.id).dimmed()
    );
    if let Some(rationale) = &prompt.rationale {
        let _ = writeln!(out, "    {rationale}");
    }
    let choices: Vec<String> = prompt
        .options
        .iter()
        .map(|kind| format!("[{}] {}", shortcut(*kind), kind.label()))
        .collect();
    let _ = write!(out, "    {}", choices.join("  "));
    out
}

fn shortcut(kind: DecisionKind) -> char {
    match kind {
        DecisionKind::Approve => 'a',
        DecisionKind::Reject => 'r',
        DecisionKind::Delay => 'd',
    }
}

/// Prints only what changed between consecutive snapshots.
#[derive(Debug, Default)]
pub struct Renderer {
    last_feed_top: Option<String>,
    last_prompt: Option<String>,
    last_gate: Option<(GateStatus, bool)>,
    last_stream: Option<StreamStatus>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines to print for `snapshot`.
    pub fn render(&mut self, snapshot: &WidgetSnapshot) -> Vec<String> {
        let mut lines = Vec::new();

        if self.last_stream.as_ref() != Some(&snapshot.stream) {
            lines.push(format!("stream: {}", stream_badge(&snapshot.stream)));
            self.last_stream = Some(snapshot.stream.clone());
        }

        let unseen: Vec<&FeedEntry> = snapshot
            .feed
            .iter()
            .take_while(|entry| Some(&entry.id) != self.last_feed_top.as_ref())
            .collect();
        lines.extend(unseen.iter().rev().map(|entry| feed_line(entry)));
        if let Some(top) = snapshot.feed.first() {
            self.last_feed_top = Some(top.id.clone());
        }

        let gate = (snapshot.status, snapshot.tentative);
        if self.last_gate != Some(gate) {
            lines.push(format!("gate: {}", gate_badge(snapshot.status, snapshot.tentative)));
            self.last_gate = Some(gate);
        }

        let prompt_id = snapshot.prompt.as_ref().map(|p| p.id.clone());
        if prompt_id != self.last_prompt {
            match &snapshot.prompt {
                Some(prompt) if !snapshot.waiting.is_empty() => lines.push(format!(
                    "{}\n    {}",
                    prompt_block(prompt),
                    format!("{} more waiting", snapshot.waiting.len()).dimmed()
                )),
                Some(prompt) => lines.push(prompt_block(prompt)),
                None => lines.push("prompt cleared".dimmed().to_string()),
            }
            self.last_prompt = prompt_id;
        }

        lines
    }
}
