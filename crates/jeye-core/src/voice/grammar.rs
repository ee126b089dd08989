//! Anchored voice command grammar.
//!
//! A command only counts at the start of the utterance, optionally after a
//! wake phrase, so "let's not pause that job" never pauses anything.

use super::VoiceError;
use regex::Regex;

const PAUSE_WORDS: &str = r"pause|stop|halt|freeze";
const RESUME_WORDS: &str = r"resume|continue|unpause|start again|go ahead";

/// A recognized command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoiceCommand {
    Pause,
    Resume,
}

impl VoiceCommand {
    /// The pause flag this command requests.
    pub fn paused(self) -> bool {
        self == Self::Pause
    }
}

/// Matches normalized transcripts against the pause and resume families.
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    pause: Regex,
    resume: Regex,
}

impl CommandGrammar {
    pub fn new(wake_phrases: &[String]) -> Result<Self, VoiceError> {
        let mut phrases: Vec<String> = wake_phrases
            .iter()
            .map(|p| normalize(p))
            .filter(|p| !p.is_empty())
            .collect();
        phrases.sort();
        phrases.dedup();
        // Longest first so "hey j eye" wins over "j eye".
        phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));

        let prefix = if phrases.is_empty() {
            String::new()
        } else {
            let alternatives: Vec<String> = phrases.iter().map(|p| regex::escape(p)).collect();
            format!(r"(?:(?:{})\s+)?", alternatives.join("|"))
        };

        Ok(Self {
            pause: Regex::new(&format!(r"^{prefix}(?:please\s+)?(?:{PAUSE_WORDS})\b"))?,
            resume: Regex::new(&format!(r"^{prefix}(?:please\s+)?(?:{RESUME_WORDS})\b"))?,
        })
    }

    /// Returns the command the utterance starts with, if any.
    pub fn match_command(&self, utterance: &str) -> Option<VoiceCommand> {
        let text = normalize(utterance);
        if self.pause.is_match(&text) {
            Some(VoiceCommand::Pause)
        } else if self.resume.is_match(&text) {
            Some(VoiceCommand::Resume)
        } else {
            None
        }
    }
}

/// Lower-cases, turns punctuation into spaces, and collapses whitespace.
pub fn normalize(utterance: &str) -> String {
    let cleaned: String = utterance
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '\'' {
                c
            } else {
                ' '
            }
        })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}
