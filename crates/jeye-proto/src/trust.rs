//! Trust protocol types: prompts, decisions and the global pause flag.

use crate::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned risk tier attached to an agent action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum TrustLevel {
    /// Tier 1: informational, the agent may proceed.
    Low = 1,
    /// Tier 2: elevated risk.
    Elevated = 2,
    /// Tier 3: explicit human confirmation required.
    Critical = 3,
}

impl TrustLevel {
    /// Returns true for the tier that blocks until a human decides.
    pub fn requires_confirmation(self) -> bool {
        self == Self::Critical
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for TrustLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Low),
            2 => Ok(Self::Elevated),
            3 => Ok(Self::Critical),
            other => Err(Error::InvalidTrustLevel(other)),
        }
    }
}

impl From<TrustLevel> for u8 {
    fn from(level: TrustLevel) -> Self {
        level.as_u8()
    }
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.as_u8())
    }
}

/// The human's resolution of a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionKind {
    Approve,
    Reject,
    /// Defers the action; the server re-offers it later as a new prompt.
    Delay,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 3] = [Self::Approve, Self::Reject, Self::Delay];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Delay => "delay",
        }
    }

    /// Button label shown on the confirmation modal.
    pub fn label(self) -> &'static str {
        match self {
            Self::Approve => "Confirm & Proceed",
            Self::Reject => "Reject",
            Self::Delay => "Delay",
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" | "a" => Ok(Self::Approve),
            "reject" | "r" => Ok(Self::Reject),
            "delay" | "d" => Ok(Self::Delay),
            other => Err(Error::UnknownDecision(other.to_string())),
        }
    }
}

fn all_decisions() -> Vec<DecisionKind> {
    DecisionKind::ALL.to_vec()
}

/// A server-issued request for a human decision before an action proceeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustPrompt {
    pub id: String,
    pub level: TrustLevel,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(default = "all_decisions")]
    pub options: Vec<DecisionKind>,
    #[serde(
        default = "Utc::now",
        deserialize_with = "crate::timestamp::deserialize_or_now"
    )]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl TrustPrompt {
    /// Creates a prompt offering every decision.
    pub fn new(id: impl Into<String>, level: TrustLevel, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level,
            title: title.into(),
            rationale: None,
            options: all_decisions(),
            created_at: Utc::now(),
            meta: None,
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<DecisionKind>) -> Self {
        self.options = options;
        self
    }

    /// Returns true if the operator may answer with `kind`.
    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.options.contains(&kind)
    }
}

/// A decision produced client-side, exactly once per prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub prompt_id: String,
    pub decision: DecisionKind,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(prompt_id: impl Into<String>, decision: DecisionKind) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            decision,
            decided_at: Utc::now(),
        }
    }

    /// The body sent to the decision endpoint.
    pub fn to_request(&self) -> DecisionRequest {
        DecisionRequest {
            id: self.prompt_id.clone(),
            decision: self.decision,
        }
    }
}

/// Submit-decision request body: `{ id, decision }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub id: String,
    pub decision: DecisionKind,
}

/// Server response to a decision submission.
///
/// `decision` carries what the server actually recorded, which may differ from
/// what was sent when another channel won the race.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DecisionAck {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "recorded")]
    pub decision: Option<DecisionKind>,
}

/// Payload of a `trust:decision` push: the server's canonical resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionNotice {
    pub id: String,
    pub decision: DecisionKind,
    #[serde(
        default = "Utc::now",
        deserialize_with = "crate::timestamp::deserialize_or_now"
    )]
    pub decided_at: DateTime<Utc>,
}

/// Payload of a `trust:kill` push and body of the toggle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PauseState {
    pub paused: bool,
}

/// Body of the status query used to resync after (re)connect.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TrustStatus {
    #[serde(default)]
    pub paused: bool,
    #[serde(default, alias = "prompt")]
    pub pending: Option<TrustPrompt>,
}
