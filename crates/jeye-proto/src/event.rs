//! Agent events streamed over the event channel.

use crate::{DecisionNotice, Error, PauseState, Result, TrustPrompt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The enumerated event taxonomy.
///
/// Names outside the taxonomy decode to `Unknown` so that new server event
/// types are ignored instead of breaking the handler loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// An agent started or finished an action.
    AgentAction,
    /// Agent lifecycle/health status change.
    AgentStatus,
    /// Free-form agent log line.
    AgentLog,
    /// Self-learning progress update.
    AgentLearning,
    /// Request for human confirmation.
    TrustPrompt,
    /// Canonical resolution of a prompt.
    TrustDecision,
    /// Global pause flag changed.
    TrustKill,
    /// Anything the client does not know about yet.
    Unknown(String),
}

impl EventKind {
    /// Maps a wire name to its kind.
    pub fn from_name(name: &str) -> Self {
        match name.trim() {
            "agent:action" => Self::AgentAction,
            "agent:status" => Self::AgentStatus,
            "agent:log" => Self::AgentLog,
            "agent:learning" => Self::AgentLearning,
            "trust:prompt" => Self::TrustPrompt,
            "trust:decision" => Self::TrustDecision,
            "trust:kill" => Self::TrustKill,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Returns the wire name.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AgentAction => "agent:action",
            Self::AgentStatus => "agent:status",
            Self::AgentLog => "agent:log",
            Self::AgentLearning => "agent:learning",
            Self::TrustPrompt => "trust:prompt",
            Self::TrustDecision => "trust:decision",
            Self::TrustKill => "trust:kill",
            Self::Unknown(name) => name,
        }
    }

    /// Returns true for trust protocol kinds.
    pub fn is_trust(&self) -> bool {
        matches!(
            self,
            Self::TrustPrompt | Self::TrustDecision | Self::TrustKill
        )
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

impl From<String> for EventKind {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event received from the server. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Server id, or a locally assigned sequence id when the server sent none.
    pub id: String,

    /// The event type tag.
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// When the event happened, or when it was received if unstated.
    pub timestamp: DateTime<Utc>,

    /// Raw JSON payload.
    pub payload: Value,
}

impl AgentEvent {
    /// Creates an event stamped with the current time.
    pub fn new(id: impl Into<String>, kind: impl Into<EventKind>, payload: Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Sets the event timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// One-line human summary for the activity feed.
    pub fn summary(&self) -> String {
        const FIELDS: [&str; 5] = ["message", "summary", "title", "action", "status"];

        match &self.payload {
            Value::String(text) if !text.is_empty() => text.clone(),
            Value::Object(map) => FIELDS
                .iter()
                .find_map(|field| map.get(*field).and_then(Value::as_str))
                .map(str::to_string)
                .or_else(|| self.trust_summary())
                .unwrap_or_else(|| self.kind.to_string()),
            _ => self.kind.to_string(),
        }
    }

    fn trust_summary(&self) -> Option<String> {
        match &self.kind {
            EventKind::TrustDecision => {
                let id = self.payload.get("id")?.as_str()?;
                let decision = self.payload.get("decision")?.as_str()?;
                Some(format!("{id} resolved: {decision}"))
            }
            EventKind::TrustKill => {
                let paused = self.payload.get("paused")?.as_bool()?;
                Some(if paused { "Agent paused" } else { "Agent resumed" }.to_string())
            }
            _ => None,
        }
    }

    /// Decodes the payload according to the event kind.
    pub fn decode(&self) -> Result<ChannelEvent> {
        match &self.kind {
            EventKind::TrustPrompt => self.decode_payload().map(ChannelEvent::Prompt),
            EventKind::TrustDecision => self.decode_payload().map(ChannelEvent::Decision),
            EventKind::TrustKill => self.decode_payload().map(ChannelEvent::Kill),
            EventKind::AgentAction
            | EventKind::AgentStatus
            | EventKind::AgentLog
            | EventKind::AgentLearning => Ok(ChannelEvent::Telemetry),
            EventKind::Unknown(name) => Ok(ChannelEvent::Unknown(name.clone())),
        }
    }

    fn decode_payload<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|source| Error::MalformedPayload {
            kind: self.kind.clone(),
            source,
        })
    }
}

/// Typed view of an `AgentEvent`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// Agent telemetry; the raw event is all there is.
    Telemetry,
    Prompt(TrustPrompt),
    Decision(DecisionNotice),
    Kill(PauseState),
    /// Not part of the taxonomy; ignored by consumers.
    Unknown(String),
}
