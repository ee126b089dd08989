//! Kill-switch gate: the client's mirror of the server's global pause flag.
//!
//! Local toggles are tentative until the matching `trust:kill` push arrives.
//! The last server-confirmed state wins over any local click, and a failed
//! toggle request reverts to the confirmed state.

use serde::Serialize;
use tracing::{debug, info, warn};

/// Tri-state status shown to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Running,
    AwaitingDecision,
    Paused,
}

impl GateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::AwaitingDecision => "awaiting-decision",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one toggle request so late completions can be recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleTicket {
    pub id: u64,
    pub paused: bool,
}

/// Whether a toggle request should go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleStart {
    Send(ToggleTicket),
    /// A request for the same target is already waiting for confirmation.
    AlreadyPending(ToggleTicket),
}

/// What an input did to the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateUpdate {
    /// Request accepted over HTTP; still waiting for the push.
    Tentative,
    /// Request failed; display reverted to the confirmed state.
    Reverted,
    /// The server confirmed a state.
    Confirmed { paused: bool, changed: bool },
    /// Completion for a request that was already superseded.
    Stale,
}

/// Mirrors the server-owned pause flag.
#[derive(Debug, Clone, Default)]
pub struct KillSwitchGate {
    /// Last server-confirmed value; unknown until the first sync.
    confirmed: Option<bool>,
    pending: Option<ToggleTicket>,
    next_ticket: u64,
}

impl KillSwitchGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// The value to display: the tentative target, else the confirmed state.
    pub fn paused(&self) -> bool {
        self.pending
            .map(|t| t.paused)
            .or(self.confirmed)
            .unwrap_or(false)
    }

    pub fn confirmed(&self) -> Option<bool> {
        self.confirmed
    }

    /// True while a toggle waits for server confirmation.
    pub fn is_tentative(&self) -> bool {
        self.pending.is_some()
    }

    pub fn status(&self, prompt_active: bool) -> GateStatus {
        if self.paused() {
            GateStatus::Paused
        } else if prompt_active {
            GateStatus::AwaitingDecision
        } else {
            GateStatus::Running
        }
    }

    /// Starts a toggle toward `paused`.
    pub fn begin_toggle(&mut self, paused: bool) -> ToggleStart {
        if let Some(pending) = self.pending.filter(|t| t.paused == paused) {
            debug!(paused, ticket = pending.id, "Toggle already pending");
            return ToggleStart::AlreadyPending(pending);
        }
        self.next_ticket += 1;
        let ticket = ToggleTicket {
            id: self.next_ticket,
            paused,
        };
        self.pending = Some(ticket);
        debug!(paused, ticket = ticket.id, "Requesting pause toggle");
        ToggleStart::Send(ticket)
    }

    /// Applies the HTTP outcome of a toggle request.
    pub fn complete_toggle(&mut self, ticket: ToggleTicket, succeeded: bool) -> GateUpdate {
        if self.pending != Some(ticket) {
            debug!(ticket = ticket.id, "Ignoring stale toggle completion");
            return GateUpdate::Stale;
        }
        if succeeded {
            return GateUpdate::Tentative;
        }
        warn!(
            ticket = ticket.id,
            paused = ticket.paused,
            "Toggle request failed, reverting to confirmed state"
        );
        self.pending = None;
        GateUpdate::Reverted
    }

    /// Applies a `trust:kill` push or a status query result.
    pub fn confirm(&mut self, paused: bool) -> GateUpdate {
        let changed = self.confirmed != Some(paused);
        if let Some(pending) = self.pending.take()
            && pending.paused != paused
        {
            info!(
                requested = pending.paused,
                confirmed = paused,
                "Server confirmed a different pause state than requested"
            );
        }
        self.confirmed = Some(paused);
        if changed {
            info!(paused, "Pause state confirmed");
        }
        GateUpdate::Confirmed { paused, changed }
    }
}
