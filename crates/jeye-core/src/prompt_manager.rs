//! Prompt lifecycle: `Idle → AwaitingDecision → Resolved → Idle`.
//!
//! At most one prompt is active. A newer prompt takes the screen, and the one
//! it replaced waits underneath until the newer one resolves, so nothing the
//! server still holds pending drops out of view. The manager never performs
//! I/O; the widget
//! drives it with received events and submission results. Every resolution is
//! recorded in a bounded ledger so duplicate clicks, redelivered prompts and
//! late push/response races become no-ops.

use chrono::{DateTime, Utc};
use jeye_proto::{Decision, DecisionKind, DecisionNotice, TrustPrompt, TrustStatus};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// Resolutions remembered for duplicate suppression.
pub const DEFAULT_LEDGER_CAPACITY: usize = 512;

/// Replaced prompts kept underneath the active one.
pub const MAX_WAITING_PROMPTS: usize = 32;

/// Observable lifecycle state. `Resolved` is transient and reported through
/// `PromptUpdate::Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptState {
    Idle,
    AwaitingDecision,
}

/// Who resolved a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// This client's submission, accepted by the server.
    Operator,
    /// A `trust:decision` push (another device, voice, or this client's echo).
    Remote,
    /// The status query reported nothing pending.
    Resync,
}

/// The recorded outcome for one prompt id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub prompt_id: String,
    /// `None` when the prompt disappeared server-side without us seeing how.
    pub decision: Option<DecisionKind>,
    pub source: ResolutionSource,
    pub resolved_at: DateTime<Utc>,
}

/// What an input did to the lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptUpdate {
    /// `Idle → AwaitingDecision`.
    Surfaced { prompt_id: String },
    /// A newer prompt replaced the active one on screen; the previous one waits.
    Superseded { previous: String, prompt_id: String },
    /// `AwaitingDecision → Resolved → Idle`.
    Resolved(Resolution),
    /// The active prompt vanished server-side.
    Cleared { prompt_id: String },
    /// Redelivery of the active prompt.
    Duplicate,
    /// The id is already in the ledger.
    AlreadyResolved,
    /// Nothing to do.
    NoChange,
}

/// Result of a decision attempt that does not need the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// The server accepted and the prompt resolved with this decision.
    Resolved(DecisionKind),
    /// The prompt was already resolved; nothing was (or needed to be) sent.
    AlreadyResolved,
    /// A submission for this prompt is still in flight.
    InFlight,
    /// No prompt with that id is awaiting a decision.
    NotPending,
    /// The prompt does not offer that option.
    NotOffered,
}

/// Whether a submission should go out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStart {
    Send(Decision),
    Skip(SubmitOutcome),
}

#[derive(Debug, Clone)]
struct ActivePrompt {
    prompt: TrustPrompt,
    in_flight: Option<DecisionKind>,
}

/// Bounded id → resolution map; oldest ids are forgotten first.
#[derive(Debug, Clone)]
struct ResolutionLedger {
    entries: HashMap<String, Resolution>,
    order: VecDeque<String>,
    capacity: usize,
}

impl ResolutionLedger {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, id: &str) -> Option<&Resolution> {
        self.entries.get(id)
    }

    /// Inserts unless present. Returns false if the id was already resolved.
    fn insert(&mut self, resolution: Resolution) -> bool {
        if self.entries.contains_key(&resolution.prompt_id) {
            return false;
        }
        self.order.push_back(resolution.prompt_id.clone());
        self.entries.insert(resolution.prompt_id.clone(), resolution);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Tracks the single active prompt and mediates decisions.
#[derive(Debug, Clone)]
pub struct PromptManager {
    active: Option<ActivePrompt>,
    /// Replaced prompts, most recent last.
    waiting: Vec<ActivePrompt>,
    ledger: ResolutionLedger,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptManager {
    pub fn new() -> Self {
        Self::with_ledger_capacity(DEFAULT_LEDGER_CAPACITY)
    }

    pub fn with_ledger_capacity(capacity: usize) -> Self {
        Self {
            active: None,
            waiting: Vec::new(),
            ledger: ResolutionLedger::new(capacity),
        }
    }

    pub fn state(&self) -> PromptState {
        if self.active.is_some() {
            PromptState::AwaitingDecision
        } else {
            PromptState::Idle
        }
    }

    /// The prompt currently shown modally, if any.
    pub fn active(&self) -> Option<&TrustPrompt> {
        self.active.as_ref().map(|a| &a.prompt)
    }

    /// The decision currently being submitted for the active prompt.
    pub fn in_flight(&self) -> Option<DecisionKind> {
        self.active.as_ref().and_then(|a| a.in_flight)
    }

    /// Looks up how a prompt was resolved.
    pub fn resolution(&self, prompt_id: &str) -> Option<&Resolution> {
        self.ledger.get(prompt_id)
    }

    pub fn resolved_count(&self) -> usize {
        self.ledger.len()
    }

    /// Ids of replaced prompts still awaiting a decision, next to surface first.
    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().rev().map(|w| w.prompt.id.as_str())
    }

    /// Handles a `trust:prompt` push.
    pub fn on_prompt(&mut self, prompt: TrustPrompt) -> PromptUpdate {
        if self.ledger.get(&prompt.id).is_some() {
            debug!(prompt_id = %prompt.id, "Ignoring prompt that is already resolved");
            return PromptUpdate::AlreadyResolved;
        }

        let prompt_id = prompt.id.clone();
        match self.active.take() {
            Some(active) if active.prompt.id == prompt_id => {
                debug!(prompt_id = %prompt_id, "Duplicate prompt delivery");
                self.active = Some(active);
                PromptUpdate::Duplicate
            }
            Some(active) => {
                // A redelivered waiting prompt moves back to the top with its
                // submission state intact.
                let incoming = self.take_waiting(&prompt_id).unwrap_or(ActivePrompt {
                    prompt,
                    in_flight: None,
                });
                let previous = active.prompt.id.clone();
                info!(previous = %previous, prompt_id = %prompt_id, level = %incoming.prompt.level, "Newer prompt supersedes active prompt");
                self.push_waiting(active);
                self.active = Some(incoming);
                PromptUpdate::Superseded {
                    previous,
                    prompt_id,
                }
            }
            None => {
                info!(prompt_id = %prompt_id, level = %prompt.level, "Prompt awaiting decision");
                self.active = Some(ActivePrompt {
                    prompt,
                    in_flight: None,
                });
                PromptUpdate::Surfaced { prompt_id }
            }
        }
    }

    /// Handles a `trust:decision` push, the server's canonical resolution.
    pub fn on_decision(&mut self, notice: &DecisionNotice) -> PromptUpdate {
        if self.is_active(&notice.id) {
            return self.resolve_active(Some(notice.decision), ResolutionSource::Remote);
        }
        if self.take_waiting(&notice.id).is_some() {
            return self.record(&notice.id, Some(notice.decision), ResolutionSource::Remote);
        }

        if let Some(existing) = self.ledger.get(&notice.id) {
            match existing.decision {
                Some(recorded) if recorded != notice.decision => warn!(
                    prompt_id = %notice.id,
                    recorded = %recorded,
                    pushed = %notice.decision,
                    "Conflicting resolution for resolved prompt ignored"
                ),
                _ => debug!(prompt_id = %notice.id, "Decision echo for resolved prompt"),
            }
            return PromptUpdate::AlreadyResolved;
        }

        // Resolved elsewhere before we saw it; remember so a late prompt
        // delivery does not resurface it.
        self.ledger.insert(Resolution {
            prompt_id: notice.id.clone(),
            decision: Some(notice.decision),
            source: ResolutionSource::Remote,
            resolved_at: Utc::now(),
        });
        PromptUpdate::NoChange
    }

    /// Starts an operator submission keyed by `(prompt_id, kind)`.
    pub fn begin_submission(&mut self, prompt_id: &str, kind: DecisionKind) -> SubmissionStart {
        if self.ledger.get(prompt_id).is_some() {
            return SubmissionStart::Skip(SubmitOutcome::AlreadyResolved);
        }
        let Some(active) = self.active.as_mut().filter(|a| a.prompt.id == prompt_id) else {
            return SubmissionStart::Skip(SubmitOutcome::NotPending);
        };
        if !active.prompt.allows(kind) {
            return SubmissionStart::Skip(SubmitOutcome::NotOffered);
        }
        if active.in_flight.is_some() {
            return SubmissionStart::Skip(SubmitOutcome::InFlight);
        }
        active.in_flight = Some(kind);
        debug!(prompt_id = %prompt_id, decision = %kind, "Submitting decision");
        SubmissionStart::Send(Decision::new(prompt_id, kind))
    }

    /// The server accepted `decision`; `recorded` is what it actually stored.
    pub fn complete_accepted(
        &mut self,
        decision: &Decision,
        recorded: Option<DecisionKind>,
    ) -> SubmitOutcome {
        let outcome = recorded.unwrap_or(decision.decision);
        if self.is_active(&decision.prompt_id) {
            self.resolve_active(Some(outcome), ResolutionSource::Operator);
            return SubmitOutcome::Resolved(outcome);
        }
        if let Some(existing) = self.ledger.get(&decision.prompt_id) {
            // The push won the race; the ledger already holds the canonical result.
            return existing
                .decision
                .map_or(SubmitOutcome::AlreadyResolved, SubmitOutcome::Resolved);
        }
        // Replaced while in flight: the server still took it.
        self.take_waiting(&decision.prompt_id);
        self.record(&decision.prompt_id, Some(outcome), ResolutionSource::Operator);
        SubmitOutcome::Resolved(outcome)
    }

    /// The server reported the prompt already resolved.
    pub fn complete_conflict(
        &mut self,
        decision: &Decision,
        recorded: Option<DecisionKind>,
    ) -> SubmitOutcome {
        match recorded {
            Some(kind) if self.is_active(&decision.prompt_id) => {
                self.resolve_active(Some(kind), ResolutionSource::Remote);
            }
            Some(kind) => {
                if self.take_waiting(&decision.prompt_id).is_some() {
                    self.record(&decision.prompt_id, Some(kind), ResolutionSource::Remote);
                }
            }
            // Wait for the push or the next resync to say how.
            None => self.clear_in_flight(&decision.prompt_id),
        }
        SubmitOutcome::AlreadyResolved
    }

    /// The submission failed in transport; the prompt stays pending.
    pub fn abort_submission(&mut self, decision: &Decision) {
        self.clear_in_flight(&decision.prompt_id);
    }

    /// Applies a status query result after mount or reconnect.
    pub fn reconcile(&mut self, status: &TrustStatus) -> PromptUpdate {
        match &status.pending {
            Some(pending) => self.on_prompt(pending.clone()),
            None => match self.active.take() {
                Some(stale) => {
                    let prompt_id = stale.prompt.id;
                    info!(prompt_id = %prompt_id, waiting = self.waiting.len(), "Server reports no pending prompt, clearing stale modal");
                    self.record(&prompt_id, None, ResolutionSource::Resync);
                    for waiting in std::mem::take(&mut self.waiting) {
                        self.record(&waiting.prompt.id, None, ResolutionSource::Resync);
                    }
                    PromptUpdate::Cleared { prompt_id }
                }
                None => PromptUpdate::NoChange,
            },
        }
    }

    fn is_active(&self, prompt_id: &str) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.prompt.id == prompt_id)
    }

    fn clear_in_flight(&mut self, prompt_id: &str) {
        if let Some(entry) = self
            .active
            .iter_mut()
            .chain(self.waiting.iter_mut())
            .find(|a| a.prompt.id == prompt_id)
        {
            entry.in_flight = None;
        }
    }

    fn take_waiting(&mut self, prompt_id: &str) -> Option<ActivePrompt> {
        let index = self.waiting.iter().position(|w| w.prompt.id == prompt_id)?;
        Some(self.waiting.remove(index))
    }

    fn push_waiting(&mut self, prompt: ActivePrompt) {
        self.waiting.push(prompt);
        if self.waiting.len() > MAX_WAITING_PROMPTS {
            let dropped = self.waiting.remove(0);
            warn!(prompt_id = %dropped.prompt.id, "Too many replaced prompts, oldest left to resync");
        }
    }

    /// Writes a resolution to the ledger and reports it.
    fn record(
        &mut self,
        prompt_id: &str,
        decision: Option<DecisionKind>,
        source: ResolutionSource,
    ) -> PromptUpdate {
        let resolution = Resolution {
            prompt_id: prompt_id.to_string(),
            decision,
            source,
            resolved_at: Utc::now(),
        };
        info!(
            prompt_id = %resolution.prompt_id,
            decision = ?resolution.decision,
            source = ?resolution.source,
            "Prompt resolved"
        );
        self.ledger.insert(resolution.clone());
        PromptUpdate::Resolved(resolution)
    }

    /// Brings back the most recently replaced prompt that is still unresolved.
    fn surface_next(&mut self) {
        while let Some(next) = self.waiting.pop() {
            if self.ledger.get(&next.prompt.id).is_none() {
                info!(prompt_id = %next.prompt.id, "Replaced prompt awaiting decision again");
                self.active = Some(next);
                return;
            }
        }
    }

    fn resolve_active(
        &mut self,
        decision: Option<DecisionKind>,
        source: ResolutionSource,
    ) -> PromptUpdate {
        let Some(active) = self.active.take() else {
            return PromptUpdate::NoChange;
        };
        let update = self.record(&active.prompt.id, decision, source);
        self.surface_next();
        update
    }
}
