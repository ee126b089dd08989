//! The trust widget: feed, prompt modal and kill switch behind one handle.
//!
//! `TrustWidget` is cheap to clone. Every clone shares the same state, API
//! client and event bus, so the dispatch task, the voice supervisor and the
//! front-end all see one consistent view. Front-ends read a `WidgetSnapshot`
//! and redraw when the `changes()` revision moves.

use crate::activity_feed::{ActivityFeed, FeedEntry};
use crate::api::{ApiError, ApprovalApi};
use crate::event_channel::{ChannelMessage, EventSource, StreamStatus, Subscription, subscribe};
use crate::kill_switch::{GateStatus, GateUpdate, KillSwitchGate, ToggleStart};
use crate::config::StreamConfig;
use crate::prompt_manager::{PromptManager, PromptUpdate, SubmissionStart, SubmitOutcome};
use crate::voice::{PauseControl, VoiceError, VoiceHandle, VoiceStats};
use async_trait::async_trait;
use jeye_proto::{AgentEvent, DecisionKind, Dispatch, EventBus, TrustPrompt};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client-side state owned by the widget.
#[derive(Debug)]
struct WidgetState {
    feed: ActivityFeed,
    prompts: PromptManager,
    gate: KillSwitchGate,
    stream: StreamStatus,
}

/// Read-only view for front-ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetSnapshot {
    pub status: GateStatus,
    pub paused: bool,
    /// A toggle is waiting for server confirmation.
    pub tentative: bool,
    pub prompt: Option<TrustPrompt>,
    pub in_flight: Option<DecisionKind>,
    /// Replaced prompts that come back once `prompt` resolves, next first.
    pub waiting: Vec<String>,
    pub stream: StreamStatus,
    pub feed: Vec<FeedEntry>,
    pub resolved: usize,
}

#[derive(Clone)]
pub struct TrustWidget {
    state: Arc<Mutex<WidgetState>>,
    bus: Arc<Mutex<EventBus>>,
    api: Arc<dyn ApprovalApi>,
    revision: Arc<watch::Sender<u64>>,
}

impl TrustWidget {
    /// Creates a widget with a feed of `feed_capacity` entries.
    pub fn new(api: Arc<dyn ApprovalApi>, feed_capacity: usize) -> Self {
        let state = Arc::new(Mutex::new(WidgetState {
            feed: ActivityFeed::new(feed_capacity),
            prompts: PromptManager::new(),
            gate: KillSwitchGate::new(),
            stream: StreamStatus::Disconnected,
        }));
        let (revision, _) = watch::channel(0);

        let widget = Self {
            state,
            bus: Arc::new(Mutex::new(EventBus::new())),
            api,
            revision: Arc::new(revision),
        };
        widget.wire_bus();
        widget
    }

    fn wire_bus(&self) {
        let mut bus = lock(&self.bus);

        let state = Arc::clone(&self.state);
        bus.add_observer(move |event| lock(&state).feed.record(event));

        let state = Arc::clone(&self.state);
        bus.on_prompt(move |prompt| {
            lock(&state).prompts.on_prompt(prompt.clone());
        });

        let state = Arc::clone(&self.state);
        bus.on_decision(move |notice| {
            lock(&state).prompts.on_decision(notice);
        });

        let state = Arc::clone(&self.state);
        bus.on_kill(move |pause| {
            lock(&state).gate.confirm(pause.paused);
        });
    }

    /// Routes one channel event through the bus.
    pub fn handle_event(&self, event: &AgentEvent) -> Dispatch {
        let dispatch = lock(&self.bus).publish(event);
        if matches!(dispatch, Dispatch::Delivered(_)) {
            self.notify();
        }
        dispatch
    }

    pub fn handle_stream_status(&self, status: StreamStatus) {
        let mut state = lock(&self.state);
        if state.stream != status {
            debug!(status = ?status, "Stream status changed");
            state.stream = status;
            drop(state);
            self.notify();
        }
    }

    /// Reconciles prompt and pause state with the server's status query.
    pub async fn resync(&self) -> Result<PromptUpdate, ApiError> {
        let status = self.api.fetch_status().await?;
        let update = {
            let mut state = lock(&self.state);
            state.gate.confirm(status.paused);
            state.prompts.reconcile(&status)
        };
        debug!(update = ?update, paused = status.paused, "Resynced with server");
        self.notify();
        Ok(update)
    }

    /// Resolves the active prompt with `kind`.
    pub async fn decide(&self, kind: DecisionKind) -> Result<SubmitOutcome, ApiError> {
        let active = lock(&self.state).prompts.active().map(|p| p.id.clone());
        match active {
            Some(prompt_id) => self.decide_prompt(&prompt_id, kind).await,
            None => Ok(SubmitOutcome::NotPending),
        }
    }

    /// Resolves `prompt_id` with `kind`, sending at most one request per prompt.
    pub async fn decide_prompt(
        &self,
        prompt_id: &str,
        kind: DecisionKind,
    ) -> Result<SubmitOutcome, ApiError> {
        let start = lock(&self.state).prompts.begin_submission(prompt_id, kind);
        let decision = match start {
            SubmissionStart::Send(decision) => decision,
            SubmissionStart::Skip(outcome) => {
                debug!(prompt_id, outcome = ?outcome, "Decision not sent");
                return Ok(outcome);
            }
        };
        self.notify();

        let result = self.api.submit_decision(&decision.to_request()).await;
        let outcome = {
            let mut state = lock(&self.state);
            match result {
                Ok(ack) => Ok(state.prompts.complete_accepted(&decision, ack.decision)),
                Err(ApiError::AlreadyResolved { recorded }) => {
                    info!(prompt_id, recorded = ?recorded, "Prompt was already resolved on the server");
                    Ok(state.prompts.complete_conflict(&decision, recorded))
                }
                Err(e) => {
                    warn!(prompt_id, error = %e, "Decision submission failed, prompt stays pending");
                    state.prompts.abort_submission(&decision);
                    Err(e)
                }
            }
        };
        self.notify();
        outcome
    }

    /// Requests the pause flag. The gate stays tentative until `trust:kill`.
    pub async fn toggle_pause(&self, paused: bool) -> Result<GateUpdate, ApiError> {
        let start = lock(&self.state).gate.begin_toggle(paused);
        let ticket = match start {
            ToggleStart::Send(ticket) => ticket,
            ToggleStart::AlreadyPending(_) => return Ok(GateUpdate::Tentative),
        };
        self.notify();

        let result = self.api.set_paused(paused).await;
        let update = lock(&self.state)
            .gate
            .complete_toggle(ticket, result.is_ok());
        self.notify();
        result.map(|()| update)
    }

    pub fn snapshot(&self) -> WidgetSnapshot {
        let state = lock(&self.state);
        let prompt = state.prompts.active().cloned();
        WidgetSnapshot {
            status: state.gate.status(prompt.is_some()),
            paused: state.gate.paused(),
            tentative: state.gate.is_tentative(),
            in_flight: state.prompts.in_flight(),
            waiting: state.prompts.waiting().map(str::to_string).collect(),
            prompt,
            stream: state.stream.clone(),
            feed: state.feed.iter().cloned().collect(),
            resolved: state.prompts.resolved_count(),
        }
    }

    /// Revision counter bumped on every visible change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Subscribes to `source` and dispatches into this widget until unmounted.
    ///
    /// Every `Connected` triggers a resync, which clears modals that were
    /// resolved while the stream was down.
    pub fn mount(
        &self,
        source: Arc<dyn EventSource>,
        config: &StreamConfig,
        voice: Option<VoiceHandle>,
    ) -> MountedWidget {
        let (subscription, mut rx) = subscribe(source, config);
        let widget = self.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    ChannelMessage::Event(event) => {
                        widget.handle_event(&event);
                    }
                    ChannelMessage::Status(status) => {
                        let connected = status == StreamStatus::Connected;
                        widget.handle_stream_status(status);
                        if connected && let Err(e) = widget.resync().await {
                            warn!(error = %e, "Resync after connect failed");
                        }
                    }
                }
            }
        });
        info!("Trust widget mounted");

        MountedWidget {
            widget: self.clone(),
            subscription,
            dispatch,
            voice,
        }
    }

    fn notify(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

#[async_trait]
impl PauseControl for TrustWidget {
    async fn request_pause(&self, paused: bool) -> Result<(), VoiceError> {
        self.toggle_pause(paused)
            .await
            .map(|_| ())
            .map_err(|e| VoiceError::Control(e.to_string()))
    }
}

/// A widget with a live subscription.
pub struct MountedWidget {
    widget: TrustWidget,
    subscription: Subscription,
    dispatch: JoinHandle<()>,
    voice: Option<VoiceHandle>,
}

impl MountedWidget {
    pub fn widget(&self) -> &TrustWidget {
        &self.widget
    }

    pub fn voice(&self) -> Option<&VoiceHandle> {
        self.voice.as_ref()
    }

    /// Tears everything down. No handler runs after this returns.
    pub async fn unmount(self) -> Option<VoiceStats> {
        let Self {
            widget,
            subscription,
            dispatch,
            voice,
        } = self;

        let stats = match voice {
            Some(voice) => Some(voice.shutdown().await),
            None => None,
        };
        subscription.close().await;
        dispatch.abort();
        let _ = dispatch.await;
        lock(&widget.bus).clear();
        widget.handle_stream_status(StreamStatus::Disconnected);
        info!("Trust widget unmounted");
        stats
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
