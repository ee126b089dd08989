//! # jeye-core
//!
//! Client core for the J-Eye trust-gated approval flow.
//!
//! This crate provides:
//! - The event channel: a long-lived SSE subscription with reconnect and backoff
//! - The activity feed aggregator (bounded, newest first)
//! - The prompt lifecycle manager with exactly-once resolution
//! - The kill-switch gate mirroring the server-owned pause flag
//! - The voice command interpreter and its supervised recognition loop
//! - `TrustWidget`, which wires all of the above to the approval API

mod activity_feed;
pub mod api;
pub mod config;
pub mod event_channel;
mod event_parser;
mod kill_switch;
mod prompt_manager;
pub mod sse;
pub mod status_manager;
pub mod voice;
mod widget;

pub use activity_feed::{ActivityFeed, FeedEntry};
pub use api::{ApiError, ApprovalApi, HttpApprovalApi};
pub use config::{ConfigError, FeedConfig, JEyeConfig, ServerConfig, StreamConfig, VoiceConfig};
pub use event_channel::{
    Backoff, ByteStream, ChannelError, ChannelMessage, EventSource, HttpEventSource,
    StreamStatus, Subscription, subscribe,
};
pub use event_parser::EventParser;
pub use kill_switch::{GateStatus, GateUpdate, KillSwitchGate, ToggleStart, ToggleTicket};
pub use prompt_manager::{
    PromptManager, PromptState, PromptUpdate, Resolution, ResolutionSource, SubmissionStart,
    SubmitOutcome,
};
pub use status_manager::StatusManager;
pub use voice::{
    CommandGrammar, ListenHandle, PauseControl, RecognizerEvent, SpeechRecognizer, Utterance,
    VoiceCommand, VoiceError, VoiceHandle, VoiceInterpreter, VoiceStats,
};
pub use widget::{MountedWidget, TrustWidget, WidgetSnapshot};
