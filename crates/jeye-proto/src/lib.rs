//! # jeye-proto
//!
//! Shared types, error definitions, and typed dispatch for the J-Eye approval client.
//!
//! This crate provides the foundational abstractions used across all J-Eye crates,
//! including:
//! - `AgentEvent` and the enumerated event taxonomy streamed by the server
//! - Trust protocol types (prompts, decisions, pause state, status query body)
//! - `EventBus` for demultiplexing events into typed handlers
//! - Common error types

mod error;
mod event;
mod event_bus;
pub mod timestamp;
mod trust;

pub use error::{Error, Result};
pub use event::{AgentEvent, ChannelEvent, EventKind};
pub use event_bus::{Dispatch, EventBus};
pub use trust::{
    Decision, DecisionAck, DecisionKind, DecisionNotice, DecisionRequest, PauseState,
    TrustLevel, TrustPrompt, TrustStatus,
};
