//! Event bus for demultiplexing channel events.
//!
//! The bus decodes each `AgentEvent` into its typed form and hands it to the
//! handlers registered for that type. Observers receive every recognized
//! event, for feeds and recorders. Unknown and malformed events are counted
//! and dropped; a bad event never takes the subscription down.

use crate::{AgentEvent, ChannelEvent, DecisionNotice, PauseState, TrustPrompt};
use tracing::{debug, warn};

/// Type alias for the observer callback function.
type Observer = Box<dyn Fn(&AgentEvent) + Send + 'static>;

/// Type alias for a typed handler.
type Handler<T> = Box<dyn Fn(&T) + Send + 'static>;

/// Outcome of publishing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Recognized; delivered to this many observers and handlers.
    Delivered(usize),
    /// Unknown event type, dropped.
    Ignored,
    /// Recognized type with an unreadable payload, dropped.
    Malformed,
}

/// Central hub routing channel events to typed handlers.
#[derive(Default)]
pub struct EventBus {
    /// Observers that receive all recognized events.
    observers: Vec<Observer>,

    prompt_handlers: Vec<Handler<TrustPrompt>>,
    decision_handlers: Vec<Handler<DecisionNotice>>,
    kill_handlers: Vec<Handler<PauseState>>,

    ignored: u64,
    malformed: u64,
}

impl EventBus {
    /// Creates a new empty event bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer that receives every recognized event.
    ///
    /// Observers run before typed handlers.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(&AgentEvent) + Send + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Registers a handler for `trust:prompt`.
    pub fn on_prompt<F>(&mut self, handler: F)
    where
        F: Fn(&TrustPrompt) + Send + 'static,
    {
        self.prompt_handlers.push(Box::new(handler));
    }

    /// Registers a handler for `trust:decision`.
    pub fn on_decision<F>(&mut self, handler: F)
    where
        F: Fn(&DecisionNotice) + Send + 'static,
    {
        self.decision_handlers.push(Box::new(handler));
    }

    /// Registers a handler for `trust:kill`.
    pub fn on_kill<F>(&mut self, handler: F)
    where
        F: Fn(&PauseState) + Send + 'static,
    {
        self.kill_handlers.push(Box::new(handler));
    }

    /// Clears all observers and handlers.
    ///
    /// Called on unmount so no callback fires afterwards.
    pub fn clear(&mut self) {
        self.observers.clear();
        self.prompt_handlers.clear();
        self.decision_handlers.clear();
        self.kill_handlers.clear();
    }

    /// Publishes an event to observers and the matching typed handlers.
    pub fn publish(&mut self, event: &AgentEvent) -> Dispatch {
        let decoded = match event.decode() {
            Ok(ChannelEvent::Unknown(name)) => {
                debug!(kind = %name, id = %event.id, "Ignoring unknown event type");
                self.ignored += 1;
                return Dispatch::Ignored;
            }
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(id = %event.id, error = %e, "Dropping malformed event");
                self.malformed += 1;
                return Dispatch::Malformed;
            }
        };

        for observer in &self.observers {
            observer(event);
        }
        let mut delivered = self.observers.len();

        match decoded {
            ChannelEvent::Prompt(prompt) => {
                for handler in &self.prompt_handlers {
                    handler(&prompt);
                }
                delivered += self.prompt_handlers.len();
            }
            ChannelEvent::Decision(notice) => {
                for handler in &self.decision_handlers {
                    handler(&notice);
                }
                delivered += self.decision_handlers.len();
            }
            ChannelEvent::Kill(state) => {
                for handler in &self.kill_handlers {
                    handler(&state);
                }
                delivered += self.kill_handlers.len();
            }
            // Telemetry only reaches observers.
            ChannelEvent::Telemetry | ChannelEvent::Unknown(_) => {}
        }

        Dispatch::Delivered(delivered)
    }

    /// Number of unknown-type events dropped so far.
    pub fn ignored_count(&self) -> u64 {
        self.ignored
    }

    /// Number of malformed events dropped so far.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_prompt_reaches_prompt_handler_only() {
        let mut bus = EventBus::new();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let kills = Arc::new(Mutex::new(0));

        let prompts_clone = Arc::clone(&prompts);
        bus.on_prompt(move |prompt| prompts_clone.lock().unwrap().push(prompt.id.clone()));
        let kills_clone = Arc::clone(&kills);
        bus.on_kill(move |_| *kills_clone.lock().unwrap() += 1);

        let event = AgentEvent::new(
            "e1",
            "trust:prompt",
            json!({"id": "p1", "level": 3, "title": "Unlock"}),
        );
        assert_eq!(bus.publish(&event), Dispatch::Delivered(1));
        assert_eq!(*prompts.lock().unwrap(), vec!["p1".to_string()]);
        assert_eq!(*kills.lock().unwrap(), 0);
    }

    #[test]
    fn test_observer_sees_recognized_events() {
        let mut bus = EventBus::new();
        let observed = Arc::new(Mutex::new(Vec::new()));

        let observed_clone = Arc::clone(&observed);
        bus.add_observer(move |event| observed_clone.lock().unwrap().push(event.id.clone()));

        bus.publish(&AgentEvent::new("a", "agent:action", json!({"message": "x"})));
        bus.publish(&AgentEvent::new("b", "trust:kill", json!({"paused": false})));
        bus.publish(&AgentEvent::new("c", "energy:tick", json!({})));

        assert_eq!(*observed.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let mut bus = EventBus::new();
        let dispatch = bus.publish(&AgentEvent::new("x", "future:thing", json!({"any": 1})));
        assert_eq!(dispatch, Dispatch::Ignored);
        assert_eq!(bus.ignored_count(), 1);
    }

    #[test]
    fn test_malformed_event_does_not_stop_later_events() {
        let mut bus = EventBus::new();
        let kills = Arc::new(Mutex::new(Vec::new()));
        let kills_clone = Arc::clone(&kills);
        bus.on_kill(move |state| kills_clone.lock().unwrap().push(state.paused));

        assert_eq!(
            bus.publish(&AgentEvent::new("1", "trust:kill", json!({"paused": "yes"}))),
            Dispatch::Malformed
        );
        assert_eq!(
            bus.publish(&AgentEvent::new("2", "trust:kill", json!({"paused": true}))),
            Dispatch::Delivered(1)
        );

        assert_eq!(bus.malformed_count(), 1);
        assert_eq!(*kills.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_clear_removes_all_callbacks() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let count_clone = Arc::clone(&count);
        bus.add_observer(move |_| *count_clone.lock().unwrap() += 1);

        bus.publish(&AgentEvent::new("1", "agent:log", json!("one")));
        bus.clear();
        bus.publish(&AgentEvent::new("2", "agent:log", json!("two")));

        assert_eq!(*count.lock().unwrap(), 1);
    }
}
