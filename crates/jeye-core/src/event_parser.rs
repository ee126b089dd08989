//! Event parsing from server-sent frames.
//!
//! Turns decoded SSE frames into `AgentEvent`s:
//! ```text
//! event: trust:prompt
//! id: 17
//! data: {"id":"p1","level":3,"title":"Unlock front door"}
//! ```
//! Unnamed frames fall back to the payload's `type` field.

use crate::sse::SseFrame;
use chrono::Utc;
use jeye_proto::{AgentEvent, EventKind, timestamp};
use serde_json::Value;

/// Default SSE event name for unnamed frames.
const DEFAULT_EVENT_NAME: &str = "message";

/// Payload fields checked, in order, for the event time.
const TIMESTAMP_FIELDS: [&str; 3] = ["timestamp", "ts", "createdAt"];

/// Converts frames into agent events, assigning local ids when needed.
#[derive(Debug, Default)]
pub struct EventParser {
    sequence: u64,
}

impl EventParser {
    /// Creates a new event parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one frame. Returns `None` for frames carrying no data.
    pub fn parse(&mut self, frame: &SseFrame) -> Option<AgentEvent> {
        if frame.data.is_empty() {
            return None;
        }
        self.sequence += 1;

        let payload = serde_json::from_str::<Value>(&frame.data)
            .unwrap_or_else(|_| Value::String(frame.data.clone()));

        let kind = match frame.event.as_deref() {
            Some(name) if !name.is_empty() && name != DEFAULT_EVENT_NAME => {
                EventKind::from_name(name)
            }
            _ => payload
                .get("type")
                .and_then(Value::as_str)
                .map_or_else(|| EventKind::from_name(DEFAULT_EVENT_NAME), EventKind::from_name),
        };

        let id = frame
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| payload_id(&payload, &kind))
            .unwrap_or_else(|| format!("local-{}", self.sequence));

        let timestamp = TIMESTAMP_FIELDS
            .iter()
            .find_map(|field| payload.get(*field).and_then(timestamp::parse_value))
            .unwrap_or_else(Utc::now);

        Some(AgentEvent::new(id, kind, payload).with_timestamp(timestamp))
    }

    /// Number of events parsed so far.
    pub fn parsed_count(&self) -> u64 {
        self.sequence
    }
}

/// Trust payloads carry the prompt id in `id`; it identifies the prompt,
/// not the event, so only telemetry ids are reused as event ids.
fn payload_id(payload: &Value, kind: &EventKind) -> Option<String> {
    if kind.is_trust() {
        return None;
    }
    match payload.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(event: Option<&str>, data: &str, id: Option<&str>) -> SseFrame {
        SseFrame {
            event: event.map(str::to_string),
            data: data.to_string(),
            id: id.map(str::to_string),
            retry: None,
        }
    }

    #[test]
    fn test_named_frame_with_id() {
        let mut parser = EventParser::new();
        let event = parser
            .parse(&frame(
                Some("trust:prompt"),
                r#"{"id":"p1","level":3,"title":"Unlock"}"#,
                Some("17"),
            ))
            .unwrap();

        assert_eq!(event.kind, EventKind::TrustPrompt);
        assert_eq!(event.id, "17");
        assert_eq!(event.payload["id"], "p1");
    }

    #[test]
    fn test_trust_payload_id_is_not_the_event_id() {
        let mut parser = EventParser::new();
        let event = parser
            .parse(&frame(
                Some("trust:decision"),
                r#"{"id":"p1","decision":"approve"}"#,
                None,
            ))
            .unwrap();
        assert_eq!(event.id, "local-1");
    }

    #[test]
    fn test_unnamed_frame_uses_type_field() {
        let mut parser = EventParser::new();
        let event = parser
            .parse(&frame(
                None,
                r#"{"type":"agent:action","id":"a-9","message":"Heater on"}"#,
                None,
            ))
            .unwrap();
        assert_eq!(event.kind, EventKind::AgentAction);
        assert_eq!(event.id, "a-9");
    }

    #[test]
    fn test_unnamed_frame_without_type_is_unknown() {
        let mut parser = EventParser::new();
        let event = parser.parse(&frame(None, r#"{"hello":1}"#, None)).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("message".into()));
    }

    #[test]
    fn test_non_json_data_becomes_string_payload() {
        let mut parser = EventParser::new();
        let event = parser
            .parse(&frame(Some("agent:log"), "plain text line", None))
            .unwrap();
        assert_eq!(event.payload, json!("plain text line"));
    }

    #[test]
    fn test_timestamp_from_payload() {
        let mut parser = EventParser::new();
        let event = parser
            .parse(&frame(
                Some("agent:status"),
                r#"{"status":"idle","ts":1714564800000}"#,
                None,
            ))
            .unwrap();
        assert_eq!(event.timestamp.timestamp(), 1_714_564_800);
    }

    #[test]
    fn test_empty_frame_is_skipped() {
        let mut parser = EventParser::new();
        assert!(parser.parse(&frame(Some("agent:log"), "", None)).is_none());
        assert_eq!(parser.parsed_count(), 0);
    }

    #[test]
    fn test_local_ids_are_sequential() {
        let mut parser = EventParser::new();
        let first = parser.parse(&frame(Some("agent:log"), "\"a\"", None)).unwrap();
        let second = parser.parse(&frame(Some("agent:log"), "\"b\"", None)).unwrap();
        assert_eq!(first.id, "local-1");
        assert_eq!(second.id, "local-2");
    }
}
