//! Protocol errors.

use crate::EventKind;

/// Errors raised while decoding trust protocol payloads.
///
/// These never escape the event loop: the bus counts and drops them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The payload of a recognized event did not match its schema.
    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: EventKind,
        #[source]
        source: serde_json::Error,
    },

    /// Trust levels outside 1..=3.
    #[error("invalid trust level {0} (expected 1, 2 or 3)")]
    InvalidTrustLevel(u8),

    /// A decision name outside approve/reject/delay.
    #[error("unknown decision '{0}' (expected approve, reject or delay)")]
    UnknownDecision(String),
}

pub type Result<T> = std::result::Result<T, Error>;
