//! Messages written back to the client

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Domain;
use crate::envelope::MessageId;

/// One line of client-bound traffic.
///
/// Serialized without a tag; the shape alone tells the variants apart:
///
/// - reply: `{"id":1,"result":{...}}`
/// - error: `{"id":1,"error":"..."}` (`id` is `null` when the command had none)
/// - event: `{"method":"Debugger.paused","params":{...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Successful command result
    Reply {
        /// Command id
        id: MessageId,
        /// Handler result
        result: Value,
    },
    /// Failed command
    Error {
        /// Command id, if it could be determined
        id: Option<MessageId>,
        /// Human-readable error text
        error: String,
    },
    /// Spontaneous notification
    Event {
        /// Fully-qualified event name
        method: String,
        /// Event payload
        params: Value,
    },
}

impl OutboundMessage {
    /// Create a success reply
    pub fn reply(id: MessageId, result: Value) -> Self {
        Self::Reply { id, result }
    }

    /// Create an error reply
    pub fn error(id: Option<MessageId>, error: impl Into<String>) -> Self {
        Self::Error {
            id,
            error: error.into(),
        }
    }

    /// Create an event for `domain.name`
    pub fn event(domain: Domain, name: &str, params: Value) -> Self {
        Self::Event {
            method: domain.method(name),
            params,
        }
    }

    /// Id this message answers, `None` for events and id-less errors
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::Reply { id, .. } => Some(*id),
            Self::Error { id, .. } => *id,
            Self::Event { .. } => None,
        }
    }

    /// Whether this message answers a command (as opposed to an event)
    pub fn is_response(&self) -> bool {
        !matches!(self, Self::Event { .. })
    }

    /// Serialize to a single JSON line (no trailing newline)
    ///
    /// # Errors
    ///
    /// Returns an error if a payload contains a value serde_json refuses,
    /// such as a map with non-string keys.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
