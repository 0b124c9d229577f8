//! Session identity and bookkeeping

use std::fmt;
use std::time::SystemTime;

use dbgbridge_native::{EngineStatus, InitPacket};
use serde::{Deserialize, Serialize};

use super::events::EndReason;

/// Opaque session id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Fresh random id
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The id as text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Link state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Registered, waiting for the `init` packet
    Connecting,
    /// `init` received
    Active,
    /// Ended; kept so stale ids can be told apart from unknown ones
    Closed,
}

/// Read-only view of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Remote endpoint, if the connection reports one
    pub endpoint: Option<String>,
    /// Link state
    pub state: ConnectionState,
    /// `init` packet, once received
    pub init: Option<InitPacket>,
    /// Last status reported by the engine
    pub status: Option<EngineStatus>,
    /// When the connection was registered
    pub established_at: SystemTime,
    /// Why the session ended, once closed
    pub end_reason: Option<EndReason>,
}

impl SessionInfo {
    pub(crate) fn new(id: SessionId, endpoint: Option<String>) -> Self {
        Self {
            id,
            endpoint,
            state: ConnectionState::Connecting,
            init: None,
            status: None,
            established_at: SystemTime::now(),
            end_reason: None,
        }
    }

    /// Whether the session has not ended yet
    pub fn is_live(&self) -> bool {
        self.state != ConnectionState::Closed
    }
}
