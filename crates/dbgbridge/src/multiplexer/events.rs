//! Session lifecycle events

use std::fmt;

use dbgbridge_native::{EngineStatus, InitPacket, StreamKind};

use super::session::SessionId;

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The engine reported `stopping` or `stopped`
    Completed,
    /// The engine hung up
    ConnectionClosed,
    /// Closed through [`ConnectionMultiplexer::close`](super::ConnectionMultiplexer::close)
    Closed,
    /// The engine announced an IDE key other than the configured one
    Rejected {
        /// Key the engine announced
        idekey: Option<String>,
    },
    /// Reading or writing failed
    Failed(String),
    /// The multiplexer was disposed
    Disposed,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::ConnectionClosed => f.write_str("connection closed"),
            Self::Closed => f.write_str("closed"),
            Self::Rejected { idekey } => write!(f, "rejected idekey {idekey:?}"),
            Self::Failed(message) => write!(f, "failed: {message}"),
            Self::Disposed => f.write_str("disposed"),
        }
    }
}

/// Broadcast to every subscriber of the multiplexer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// `init` received, the session is active
    Started {
        /// Session
        session_id: SessionId,
        /// The engine's announcement
        init: InitPacket,
    },
    /// A response carried a new status
    StatusChanged {
        /// Session
        session_id: SessionId,
        /// New status
        status: EngineStatus,
        /// Reason attribute of the response
        reason: Option<String>,
    },
    /// Program output
    Stream {
        /// Session
        session_id: SessionId,
        /// Output stream
        stream: StreamKind,
        /// Decoded text
        data: String,
    },
    /// The session ended; sent exactly once per session
    Ended {
        /// Session
        session_id: SessionId,
        /// Cause
        reason: EndReason,
    },
}

impl SessionEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Started { session_id, .. }
            | Self::StatusChanged { session_id, .. }
            | Self::Stream { session_id, .. }
            | Self::Ended { session_id, .. } => session_id,
        }
    }
}
