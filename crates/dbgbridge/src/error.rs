//! Error types for dbgbridge
//!
//! Two layers:
//! - [`BridgeError`]: session plumbing and configuration (multiplexer, listener, config files)
//! - [`HandlerError`]: failures of a single client command inside a domain handler
//!
//! Malformed client input never reaches either of them; it is reported as a
//! [`dbgbridge_protocol::CommandError`] by the translator.

use dbgbridge_native::NativeError;
use dbgbridge_protocol::Domain;
use thiserror::Error;

use crate::multiplexer::SessionId;

/// Result type for bridge operations
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Result type for domain handlers
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Session and configuration errors
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BridgeError {
    /// A session with this id is already registered
    #[error("Session {session_id} already exists")]
    DuplicateSession {
        /// Id that was requested
        session_id: SessionId,
    },

    /// `max_sessions` live sessions are already registered
    #[error("Too many sessions (limit {limit})")]
    TooManySessions {
        /// Configured live-session limit
        limit: usize,
    },

    /// No session with this id was ever registered
    #[error("Unknown session {session_id}")]
    UnknownSession {
        /// Id that was looked up
        session_id: SessionId,
    },

    /// The session exists but has ended
    #[error("Session {session_id} is closed")]
    SessionClosed {
        /// Closed session
        session_id: SessionId,
    },

    /// The engine did not answer in time
    #[error("Timeout: {operation} exceeded {timeout_ms}ms")]
    Timeout {
        /// Native command that timed out
        operation: String,
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The multiplexer has been disposed
    #[error("Connection multiplexer has been disposed")]
    MultiplexerDisposed,

    /// Native connection failure
    #[error("Native error: {0}")]
    Native(#[from] NativeError),

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Configuration {
        /// What is wrong
        message: String,
        /// Offending config key, e.g. `connection.port`
        key: Option<String>,
    },

    /// Config file could not be loaded
    #[error("Config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error for a specific key
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Whether the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure of one client command
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// The domain has no such action
    #[error("Unknown {domain} method: {action}")]
    UnknownMethod {
        /// Domain of the command
        domain: Domain,
        /// Action the domain does not know
        action: String,
    },

    /// Required params missing or of the wrong type
    #[error("Invalid params: {message}")]
    InvalidParams {
        /// Deserialization or validation failure
        message: String,
    },

    /// The command addressed a session that has ended
    #[error("Session {session_id} has ended")]
    StaleSession {
        /// Ended session
        session_id: SessionId,
    },

    /// The session is not in a state that allows the command
    #[error("Invalid state: {message}")]
    InvalidState {
        /// Current phase and the rejected move
        message: String,
    },

    /// No engine has connected yet
    #[error("No debug session")]
    NoSession,

    /// Multiplexer failure
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    /// Engine-side failure
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl HandlerError {
    /// Create an unknown-method error
    pub fn unknown_method(domain: Domain, action: impl Into<String>) -> Self {
        Self::UnknownMethod {
            domain,
            action: action.into(),
        }
    }

    /// Create an invalid-params error
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Text of the error reply sent to the client.
    ///
    /// Unknown methods are an ordinary client mistake and are reported as is.
    /// Everything else is wrapped together with its source chain.
    pub fn reply_text(&self) -> String {
        match self {
            Self::UnknownMethod { .. } => self.to_string(),
            _ => format!("Error handling command: {self}\n {}", error_chain(self)),
        }
    }
}

/// Render the `source()` chain of an error, or its debug form if it has none
pub(crate) fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    if parts.is_empty() {
        format!("{err:?}")
    } else {
        parts.join("\n caused by: ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_method_reply_is_bare() {
        let err = HandlerError::unknown_method(Domain::Debugger, "frobnicate");
        assert_eq!(err.reply_text(), "Unknown Debugger method: frobnicate");
    }

    #[test]
    fn test_other_errors_are_wrapped() {
        let err = HandlerError::invalid_params("missing 'url'");
        let text = err.reply_text();
        assert!(text.starts_with("Error handling command: Invalid params: missing 'url'\n "));
    }

    #[test]
    fn test_chain_includes_sources() {
        let err = HandlerError::Bridge(BridgeError::Native(NativeError::Closed));
        let text = err.reply_text();
        assert!(text.contains("Native error: Connection closed"));
        assert!(text.contains("Connection closed"));
    }

    #[test]
    fn test_timeout_display() {
        let err = BridgeError::timeout("stack_get", 5000);
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Timeout: stack_get exceeded 5000ms");
    }

    #[test]
    fn test_session_error_display() {
        let session_id = SessionId::from("s1");
        assert_eq!(
            BridgeError::DuplicateSession {
                session_id: session_id.clone()
            }
            .to_string(),
            "Session s1 already exists"
        );
        assert_eq!(
            BridgeError::TooManySessions { limit: 2 }.to_string(),
            "Too many sessions (limit 2)"
        );
        assert_eq!(
            HandlerError::StaleSession { session_id }.to_string(),
            "Session s1 has ended"
        );
        let err = BridgeError::configuration_with_key("must be positive", "connection.port");
        assert!(matches!(
            &err,
            BridgeError::Configuration { key: Some(key), .. } if key == "connection.port"
        ));
        assert_eq!(err.to_string(), "Configuration error: must be positive");
    }
}
