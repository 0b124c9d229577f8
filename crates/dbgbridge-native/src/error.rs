//! Native connection errors

use thiserror::Error;

/// Result type for native-side operations
pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// Errors raised on the engine side of the bridge
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum NativeError {
    /// The connection could not be used
    #[error("Connection error: {message}")]
    Connection {
        /// What went wrong
        message: String,
        /// Remote endpoint, when known
        endpoint: Option<String>,
    },

    /// The connection was closed by either side
    #[error("Connection closed")]
    Closed,

    /// A frame on the wire was malformed
    #[error("Framing error: {message}")]
    Framing {
        /// What went wrong
        message: String,
    },

    /// A payload could not be turned into a message
    #[error("Decode error: {message}")]
    Decode {
        /// What went wrong
        message: String,
        /// Packet or element the decoder was looking at
        element: Option<String>,
    },

    /// The engine answered a command with an `<error>` element
    #[error("Engine error {code} in '{command}': {message}")]
    ErrorResponse {
        /// Engine error code
        code: u32,
        /// Engine error message
        message: String,
        /// Command that failed
        command: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NativeError {
    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            endpoint: None,
        }
    }

    /// Create a connection error naming the remote endpoint
    pub fn connection_with_endpoint(message: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a framing error
    pub fn framing(message: impl Into<String>) -> Self {
        Self::Framing {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            element: None,
        }
    }

    /// Create a decode error naming the element that failed
    pub fn decode_in(message: impl Into<String>, element: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            element: Some(element.into()),
        }
    }

    /// Whether the error means the connection is gone for good
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Closed | Self::Connection { .. } | Self::Framing { .. } | Self::Io(_)
        )
    }
}
