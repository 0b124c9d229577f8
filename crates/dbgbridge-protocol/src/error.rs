//! Errors raised while validating a client command
//!
//! The `Display` text of each variant is exactly what the client receives in
//! the `error` field of the reply, so the raw command is always embedded.

use thiserror::Error;

use crate::envelope::MessageId;

/// Result type for command parsing
pub type CommandResult<T> = std::result::Result<T, CommandError>;

/// A malformed or unroutable client command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CommandError {
    /// The text was not valid JSON
    #[error("Unparsable command: {raw}")]
    Unparsable {
        /// Original command text
        raw: String,
    },

    /// `method` was absent or not a string
    #[error("Missing method: {raw}")]
    MissingMethod {
        /// Id, when one could be read
        id: Option<MessageId>,
        /// Original command text
        raw: String,
    },

    /// `method` did not split into exactly `Domain.action`
    #[error("Badly formatted method: {raw}")]
    BadMethod {
        /// Id, when one could be read
        id: Option<MessageId>,
        /// Original command text
        raw: String,
    },

    /// Well-formed command without a numeric `id`
    #[error("Missing id: {raw}")]
    MissingId {
        /// Original command text
        raw: String,
    },

    /// No handler is registered for the domain segment
    #[error("Unknown domain: {raw}")]
    UnknownDomain {
        /// Command id
        id: Option<MessageId>,
        /// Original command text
        raw: String,
    },
}

impl CommandError {
    /// Create an unparsable-command error
    pub fn unparsable(raw: impl Into<String>) -> Self {
        Self::Unparsable { raw: raw.into() }
    }

    /// Create a missing-method error
    pub fn missing_method(id: Option<MessageId>, raw: impl Into<String>) -> Self {
        Self::MissingMethod {
            id,
            raw: raw.into(),
        }
    }

    /// Create a badly-formatted-method error
    pub fn bad_method(id: Option<MessageId>, raw: impl Into<String>) -> Self {
        Self::BadMethod {
            id,
            raw: raw.into(),
        }
    }

    /// Create a missing-id error
    pub fn missing_id(raw: impl Into<String>) -> Self {
        Self::MissingId { raw: raw.into() }
    }

    /// Create an unknown-domain error
    pub fn unknown_domain(id: Option<MessageId>, raw: impl Into<String>) -> Self {
        Self::UnknownDomain {
            id,
            raw: raw.into(),
        }
    }

    /// Id to address the error reply to, `None` replies with `"id": null`
    pub fn id(&self) -> Option<MessageId> {
        match self {
            Self::Unparsable { .. } | Self::MissingId { .. } => None,
            Self::MissingMethod { id, .. }
            | Self::BadMethod { id, .. }
            | Self::UnknownDomain { id, .. } => *id,
        }
    }

    /// Raw command text that triggered the error
    pub fn raw(&self) -> &str {
        match self {
            Self::Unparsable { raw }
            | Self::MissingMethod { raw, .. }
            | Self::BadMethod { raw, .. }
            | Self::MissingId { raw }
            | Self::UnknownDomain { raw, .. } => raw,
        }
    }
}
