//! Client-facing transports
//!
//! A frontend feeds raw commands into a [`MessageTranslator`](crate::MessageTranslator)
//! and writes whatever the [`ClientCallback`](crate::ClientCallback) produces
//! back to the client.

pub mod stdio;

pub use stdio::{StdioFrontend, StdioFrontendConfig, run_stdio};
