//! Domain handlers
//!
//! One handler per [`Domain`]. The translator owns the registry and sends the
//! single reply for every command; handlers only compute the result and emit
//! spontaneous events through the [`ClientCallback`].

pub mod breakpoints;
pub mod console;
pub mod debugger;
pub mod page;
pub mod remote_object;
pub mod runtime;
pub mod scripts;
pub mod session_table;

use std::sync::Arc;

use async_trait::async_trait;
use dbgbridge_protocol::{Domain, MessageId};
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use self::console::ConsoleHandler;
pub use self::debugger::DebuggerHandler;
pub use self::page::PageHandler;
pub use self::runtime::RuntimeHandler;
pub use self::session_table::{DebugPhase, SessionEndNotifier, SessionTable};
use crate::callback::ClientCallback;
use crate::config::ConnectionConfig;
use crate::error::{HandlerError, HandlerResult};
use crate::multiplexer::ConnectionMultiplexer;

/// Handles every command of one domain
#[async_trait]
pub trait DomainHandler: Send + Sync {
    /// Domain this handler is registered under
    fn domain(&self) -> Domain;

    /// Execute `action` and return the reply payload
    async fn handle_method(&self, id: MessageId, action: &str, params: Value) -> HandlerResult<Value>;

    /// Release whatever the handler holds. Called once, at translator disposal.
    async fn dispose(&self) {}
}

/// What every handler may reach
#[derive(Debug, Clone)]
pub struct HandlerContext {
    /// Outbound channel for events
    pub callback: Arc<ClientCallback>,
    /// Engine connections
    pub multiplexer: ConnectionMultiplexer,
    /// Debug phase of each session, shared by all handlers
    pub sessions: Arc<SessionTable>,
    /// Connection settings
    pub config: Arc<ConnectionConfig>,
}

impl HandlerContext {
    /// Emit an event to the client
    pub fn emit(&self, domain: Domain, name: &str, params: Value) {
        self.callback.send_event(domain, name, params);
    }
}

/// Deserialize command params into a typed struct
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> HandlerResult<T> {
    serde_json::from_value(params).map_err(|e| HandlerError::invalid_params(e.to_string()))
}

/// Serialize a reply payload
pub(crate) fn to_result<T: serde::Serialize>(value: &T) -> HandlerResult<Value> {
    serde_json::to_value(value).map_err(|e| HandlerError::invalid_state(e.to_string()))
}
