//! `Console` domain: program output

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dbgbridge_native::StreamKind;
use dbgbridge_protocol::types::ConsoleMessage;
use dbgbridge_protocol::{Domain, MessageId};
use serde_json::{Value, json};
use tracing::{debug, trace};

use super::DomainHandler;
use crate::callback::ClientCallback;
use crate::error::{HandlerError, HandlerResult};

/// Handler for the `Console` domain. Output is only forwarded while enabled.
#[derive(Debug)]
pub struct ConsoleHandler {
    callback: Arc<ClientCallback>,
    enabled: AtomicBool,
}

impl ConsoleHandler {
    /// Disabled handler
    pub fn new(callback: Arc<ClientCallback>) -> Self {
        Self {
            callback,
            enabled: AtomicBool::new(false),
        }
    }

    /// Whether `Console.enable` is in effect
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Forward engine output as `Console.messageAdded`
    pub fn on_stream(&self, kind: StreamKind, data: &str) {
        if !self.is_enabled() {
            trace!(?kind, bytes = data.len(), "console disabled, output dropped");
            return;
        }
        let level = match kind {
            StreamKind::Stdout => "log",
            StreamKind::Stderr => "error",
        };
        self.callback.send_event(
            Domain::Console,
            "messageAdded",
            json!({ "message": ConsoleMessage::new(level, data) }),
        );
    }
}

#[async_trait]
impl DomainHandler for ConsoleHandler {
    fn domain(&self) -> Domain {
        Domain::Console
    }

    async fn handle_method(&self, id: MessageId, action: &str, _params: Value) -> HandlerResult<Value> {
        debug!(%id, action, "Console command");
        match action {
            "enable" => {
                self.enabled.store(true, Ordering::Release);
                Ok(json!({}))
            }
            "disable" => {
                self.enabled.store(false, Ordering::Release);
                Ok(json!({}))
            }
            "clearMessages" => {
                self.callback
                    .send_event(Domain::Console, "messagesCleared", json!({}));
                Ok(json!({}))
            }
            _ => Err(HandlerError::unknown_method(Domain::Console, action)),
        }
    }
}
