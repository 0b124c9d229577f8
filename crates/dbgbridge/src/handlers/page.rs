//! `Page` domain: a single frame standing in for the debugged program

use async_trait::async_trait;
use dbgbridge_protocol::{Domain, MessageId};
use serde_json::{Value, json};
use tracing::debug;

use super::DomainHandler;
use crate::error::{HandlerError, HandlerResult};

/// Handler for the `Page` domain
#[derive(Debug, Clone)]
pub struct PageHandler {
    target_url: String,
}

impl PageHandler {
    /// Handler reporting `target_url` as the frame url
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
        }
    }

    fn resource_tree(&self) -> Value {
        json!({
            "frameTree": {
                "frame": {
                    "id": "1",
                    "loaderId": "1",
                    "url": self.target_url,
                    "mimeType": "text/html",
                    "securityOrigin": self.target_url,
                },
                "resources": [],
            }
        })
    }
}

#[async_trait]
impl DomainHandler for PageHandler {
    fn domain(&self) -> Domain {
        Domain::Page
    }

    async fn handle_method(&self, id: MessageId, action: &str, _params: Value) -> HandlerResult<Value> {
        debug!(%id, action, "Page command");
        match action {
            "enable" | "disable" | "setOverlayMessage" => Ok(json!({})),
            "getResourceTree" => Ok(self.resource_tree()),
            "canScreencast" | "canEmulate" => Ok(json!({ "result": false })),
            _ => Err(HandlerError::unknown_method(Domain::Page, action)),
        }
    }
}
