//! `Runtime` domain: evaluation and object inspection

use async_trait::async_trait;
use dbgbridge_native::NativeCommand;
use dbgbridge_protocol::types::ExecutionContextDescription;
use dbgbridge_protocol::{Domain, MessageId};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::remote_object::{LOCALS_CONTEXT, ObjectRef, descriptors, evaluation_result};
use super::{DomainHandler, HandlerContext, parse_params, to_result};
use crate::error::{HandlerError, HandlerResult};

/// Id of the single execution context the bridge reports
pub const EXECUTION_CONTEXT_ID: u32 = 1;

#[derive(Debug, Deserialize)]
struct EvaluateParams {
    expression: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetPropertiesParams {
    object_id: String,
}

/// Handler for the `Runtime` domain
#[derive(Debug, Clone)]
pub struct RuntimeHandler {
    ctx: HandlerContext,
}

impl RuntimeHandler {
    /// Handler sharing `ctx` with the other domains
    pub fn new(ctx: HandlerContext) -> Self {
        Self { ctx }
    }

    fn enable(&self) -> HandlerResult<Value> {
        let context = ExecutionContextDescription {
            id: EXECUTION_CONTEXT_ID,
            frame_id: "1".to_string(),
            name: "dbgbridge".to_string(),
        };
        self.ctx.emit(
            Domain::Runtime,
            "executionContextCreated",
            json!({ "context": to_result(&context)? }),
        );
        Ok(json!({}))
    }

    async fn evaluate(&self, params: EvaluateParams) -> HandlerResult<Value> {
        let session_id = self.ctx.sessions.target()?;
        self.ctx.sessions.require_paused(&session_id)?;
        let response = self
            .ctx
            .multiplexer
            .send(&session_id, NativeCommand::eval(params.expression))
            .await?;
        let parent = ObjectRef::scope(session_id, 0, LOCALS_CONTEXT);
        Ok(evaluation_result(&response, &parent))
    }

    async fn get_properties(&self, params: GetPropertiesParams) -> HandlerResult<Value> {
        let object = ObjectRef::decode(&params.object_id)?;
        self.ctx.sessions.require_paused(&object.session)?;

        let properties = match &object.fullname {
            None => {
                let response = self
                    .ctx
                    .multiplexer
                    .send(
                        &object.session,
                        NativeCommand::context_get(object.depth, object.context),
                    )
                    .await?
                    .into_result()?;
                descriptors(&response.children, &object)
            }
            Some(fullname) => {
                let response = self
                    .ctx
                    .multiplexer
                    .send(
                        &object.session,
                        NativeCommand::property_get(object.depth, object.context, fullname.as_str()),
                    )
                    .await?
                    .into_result()?;
                response
                    .child("property")
                    .map(|property| descriptors(&property.children, &object))
                    .unwrap_or_default()
            }
        };
        debug!(object = %params.object_id, count = properties.len(), "properties fetched");
        Ok(json!({ "result": to_result(&properties)? }))
    }
}

#[async_trait]
impl DomainHandler for RuntimeHandler {
    fn domain(&self) -> Domain {
        Domain::Runtime
    }

    async fn handle_method(&self, id: MessageId, action: &str, params: Value) -> HandlerResult<Value> {
        debug!(%id, action, "Runtime command");
        match action {
            "enable" => self.enable(),
            "disable" | "releaseObjectGroup" | "releaseObject" | "runIfWaitingForDebugger" => {
                Ok(json!({}))
            }
            "evaluate" => self.evaluate(parse_params(params)?).await,
            "getProperties" => self.get_properties(parse_params(params)?).await,
            _ => Err(HandlerError::unknown_method(Domain::Runtime, action)),
        }
    }
}
