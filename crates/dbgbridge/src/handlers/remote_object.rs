//! Engine values as DevTools remote objects
//!
//! Object ids and call frame ids are small JSON documents, so a later
//! `Runtime.getProperties` or `evaluateOnCallFrame` can be routed back to the
//! session, stack depth and context the value came from without keeping a
//! handle table.

use dbgbridge_native::{NativeNode, NativeResponse};
use dbgbridge_protocol::types::{PropertyDescriptor, RemoteObject, Scope, ScopeType};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{HandlerError, HandlerResult};
use crate::multiplexer::SessionId;

/// Context holding local variables
pub const LOCALS_CONTEXT: u32 = 0;
/// Context holding superglobals
pub const GLOBALS_CONTEXT: u32 = 1;

/// Decoded `objectId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    /// Session the value lives in
    pub session: SessionId,
    /// Stack depth, 0 for the top frame
    pub depth: u32,
    /// Engine context id
    pub context: u32,
    /// Engine expression naming the value; absent for a whole scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

impl ObjectRef {
    /// Reference to a whole scope
    pub fn scope(session: SessionId, depth: u32, context: u32) -> Self {
        Self {
            session,
            depth,
            context,
            fullname: None,
        }
    }

    /// Reference to a value reached through this one
    pub fn child(&self, fullname: impl Into<String>) -> Self {
        Self {
            fullname: Some(fullname.into()),
            ..self.clone()
        }
    }

    /// Wire form
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Parse a client-supplied `objectId`
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidParams`] if the id was not produced by [`ObjectRef::encode`].
    pub fn decode(object_id: &str) -> HandlerResult<Self> {
        serde_json::from_str(object_id)
            .map_err(|_| HandlerError::invalid_params(format!("Invalid objectId: {object_id}")))
    }
}

/// Decoded `callFrameId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRef {
    /// Session the frame belongs to
    pub session: SessionId,
    /// Stack depth
    pub depth: u32,
}

impl FrameRef {
    /// Wire form
    pub fn encode(&self) -> String {
        encode(self)
    }

    /// Parse a client-supplied `callFrameId`
    ///
    /// # Errors
    ///
    /// [`HandlerError::InvalidParams`] if the id was not produced by [`FrameRef::encode`].
    pub fn decode(call_frame_id: &str) -> HandlerResult<Self> {
        serde_json::from_str(call_frame_id).map_err(|_| {
            HandlerError::invalid_params(format!("Invalid callFrameId: {call_frame_id}"))
        })
    }
}

fn encode<T: Serialize>(value: &T) -> String {
    // plain structs of strings and integers always serialize
    serde_json::to_string(value).unwrap_or_default()
}

/// Scope chain of the frame at `depth`
pub fn scope_chain(session: &SessionId, depth: u32) -> Vec<Scope> {
    vec![
        Scope {
            scope_type: ScopeType::Local,
            object: RemoteObject::object(
                "Object",
                "Locals",
                ObjectRef::scope(session.clone(), depth, LOCALS_CONTEXT).encode(),
            ),
        },
        Scope {
            scope_type: ScopeType::Global,
            object: RemoteObject::object(
                "Object",
                "Superglobals",
                ObjectRef::scope(session.clone(), depth, GLOBALS_CONTEXT).encode(),
            ),
        },
    ]
}

/// Convert one `property` element. `parent` supplies session, depth and
/// context for the object id of structured values.
pub fn property_to_remote(property: &NativeNode, parent: &ObjectRef) -> RemoteObject {
    let value_type = property.attr("type").unwrap_or("undefined");
    let text = property.decoded_text().unwrap_or_default();
    let fullname = property
        .attr("fullname")
        .or_else(|| property.attr("name"))
        .unwrap_or_default();

    match value_type {
        "int" => text
            .trim()
            .parse::<i64>()
            .map_or_else(|_| RemoteObject::string(text.clone()), RemoteObject::integer),
        "float" => text
            .trim()
            .parse::<f64>()
            .map_or_else(|_| RemoteObject::string(text.clone()), RemoteObject::number),
        "bool" => RemoteObject::boolean(matches!(text.trim(), "1" | "true")),
        "string" => RemoteObject::string(text),
        "null" => RemoteObject::null(),
        "uninitialized" | "undefined" => RemoteObject::undefined(),
        "array" | "hash" => {
            let len = property
                .attr_u32("numchildren")
                .unwrap_or_default() as usize;
            RemoteObject::array(len, parent.child(fullname).encode())
        }
        "object" => {
            let class_name = property.attr("classname").unwrap_or("Object");
            RemoteObject::object(class_name, class_name, parent.child(fullname).encode())
        }
        other => RemoteObject::string(if text.is_empty() { other.to_string() } else { text }),
    }
}

/// Property descriptors for every `property` element in `nodes`
pub fn descriptors(nodes: &[NativeNode], parent: &ObjectRef) -> Vec<PropertyDescriptor> {
    nodes
        .iter()
        .filter(|node| node.name == "property")
        .map(|property| {
            let name = property
                .attr("name")
                .or_else(|| property.attr("fullname"))
                .unwrap_or_default();
            PropertyDescriptor::new(name, property_to_remote(property, parent))
        })
        .collect()
}

/// Remote object for an engine error, as reported by a failed `eval`
pub fn error_object(message: &str) -> RemoteObject {
    let mut object = RemoteObject::object("Error", message, "");
    object.subtype = Some("error".to_string());
    object.object_id = None;
    object
}

/// `{result, wasThrown}` for an `eval` response. Engine errors are reported
/// as a thrown value rather than a failed command.
pub fn evaluation_result(response: &NativeResponse, parent: &ObjectRef) -> Value {
    if let Some(error) = &response.error {
        return json!({ "result": error_object(&error.message), "wasThrown": true });
    }
    let result = response
        .child("property")
        .map_or_else(RemoteObject::undefined, |property| property_to_remote(property, parent));
    json!({ "result": result, "wasThrown": false })
}
