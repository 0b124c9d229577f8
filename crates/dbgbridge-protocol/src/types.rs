//! DevTools payload types
//!
//! Only the fields the bridge actually produces or consumes are modelled.
//! Field names follow the client protocol (camelCase on the wire).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Position in a script; both coordinates are 0-based
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// Script the location belongs to
    pub script_id: String,
    /// 0-based line
    pub line_number: u32,
    /// 0-based column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

/// Kind of variable scope attached to a call frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeType {
    /// Function locals
    Local,
    /// Superglobals / globals
    Global,
    /// Class constants and other engine-defined contexts
    Closure,
}

/// A scope chain entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    /// Scope type
    #[serde(rename = "type")]
    pub scope_type: ScopeType,
    /// Object holding the scope's variables
    pub object: RemoteObject,
}

/// One stack frame as shown by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    /// Opaque frame id, echoed back in `evaluateOnCallFrame`
    pub call_frame_id: String,
    /// Function name, empty for top-level code
    pub function_name: String,
    /// Current position
    pub location: Location,
    /// Scope chain, innermost first
    pub scope_chain: Vec<Scope>,
    /// `this` for the frame
    pub this: RemoteObject,
}

/// Mirror of a value living in the debuggee
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    /// `object`, `string`, `number`, `boolean` or `undefined`
    #[serde(rename = "type")]
    pub object_type: String,
    /// Object subtype, e.g. `array` or `null`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Class name for objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    /// Primitive value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Display string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Handle for fetching children with `Runtime.getProperties`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl RemoteObject {
    fn primitive(object_type: &str, value: Value, description: String) -> Self {
        Self {
            object_type: object_type.to_string(),
            subtype: None,
            class_name: None,
            value: Some(value),
            description: Some(description),
            object_id: None,
        }
    }

    /// A string value
    pub fn string(value: impl Into<String>) -> Self {
        let value = value.into();
        Self::primitive("string", Value::String(value.clone()), value)
    }

    /// A numeric value
    pub fn number(value: f64) -> Self {
        let json = serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number);
        Self::primitive("number", json, value.to_string())
    }

    /// An integral numeric value
    pub fn integer(value: i64) -> Self {
        Self::primitive("number", Value::from(value), value.to_string())
    }

    /// A boolean value
    pub fn boolean(value: bool) -> Self {
        Self::primitive("boolean", Value::Bool(value), value.to_string())
    }

    /// `null`
    pub fn null() -> Self {
        Self {
            object_type: "object".to_string(),
            subtype: Some("null".to_string()),
            class_name: None,
            value: Some(Value::Null),
            description: Some("null".to_string()),
            object_id: None,
        }
    }

    /// `undefined`, used where the debuggee has no value at all
    pub fn undefined() -> Self {
        Self {
            object_type: "undefined".to_string(),
            subtype: None,
            class_name: None,
            value: None,
            description: None,
            object_id: None,
        }
    }

    /// A structured value whose children are fetched on demand
    pub fn object(
        class_name: impl Into<String>,
        description: impl Into<String>,
        object_id: impl Into<String>,
    ) -> Self {
        Self {
            object_type: "object".to_string(),
            subtype: None,
            class_name: Some(class_name.into()),
            value: None,
            description: Some(description.into()),
            object_id: Some(object_id.into()),
        }
    }

    /// An array whose elements are fetched on demand
    pub fn array(len: usize, object_id: impl Into<String>) -> Self {
        Self {
            object_type: "object".to_string(),
            subtype: Some("array".to_string()),
            class_name: Some("Array".to_string()),
            value: None,
            description: Some(format!("Array[{len}]")),
            object_id: Some(object_id.into()),
        }
    }
}

/// One entry of a `Runtime.getProperties` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Property value
    pub value: RemoteObject,
    /// Always true, the debuggee does not report mutability
    pub writable: bool,
    /// Always true
    pub configurable: bool,
    /// Always true
    pub enumerable: bool,
}

impl PropertyDescriptor {
    /// Plain data property
    pub fn new(name: impl Into<String>, value: RemoteObject) -> Self {
        Self {
            name: name.into(),
            value,
            writable: true,
            configurable: true,
            enumerable: true,
        }
    }
}

/// Payload of `Debugger.scriptParsed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptParsed {
    /// Assigned script id
    pub script_id: String,
    /// File URL as reported by the engine
    pub url: String,
    /// Always 0
    pub start_line: u32,
    /// Always 0
    pub start_column: u32,
    /// Unknown, reported as 0
    pub end_line: u32,
    /// Unknown, reported as 0
    pub end_column: u32,
}

impl ScriptParsed {
    /// Announcement for a file seen for the first time
    pub fn new(script_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            url: url.into(),
            start_line: 0,
            start_column: 0,
            end_line: 0,
            end_column: 0,
        }
    }
}

/// Payload of `Debugger.paused`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedEvent {
    /// Stack, innermost first
    pub call_frames: Vec<CallFrame>,
    /// `other`, `exception` or `breakpoint`
    pub reason: String,
    /// Extra data, e.g. the exception message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Payload of `Debugger.breakpointResolved` and of `setBreakpointByUrl` results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointResolved {
    /// Client-facing breakpoint id
    pub breakpoint_id: String,
    /// Where the breakpoint landed
    pub locations: Vec<Location>,
}

/// Payload entry of `Console.messageAdded`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    /// Always `console-api`
    pub source: String,
    /// `log` for stdout, `error` for stderr
    pub level: String,
    /// Message text
    pub text: String,
}

impl ConsoleMessage {
    /// Message with the given level
    pub fn new(level: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: "console-api".to_string(),
            level: level.into(),
            text: text.into(),
        }
    }
}

/// Payload entry of `Runtime.executionContextCreated`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContextDescription {
    /// Context id
    pub id: u32,
    /// Frame the context belongs to
    pub frame_id: String,
    /// Display name
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_remote_object_wire_shape() {
        let value = serde_json::to_value(RemoteObject::string("hi")).unwrap();
        assert_eq!(value, json!({"type": "string", "value": "hi", "description": "hi"}));

        let value = serde_json::to_value(RemoteObject::array(2, "obj-1")).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "object",
                "subtype": "array",
                "className": "Array",
                "description": "Array[2]",
                "objectId": "obj-1"
            })
        );
    }

    #[test]
    fn test_location_omits_missing_column() {
        let location = Location {
            script_id: "1".to_string(),
            line_number: 4,
            column_number: None,
        };
        assert_eq!(
            serde_json::to_value(location).unwrap(),
            json!({"scriptId": "1", "lineNumber": 4})
        );
    }

    #[test]
    fn test_scope_type_rename() {
        let scope = Scope {
            scope_type: ScopeType::Local,
            object: RemoteObject::object("Object", "Locals", "x"),
        };
        let value = serde_json::to_value(scope).unwrap();
        assert_eq!(value["type"], "local");
    }
}
