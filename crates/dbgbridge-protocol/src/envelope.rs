//! Inbound command envelope
//!
//! Clients send one JSON object per command:
//!
//! ```json
//! {"id": 1, "method": "Debugger.setBreakpointByUrl", "params": {"url": "file:///a.php", "lineNumber": 9}}
//! ```
//!
//! [`parse_command`] validates the envelope in a fixed order (JSON, method,
//! method shape, id) so the error a client sees for a given input is stable.
//! Every failure keeps the raw text and, when one could be read, the id.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CommandError, CommandResult};

/// Client-assigned request id used to correlate a reply with its command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// `Domain.action` split into its two segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodName {
    /// Segment before the dot; not yet checked against the registry
    pub domain: String,
    /// Segment after the dot
    pub action: String,
}

impl MethodName {
    /// Split a method string. Exactly one dot with text on both sides.
    pub fn split(method: &str) -> Option<Self> {
        let (domain, action) = method.split_once('.')?;
        if domain.is_empty() || action.is_empty() || action.contains('.') {
            return None;
        }
        Some(Self {
            domain: domain.to_string(),
            action: action.to_string(),
        })
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.domain, self.action)
    }
}

/// A validated client command
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Request id
    pub id: MessageId,
    /// Parsed method name
    pub method: MethodName,
    /// Parameters; `{}` when the client omitted them
    pub params: Value,
    /// The exact text the command arrived as
    pub raw: String,
}

/// Parse and validate one raw client command.
///
/// # Errors
///
/// Returns a [`CommandError`] describing the first problem found. The error
/// always carries `raw`, and carries the id whenever the input had a numeric
/// `id` field.
pub fn parse_command(raw: &str) -> CommandResult<Command> {
    let value: Value =
        serde_json::from_str(raw).map_err(|_| CommandError::unparsable(raw.to_string()))?;

    let id = value.get("id").and_then(read_id);

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| CommandError::missing_method(id, raw.to_string()))?;

    let method = MethodName::split(method)
        .ok_or_else(|| CommandError::bad_method(id, raw.to_string()))?;

    let id = id.ok_or_else(|| CommandError::missing_id(raw.to_string()))?;

    let params = match value.get("params") {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(params) => params.clone(),
    };

    Ok(Command {
        id,
        method,
        params,
        raw: raw.to_string(),
    })
}

fn read_id(value: &Value) -> Option<MessageId> {
    if let Some(id) = value.as_i64() {
        return Some(MessageId(id));
    }
    // Integral floats such as `3.0` are accepted, anything fractional is not
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| MessageId(f as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_valid_command() {
        let raw = r#"{"id":1,"method":"Debugger.enable","params":{"a":1}}"#;
        let command = parse_command(raw).unwrap();
        assert_eq!(command.id, MessageId(1));
        assert_eq!(command.method.domain, "Debugger");
        assert_eq!(command.method.action, "enable");
        assert_eq!(command.params, json!({"a": 1}));
        assert_eq!(command.raw, raw);
    }

    #[test]
    fn test_params_default_to_empty_object() {
        let command = parse_command(r#"{"id":4,"method":"Page.enable"}"#).unwrap();
        assert_eq!(command.params, json!({}));

        let command = parse_command(r#"{"id":4,"method":"Page.enable","params":null}"#).unwrap();
        assert_eq!(command.params, json!({}));
    }

    #[test]
    fn test_unparsable_has_no_id() {
        let err = parse_command("{not json").unwrap_err();
        assert!(matches!(err, CommandError::Unparsable { .. }));
        assert_eq!(err.id(), None);
        assert_eq!(err.to_string(), "Unparsable command: {not json");
    }

    #[test]
    fn test_missing_method_keeps_id() {
        let err = parse_command(r#"{"id":7,"params":{}}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingMethod { .. }));
        assert_eq!(err.id(), Some(MessageId(7)));

        let err = parse_command(r#"{"id":7,"method":12}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingMethod { .. }));
    }

    #[test]
    fn test_badly_formatted_methods() {
        for method in ["onlyonepart", "A.b.c", ".enable", "Debugger.", "."] {
            let raw = json!({"id": 3, "method": method, "params": {}}).to_string();
            let err = parse_command(&raw).unwrap_err();
            assert!(
                matches!(err, CommandError::BadMethod { .. }),
                "{method} should be rejected"
            );
            assert_eq!(err.id(), Some(MessageId(3)));
            assert_eq!(err.to_string(), format!("Badly formatted method: {raw}"));
        }
    }

    #[test]
    fn test_missing_id() {
        let err = parse_command(r#"{"method":"Debugger.enable"}"#).unwrap_err();
        assert!(matches!(err, CommandError::MissingId { .. }));
        assert_eq!(err.id(), None);
    }

    #[test]
    fn test_integral_float_id() {
        let command = parse_command(r#"{"id":5.0,"method":"Debugger.pause"}"#).unwrap();
        assert_eq!(command.id, MessageId(5));
        assert!(parse_command(r#"{"id":5.5,"method":"Debugger.pause"}"#).is_err());
    }

    #[test]
    fn test_non_object_json() {
        let err = parse_command("[1,2,3]").unwrap_err();
        assert!(matches!(err, CommandError::MissingMethod { .. }));
        assert_eq!(err.id(), None);
    }

    #[test]
    fn test_method_name_display() {
        let name = MethodName::split("Runtime.getProperties").unwrap();
        assert_eq!(name.to_string(), "Runtime.getProperties");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn never_panics_on_arbitrary_text(raw in ".*") {
                let _ = parse_command(&raw);
            }

            #[test]
            fn dotless_methods_are_rejected(method in "[A-Za-z]{1,12}") {
                let raw = json!({"id": 1, "method": method}).to_string();
                let is_bad_method = matches!(parse_command(&raw), Err(CommandError::BadMethod { .. }));
                prop_assert!(is_bad_method);
            }
        }
    }
}
