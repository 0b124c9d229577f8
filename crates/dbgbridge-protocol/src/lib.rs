//! dbgbridge-protocol: the client side of the debugger bridge
//!
//! Everything the front-end debugger client sends or receives lives here:
//!
//! - [`envelope`] - inbound command envelope (`{id, method, params}`) and its parser
//! - [`outbound`] - replies, error replies and events written back to the client
//! - [`domain`] - the closed set of protocol domains the bridge serves
//! - [`types`] - DevTools payload types (call frames, remote objects, locations)
//!
//! # Example
//!
//! ```
//! use dbgbridge_protocol::{parse_command, MessageId, OutboundMessage};
//!
//! let command = parse_command(r#"{"id":1,"method":"Debugger.enable","params":{}}"#).unwrap();
//! assert_eq!(command.method.domain, "Debugger");
//! assert_eq!(command.method.action, "enable");
//!
//! let reply = OutboundMessage::reply(MessageId(1), serde_json::json!({}));
//! assert_eq!(reply.to_json().unwrap(), r#"{"id":1,"result":{}}"#);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod envelope;
pub mod error;
pub mod outbound;
pub mod types;

pub use domain::Domain;
pub use envelope::{Command, MessageId, MethodName, parse_command};
pub use error::{CommandError, CommandResult};
pub use outbound::OutboundMessage;
