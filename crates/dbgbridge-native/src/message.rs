//! Decoded inbound packets
//!
//! Payload decoding happens in two steps. A [`PacketDecoder`](crate::PacketDecoder)
//! turns bytes into a generic [`NativeNode`] tree; [`NativeMessage::from_node`]
//! then interprets the root element. Keeping the typed layer independent of
//! the byte format lets the bridge run against any engine whose packets can
//! be expressed as an element tree.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{NativeError, NativeResult};

/// Generic decoded element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeNode {
    /// Element name
    pub name: String,
    /// Attributes
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Text content, possibly base64 (see [`NativeNode::decoded_text`])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Child elements in document order
    #[serde(default)]
    pub children: Vec<NativeNode>,
}

impl NativeNode {
    /// Element with no attributes, text or children
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder: add an attribute
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    /// Builder: set text content
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builder: set base64-encoded text content
    #[must_use]
    pub fn with_base64_text(self, text: &str) -> Self {
        self.with_attr("encoding", "base64")
            .with_text(STANDARD.encode(text.as_bytes()))
    }

    /// Builder: append a child
    #[must_use]
    pub fn with_child(mut self, child: NativeNode) -> Self {
        self.children.push(child);
        self
    }

    /// Attribute value
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Attribute parsed as a number
    pub fn attr_u32(&self, key: &str) -> Option<u32> {
        self.attr(key).and_then(|v| v.trim().parse().ok())
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&NativeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NativeNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text content with `encoding="base64"` undone
    pub fn decoded_text(&self) -> Option<String> {
        decode_text(self.attr("encoding"), self.text.as_deref())
    }
}

fn decode_text(encoding: Option<&str>, text: Option<&str>) -> Option<String> {
    let text = text?;
    if encoding != Some("base64") {
        return Some(text.to_string());
    }
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => Some(text.to_string()),
    }
}

/// Engine execution status carried by responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// Before the first continuation
    Starting,
    /// Script finished, engine still accepting inspection commands
    Stopping,
    /// Engine is gone
    Stopped,
    /// Executing
    Running,
    /// Suspended at a breakpoint or step
    Break,
}

impl EngineStatus {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Break => "break",
        }
    }

    /// Whether this status means the debuggee has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopping | Self::Stopped)
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineStatus {
    type Err = NativeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starting" => Ok(Self::Starting),
            "stopping" => Ok(Self::Stopping),
            "stopped" => Ok(Self::Stopped),
            "running" => Ok(Self::Running),
            "break" => Ok(Self::Break),
            other => Err(NativeError::decode_in(
                format!("unknown status '{other}'"),
                "response",
            )),
        }
    }
}

/// Which output stream a `stream` packet carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// First packet of every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitPacket {
    /// IDE key the engine was started with
    pub idekey: Option<String>,
    /// Entry script
    pub fileuri: String,
    /// Engine language, e.g. `PHP`
    pub language: Option<String>,
    /// Protocol version
    pub protocol_version: Option<String>,
    /// Application id
    pub app_id: Option<String>,
    /// Thread id
    pub thread: Option<String>,
}

/// Error element inside a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Engine error code
    pub code: u32,
    /// Engine error message, empty if the engine gave none
    pub message: String,
}

/// Answer to one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeResponse {
    /// Transaction id of the command being answered
    pub transaction_id: u64,
    /// Command name being answered
    pub command: String,
    /// Engine status after the command, if reported
    pub status: Option<EngineStatus>,
    /// Why the status changed, e.g. `ok`, `error`, `exception`
    pub reason: Option<String>,
    /// All attributes of the response element
    pub attributes: BTreeMap<String, String>,
    /// Child elements (stack frames, properties, ...)
    pub children: Vec<NativeNode>,
    /// Text content of the response element, e.g. `source` output
    pub text: Option<String>,
    /// Error reported by the engine
    pub error: Option<ErrorDetail>,
}

impl NativeResponse {
    /// Bare successful response
    pub fn new(transaction_id: u64, command: impl Into<String>) -> Self {
        Self {
            transaction_id,
            command: command.into(),
            status: None,
            reason: None,
            attributes: BTreeMap::new(),
            children: Vec::new(),
            text: None,
            error: None,
        }
    }

    /// Text content with `encoding="base64"` undone
    pub fn decoded_text(&self) -> Option<String> {
        decode_text(self.attr("encoding"), self.text.as_deref())
    }

    /// Attribute value
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// First child with the given name
    pub fn child(&self, name: &str) -> Option<&NativeNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All children with the given name
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a NativeNode> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Turn an engine-reported error into `Err`
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::ErrorResponse`] when the response carries an error element.
    pub fn into_result(self) -> NativeResult<Self> {
        match self.error {
            Some(ErrorDetail { code, message }) => Err(NativeError::ErrorResponse {
                code,
                message,
                command: self.command,
            }),
            None => Ok(self),
        }
    }
}

/// Program output forwarded by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPacket {
    /// Stream the data was written to
    pub kind: StreamKind,
    /// Decoded text
    pub data: String,
}

/// One decoded inbound packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeMessage {
    /// Session announcement
    Init(InitPacket),
    /// Transaction answer
    Response(NativeResponse),
    /// Program output
    Stream(StreamPacket),
    /// Unsolicited engine notification
    Notify(NativeNode),
}

impl NativeMessage {
    /// Interpret a decoded element tree
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Decode`] for unknown root elements and for
    /// packets missing required attributes.
    pub fn from_node(node: NativeNode) -> NativeResult<Self> {
        match node.name.as_str() {
            "init" => {
                let fileuri = node
                    .attr("fileuri")
                    .ok_or_else(|| NativeError::decode_in("missing fileuri", "init"))?
                    .to_string();
                let owned = |key: &str| node.attr(key).map(str::to_string);
                Ok(Self::Init(InitPacket {
                    idekey: owned("idekey"),
                    fileuri,
                    language: owned("language"),
                    protocol_version: owned("protocol_version"),
                    app_id: owned("appid"),
                    thread: owned("thread"),
                }))
            }
            "response" => {
                let transaction_id = node
                    .attr("transaction_id")
                    .ok_or_else(|| NativeError::decode_in("missing transaction_id", "response"))?
                    .trim()
                    .parse::<u64>()
                    .map_err(|e| NativeError::decode_in(format!("bad transaction_id: {e}"), "response"))?;
                let command = node.attr("command").unwrap_or_default().to_string();
                let status: Option<EngineStatus> = node.attr("status").map(str::parse).transpose()?;
                let reason = node.attr("reason").map(str::to_string);
                let error = node.child("error").map(|e| ErrorDetail {
                    code: e.attr_u32("code").unwrap_or(0),
                    message: e
                        .child("message")
                        .and_then(NativeNode::decoded_text)
                        .or_else(|| e.decoded_text())
                        .unwrap_or_default(),
                });
                let NativeNode {
                    attributes,
                    children,
                    text,
                    ..
                } = node;
                let children = children.into_iter().filter(|c| c.name != "error").collect();
                Ok(Self::Response(NativeResponse {
                    transaction_id,
                    command,
                    status,
                    reason,
                    attributes,
                    children,
                    text,
                    error,
                }))
            }
            "stream" => {
                let kind = match node.attr("type") {
                    Some("stdout") => StreamKind::Stdout,
                    Some("stderr") => StreamKind::Stderr,
                    other => {
                        return Err(NativeError::decode_in(
                            format!("unknown stream type {other:?}"),
                            "stream",
                        ));
                    }
                };
                Ok(Self::Stream(StreamPacket {
                    kind,
                    data: node.decoded_text().unwrap_or_default(),
                }))
            }
            "notify" => Ok(Self::Notify(node)),
            other => Err(NativeError::decode(format!("unexpected packet <{other}>"))),
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Response(_) => "response",
            Self::Stream(_) => "stream",
            Self::Notify(_) => "notify",
        }
    }
}
