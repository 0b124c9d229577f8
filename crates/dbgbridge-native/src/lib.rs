//! dbgbridge-native: the engine side of the debugger bridge
//!
//! The bridge talks to a runtime debug engine over a session-based protocol in
//! the DBGp family: the engine connects, announces itself with an `init`
//! packet, and then answers transaction-numbered commands. This crate holds
//! everything that is specific to that side of the bridge:
//!
//! - [`command`] - outbound commands and their wire form
//! - [`message`] - decoded inbound packets (init, response, stream, notify)
//! - [`connection`] - the [`NativeConnection`] trait the multiplexer drives
//! - [`channel`] - an in-process connection pair, used for embedding and tests
//! - [`framing`] - length-prefixed DBGp framing over any byte stream
//!
//! Payload parsing is pluggable: a [`PacketDecoder`] turns one framed payload
//! into a generic [`NativeNode`] tree and [`NativeMessage::from_node`] takes it
//! from there.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod command;
pub mod connection;
pub mod error;
pub mod framing;
pub mod message;

pub use channel::{ChannelConnection, ChannelPeer};
pub use command::{NativeCommand, OutboundFrame};
pub use connection::NativeConnection;
pub use error::{NativeError, NativeResult};
pub use framing::{DbgpFrameCodec, FramedConnection, JsonPacketDecoder, PacketDecoder};
pub use message::{
    EngineStatus, ErrorDetail, InitPacket, NativeMessage, NativeNode, NativeResponse,
    StreamKind, StreamPacket,
};
