//! DBGp framing over byte streams
//!
//! Engine to bridge: `<decimal length>\0<payload>\0`.
//! Bridge to engine: `<command line>\0`.
//!
//! [`DbgpFrameCodec`] handles both directions for `tokio_util::codec`, and
//! [`FramedConnection`] wraps any `AsyncRead + AsyncWrite` stream into a
//! [`NativeConnection`] by feeding each payload through a [`PacketDecoder`].

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace};

use crate::command::OutboundFrame;
use crate::connection::{ConnectionFuture, NativeConnection};
use crate::error::{NativeError, NativeResult};
use crate::message::{NativeMessage, NativeNode};

/// Default upper bound for a single inbound payload
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Longest length prefix accepted before the separating NUL
const MAX_LENGTH_DIGITS: usize = 20;

/// Turns one framed payload into an element tree
pub trait PacketDecoder: Send + Sync + std::fmt::Debug {
    /// Decode a payload
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Decode`] if the payload is not a valid packet.
    fn decode(&self, payload: &[u8]) -> NativeResult<NativeNode>;
}

/// Decodes payloads that carry a [`NativeNode`] serialized as JSON.
///
/// Engines with an XML wire format plug in their own [`PacketDecoder`];
/// this one serves proxies that re-encode packets and in-process tooling.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPacketDecoder;

impl PacketDecoder for JsonPacketDecoder {
    fn decode(&self, payload: &[u8]) -> NativeResult<NativeNode> {
        serde_json::from_slice(payload).map_err(|e| NativeError::decode(e.to_string()))
    }
}

/// Codec for the DBGp framing
#[derive(Debug, Clone)]
pub struct DbgpFrameCodec {
    max_frame_length: usize,
    /// Payload length once the prefix has been read
    pending_length: Option<usize>,
}

impl DbgpFrameCodec {
    /// Codec with the default frame limit
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Codec with a custom frame limit
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            pending_length: None,
        }
    }
}

impl Default for DbgpFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DbgpFrameCodec {
    type Item = Bytes;
    type Error = NativeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let length = match self.pending_length {
            Some(length) => length,
            None => {
                let Some(nul) = src.iter().position(|b| *b == 0) else {
                    if src.len() > MAX_LENGTH_DIGITS {
                        return Err(NativeError::framing("length prefix too long"));
                    }
                    return Ok(None);
                };
                let digits = std::str::from_utf8(&src[..nul])
                    .map_err(|_| NativeError::framing("length prefix is not ASCII"))?;
                let length: usize = digits
                    .trim()
                    .parse()
                    .map_err(|_| NativeError::framing(format!("bad length prefix '{digits}'")))?;
                if length > self.max_frame_length {
                    return Err(NativeError::framing(format!(
                        "frame of {length} bytes exceeds limit of {}",
                        self.max_frame_length
                    )));
                }
                src.advance(nul + 1);
                self.pending_length = Some(length);
                length
            }
        };

        // payload plus its terminating NUL
        if src.len() < length + 1 {
            src.reserve(length + 1 - src.len());
            return Ok(None);
        }
        let payload = src.split_to(length).freeze();
        if src.get_u8() != 0 {
            return Err(NativeError::framing("payload not NUL-terminated"));
        }
        self.pending_length = None;
        Ok(Some(payload))
    }
}

impl Encoder<OutboundFrame> for DbgpFrameCodec {
    type Error = NativeError;

    fn encode(&mut self, item: OutboundFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = item.to_wire();
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(0);
        Ok(())
    }
}

/// [`NativeConnection`] over a byte stream
pub struct FramedConnection<T> {
    sink: tokio::sync::Mutex<SplitSink<Framed<T, DbgpFrameCodec>, OutboundFrame>>,
    stream: tokio::sync::Mutex<SplitStream<Framed<T, DbgpFrameCodec>>>,
    decoder: Arc<dyn PacketDecoder>,
    endpoint: Option<String>,
}

impl<T> std::fmt::Debug for FramedConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedConnection")
            .field("endpoint", &self.endpoint)
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

impl<T> FramedConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap a stream
    pub fn new(io: T, decoder: Arc<dyn PacketDecoder>) -> Self {
        Self::with_codec(io, DbgpFrameCodec::new(), decoder)
    }

    /// Wrap a stream with a preconfigured codec
    pub fn with_codec(io: T, codec: DbgpFrameCodec, decoder: Arc<dyn PacketDecoder>) -> Self {
        let (sink, stream) = Framed::new(io, codec).split();
        Self {
            sink: tokio::sync::Mutex::new(sink),
            stream: tokio::sync::Mutex::new(stream),
            decoder,
            endpoint: None,
        }
    }

    /// Record the remote endpoint for logs and session info
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl<T> NativeConnection for FramedConnection<T>
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn send(&self, frame: OutboundFrame) -> ConnectionFuture<'_, ()> {
        Box::pin(async move {
            trace!(transaction_id = frame.transaction_id, command = %frame.command, "writing frame");
            self.sink.lock().await.send(frame).await
        })
    }

    fn receive(&self) -> ConnectionFuture<'_, Option<NativeMessage>> {
        Box::pin(async move {
            let Some(payload) = self.stream.lock().await.next().await.transpose()? else {
                debug!(endpoint = ?self.endpoint, "engine closed the stream");
                return Ok(None);
            };
            let node = self.decoder.decode(&payload)?;
            NativeMessage::from_node(node).map(Some)
        })
    }

    fn close(&self) -> ConnectionFuture<'_, ()> {
        Box::pin(async move { self.sink.lock().await.close().await })
    }

    fn endpoint(&self) -> Option<String> {
        self.endpoint.clone()
    }
}
