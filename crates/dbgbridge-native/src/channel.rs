//! In-process connection pair
//!
//! [`ChannelConnection`] is the bridge's end, [`ChannelPeer`] plays the
//! engine. Useful when the engine lives in the same process, and as the
//! backbone of scripted engines in tests.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::command::OutboundFrame;
use crate::connection::{ConnectionFuture, NativeConnection};
use crate::error::{NativeError, NativeResult};
use crate::message::{
    EngineStatus, InitPacket, NativeMessage, NativeNode, NativeResponse, StreamKind, StreamPacket,
};

/// Bridge side of an in-process link
#[derive(Debug)]
pub struct ChannelConnection {
    outgoing: Mutex<Option<mpsc::UnboundedSender<OutboundFrame>>>,
    incoming: tokio::sync::Mutex<mpsc::UnboundedReceiver<NativeMessage>>,
    closed: AtomicBool,
    endpoint: String,
}

/// Engine side of an in-process link
#[derive(Debug)]
pub struct ChannelPeer {
    commands: mpsc::UnboundedReceiver<OutboundFrame>,
    packets: Option<mpsc::UnboundedSender<NativeMessage>>,
}

impl ChannelConnection {
    /// Create a connected pair
    pub fn pair(endpoint: impl Into<String>) -> (Self, ChannelPeer) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let connection = Self {
            outgoing: Mutex::new(Some(command_tx)),
            incoming: tokio::sync::Mutex::new(packet_rx),
            closed: AtomicBool::new(false),
            endpoint: endpoint.into(),
        };
        let peer = ChannelPeer {
            commands: command_rx,
            packets: Some(packet_tx),
        };
        (connection, peer)
    }

    /// Whether [`NativeConnection::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl NativeConnection for ChannelConnection {
    fn send(&self, frame: OutboundFrame) -> ConnectionFuture<'_, ()> {
        Box::pin(async move {
            let guard = self.outgoing.lock();
            let sender = guard.as_ref().ok_or(NativeError::Closed)?;
            sender.send(frame).map_err(|_| NativeError::Closed)
        })
    }

    fn receive(&self) -> ConnectionFuture<'_, Option<NativeMessage>> {
        Box::pin(async move {
            if self.is_closed() {
                return Ok(None);
            }
            Ok(self.incoming.lock().await.recv().await)
        })
    }

    fn close(&self) -> ConnectionFuture<'_, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::Release);
            self.outgoing.lock().take();
            Ok(())
        })
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.endpoint.clone())
    }
}

impl ChannelPeer {
    /// Next command written by the bridge; `None` once the bridge closed the link
    pub async fn next_command(&mut self) -> Option<OutboundFrame> {
        self.commands.recv().await
    }

    /// Deliver a packet to the bridge
    ///
    /// # Errors
    ///
    /// Returns [`NativeError::Closed`] if the peer hung up or the bridge side is gone.
    pub fn send(&self, message: NativeMessage) -> NativeResult<()> {
        self.packets
            .as_ref()
            .ok_or(NativeError::Closed)?
            .send(message)
            .map_err(|_| NativeError::Closed)
    }

    /// Send an `init` packet
    ///
    /// # Errors
    ///
    /// See [`ChannelPeer::send`].
    pub fn send_init(&self, fileuri: &str, idekey: Option<&str>) -> NativeResult<()> {
        self.send(NativeMessage::Init(InitPacket {
            idekey: idekey.map(str::to_string),
            fileuri: fileuri.to_string(),
            language: Some("PHP".to_string()),
            protocol_version: Some("1.0".to_string()),
            app_id: None,
            thread: None,
        }))
    }

    /// Answer a transaction with a status
    ///
    /// # Errors
    ///
    /// See [`ChannelPeer::send`].
    pub fn respond_status(
        &self,
        frame: &OutboundFrame,
        status: EngineStatus,
        reason: &str,
    ) -> NativeResult<()> {
        let mut response = NativeResponse::new(frame.transaction_id, frame.command.name());
        response.status = Some(status);
        response.reason = Some(reason.to_string());
        self.send(NativeMessage::Response(response))
    }

    /// Answer a transaction with child elements
    ///
    /// # Errors
    ///
    /// See [`ChannelPeer::send`].
    pub fn respond_with(
        &self,
        frame: &OutboundFrame,
        attributes: &[(&str, &str)],
        children: Vec<NativeNode>,
    ) -> NativeResult<()> {
        let mut response = NativeResponse::new(frame.transaction_id, frame.command.name());
        for (key, value) in attributes {
            response
                .attributes
                .insert((*key).to_string(), (*value).to_string());
        }
        response.children = children;
        self.send(NativeMessage::Response(response))
    }

    /// Write program output
    ///
    /// # Errors
    ///
    /// See [`ChannelPeer::send`].
    pub fn send_stream(&self, kind: StreamKind, data: &str) -> NativeResult<()> {
        self.send(NativeMessage::Stream(StreamPacket {
            kind,
            data: data.to_string(),
        }))
    }

    /// Hang up; the bridge's next `receive` returns `Ok(None)`
    pub fn disconnect(&mut self) {
        self.packets = None;
    }
}
