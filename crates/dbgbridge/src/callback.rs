//! Client-bound message delivery
//!
//! Everything the bridge says to the client goes through one
//! [`ClientCallback`]. Once disposed it silently discards messages, which is
//! how late replies from commands still in flight at shutdown are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dbgbridge_protocol::{Domain, MessageId, OutboundMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::metrics::BridgeMetrics;

/// Transport boundary towards the client
pub trait ClientSink: Send + Sync {
    /// Hand one message to the transport; `false` if it could not be taken
    fn deliver(&self, message: OutboundMessage) -> bool;
}

impl ClientSink for mpsc::UnboundedSender<OutboundMessage> {
    fn deliver(&self, message: OutboundMessage) -> bool {
        self.send(message).is_ok()
    }
}

/// Single exit point for replies and events
pub struct ClientCallback {
    sink: Box<dyn ClientSink>,
    disposed: AtomicBool,
    metrics: Arc<BridgeMetrics>,
}

impl std::fmt::Debug for ClientCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCallback")
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ClientCallback {
    /// Callback writing to `sink`
    pub fn new(sink: impl ClientSink + 'static) -> Self {
        Self::with_metrics(sink, Arc::new(BridgeMetrics::new()))
    }

    /// Callback writing to `sink` and counting into `metrics`
    pub fn with_metrics(sink: impl ClientSink + 'static, metrics: Arc<BridgeMetrics>) -> Self {
        Self {
            sink: Box::new(sink),
            disposed: AtomicBool::new(false),
            metrics,
        }
    }

    /// Callback backed by an unbounded channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Metrics this callback counts into
    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.metrics
    }

    /// Successful reply
    pub fn reply(&self, id: MessageId, result: Value) {
        self.deliver(OutboundMessage::reply(id, result));
    }

    /// Error reply; `None` addresses it to `"id": null`
    pub fn reply_with_error(&self, id: Option<MessageId>, error: impl Into<String>) {
        self.deliver(OutboundMessage::error(id, error));
    }

    /// Spontaneous event
    pub fn send_event(&self, domain: Domain, name: &str, params: Value) {
        if self.deliver(OutboundMessage::event(domain, name, params)) {
            self.metrics.inc_events_sent();
        }
    }

    /// Stop delivering. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            debug!("client callback disposed");
        }
    }

    /// Whether [`ClientCallback::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn deliver(&self, message: OutboundMessage) -> bool {
        if self.is_disposed() {
            trace!(id = ?message.id(), "discarding message after dispose");
            self.metrics.inc_messages_dropped();
            return false;
        }
        let id = message.id();
        let delivered = self.sink.deliver(message);
        if !delivered {
            debug!(?id, "client sink closed, message dropped");
            self.metrics.inc_messages_dropped();
        }
        delivered
    }
}
