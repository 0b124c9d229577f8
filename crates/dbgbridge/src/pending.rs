//! In-flight command ledger
//!
//! Every dispatched command is represented by a [`PendingCommand`] token.
//! Completing it consumes the token, so a second reply cannot be written;
//! dropping it unanswered (a cancelled or panicking task) sends an error
//! reply from `Drop`, so no command goes unanswered.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dbgbridge_protocol::MessageId;
use serde_json::Value;
use tracing::{debug, warn};

use crate::callback::ClientCallback;

/// Ids of commands that have not been answered yet
#[derive(Debug)]
pub struct PendingCommands {
    in_flight: DashMap<MessageId, String>,
    callback: Arc<ClientCallback>,
}

impl PendingCommands {
    /// Empty ledger replying through `callback`
    pub fn new(callback: Arc<ClientCallback>) -> Arc<Self> {
        Arc::new(Self {
            in_flight: DashMap::new(),
            callback,
        })
    }

    /// Claim `id`. Returns `None` if a command with the same id is still in flight.
    pub fn begin(self: &Arc<Self>, id: MessageId, method: impl Into<String>) -> Option<PendingCommand> {
        let method = method.into();
        match self.in_flight.entry(id) {
            Entry::Occupied(existing) => {
                warn!(
                    %id,
                    method = %method,
                    in_flight = %existing.get(),
                    "dropping command that reuses an in-flight id"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(method.clone());
                Some(PendingCommand {
                    id,
                    method,
                    ledger: Arc::clone(self),
                    started: Instant::now(),
                    answered: false,
                })
            }
        }
    }

    /// Whether `id` is in flight
    pub fn contains(&self, id: MessageId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Number of commands in flight
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// A command awaiting its single reply
#[derive(Debug)]
pub struct PendingCommand {
    id: MessageId,
    method: String,
    ledger: Arc<PendingCommands>,
    started: Instant,
    answered: bool,
}

impl PendingCommand {
    /// Command id
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Method the command was dispatched to
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Reply with a result
    pub fn succeed(mut self, result: Value) {
        self.ledger.callback.metrics().inc_commands_succeeded();
        self.ledger.callback.reply(self.id, result);
        self.answered = true;
    }

    /// Reply with an error text
    pub fn fail(mut self, error: impl Into<String>) {
        self.ledger.callback.metrics().inc_commands_failed();
        self.ledger.callback.reply_with_error(Some(self.id), error);
        self.answered = true;
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        if !self.answered {
            debug!(id = %self.id, method = %self.method, "command dropped without a reply");
            self.ledger.callback.metrics().inc_commands_failed();
            self.ledger.callback.reply_with_error(
                Some(self.id),
                format!(
                    "Error handling command: {} was abandoned before completing\n task cancelled",
                    self.method
                ),
            );
        }
        self.ledger
            .callback
            .metrics()
            .record_latency(self.started.elapsed());
        // Freed only after the reply is out, so a reused id cannot overtake it
        self.ledger.in_flight.remove(&self.id);
    }
}
