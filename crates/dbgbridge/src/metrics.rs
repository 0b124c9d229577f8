//! Bridge metrics
//!
//! Lock-free counters shared by the translator, the multiplexer and the
//! handlers. Read them with [`BridgeMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lock-free counters
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    commands_received: AtomicU64,
    commands_succeeded: AtomicU64,
    commands_failed: AtomicU64,
    commands_malformed: AtomicU64,
    duplicate_ids: AtomicU64,
    events_sent: AtomicU64,
    messages_dropped: AtomicU64,
    native_commands: AtomicU64,
    native_timeouts: AtomicU64,
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    active_sessions: AtomicU64,
    /// Exponential moving average, microseconds
    avg_command_latency_us: AtomicU64,
}

macro_rules! counter {
    ($($(#[$doc:meta])* $name:ident => $field:ident;)*) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl BridgeMetrics {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter! {
        /// A raw command reached the translator
        inc_commands_received => commands_received;
        /// A command was answered with a result
        inc_commands_succeeded => commands_succeeded;
        /// A command was answered with an error
        inc_commands_failed => commands_failed;
        /// A command was rejected before dispatch
        inc_commands_malformed => commands_malformed;
        /// A command reused an in-flight id and was dropped
        inc_duplicate_ids => duplicate_ids;
        /// An event was delivered to the client
        inc_events_sent => events_sent;
        /// A message was discarded because the client side is gone
        inc_messages_dropped => messages_dropped;
        /// A command was written to an engine
        inc_native_commands => native_commands;
        /// An engine command timed out
        inc_native_timeouts => native_timeouts;
    }

    /// A session became active
    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// A session ended; `was_active` is false for sessions rejected before start
    pub fn session_ended(&self, was_active: bool) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
        if was_active {
            // saturating: never wraps below zero
            let _ = self
                .active_sessions
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        }
    }

    /// Feed one command latency sample into the moving average
    pub fn record_latency(&self, latency: Duration) {
        let sample = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        let _ = self
            .avg_command_latency_us
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(if current == 0 {
                    sample
                } else {
                    current.saturating_mul(9).saturating_add(sample) / 10
                })
            });
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            commands_received: load(&self.commands_received),
            commands_succeeded: load(&self.commands_succeeded),
            commands_failed: load(&self.commands_failed),
            commands_malformed: load(&self.commands_malformed),
            duplicate_ids: load(&self.duplicate_ids),
            events_sent: load(&self.events_sent),
            messages_dropped: load(&self.messages_dropped),
            native_commands: load(&self.native_commands),
            native_timeouts: load(&self.native_timeouts),
            sessions_started: load(&self.sessions_started),
            sessions_ended: load(&self.sessions_ended),
            active_sessions: load(&self.active_sessions),
            average_latency_ms: load(&self.avg_command_latency_us) as f64 / 1000.0,
        }
    }
}

/// Serializable copy of [`BridgeMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Raw commands received
    pub commands_received: u64,
    /// Commands answered with a result
    pub commands_succeeded: u64,
    /// Commands answered with an error by a handler
    pub commands_failed: u64,
    /// Commands rejected before dispatch
    pub commands_malformed: u64,
    /// Commands dropped for reusing an in-flight id
    pub duplicate_ids: u64,
    /// Events delivered
    pub events_sent: u64,
    /// Messages discarded after the client side went away
    pub messages_dropped: u64,
    /// Commands written to engines
    pub native_commands: u64,
    /// Engine commands that timed out
    pub native_timeouts: u64,
    /// Sessions that became active
    pub sessions_started: u64,
    /// Sessions that ended
    pub sessions_ended: u64,
    /// Sessions currently active
    pub active_sessions: u64,
    /// Moving average of handler latency
    pub average_latency_ms: f64,
}
