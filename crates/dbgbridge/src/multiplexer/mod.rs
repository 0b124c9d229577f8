//! Connection multiplexer
//!
//! Manages any number of concurrent engine connections under one handle.
//!
//! ```text
//! ┌──────────────┐  MuxRequest   ┌──────────────────────────────┐
//! │ handle clone ├──────────────►│ actor task (owns sessions)   │
//! └──────────────┘               │   session A: reader, writer  │◄── engine A
//!        ▲                       │   session B: reader, writer  │◄── engine B
//!        │ broadcast / unbounded └──────────────┬───────────────┘
//!        └──────── SessionEvent ────────────────┘
//! ```
//!
//! Broadcast subscribers that fall behind lose events. Consumers that must
//! see every `Started` and `Ended` use [`ConnectionMultiplexer::subscribe_unbounded`].
//!
//! Commands are written in order per session. Each command gets a fresh
//! transaction id and a oneshot waiter; the reader task routes the engine's
//! answer back to it.

mod actor;
pub mod events;
pub mod session;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dbgbridge_native::{NativeCommand, NativeConnection, NativeResponse};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use self::actor::{MuxActor, MuxRequest, Submitted};
pub use self::events::{EndReason, SessionEvent};
pub use self::session::{ConnectionState, SessionId, SessionInfo};
use crate::config::ConnectionConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;

/// Multiplexer limits and policies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Maximum number of live sessions
    pub max_sessions: usize,
    /// Timeout for [`ConnectionMultiplexer::send`]
    pub command_timeout: Duration,
    /// Reject engines announcing another IDE key
    pub idekey: Option<String>,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

/// Unbounded event subscribers; closed receivers are pruned on the next event
pub(crate) type EventListeners = Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>;

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self::from(&ConnectionConfig::default())
    }
}

impl From<&ConnectionConfig> for MultiplexerConfig {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            command_timeout: config.command_timeout(),
            idekey: config.idekey.clone(),
            event_capacity: config.event_capacity.max(1),
        }
    }
}

/// Cloneable handle to the multiplexer actor
#[derive(Clone)]
pub struct ConnectionMultiplexer {
    requests: mpsc::UnboundedSender<MuxRequest>,
    events: broadcast::Sender<SessionEvent>,
    listeners: EventListeners,
    command_timeout: Duration,
    disposed: Arc<AtomicBool>,
    metrics: Arc<BridgeMetrics>,
}

impl std::fmt::Debug for ConnectionMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMultiplexer")
            .field("command_timeout", &self.command_timeout)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ConnectionMultiplexer {
    /// Start the actor. Must be called from within a tokio runtime.
    pub fn new(config: MultiplexerConfig, metrics: Arc<BridgeMetrics>) -> Self {
        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let listeners = EventListeners::default();
        let command_timeout = config.command_timeout;
        tokio::spawn(
            MuxActor::new(
                config,
                requests_rx,
                events.clone(),
                Arc::clone(&listeners),
                Arc::clone(&metrics),
            )
            .run(),
        );
        Self {
            requests,
            events,
            listeners,
            command_timeout,
            disposed: Arc::new(AtomicBool::new(false)),
            metrics,
        }
    }

    /// Register a connection under a caller-chosen id
    ///
    /// # Errors
    ///
    /// [`BridgeError::DuplicateSession`] if the id was ever registered,
    /// [`BridgeError::TooManySessions`] at the live-session limit,
    /// [`BridgeError::MultiplexerDisposed`] after disposal.
    pub async fn connect(
        &self,
        session_id: SessionId,
        connection: Arc<dyn NativeConnection>,
    ) -> BridgeResult<()> {
        self.request(|reply| MuxRequest::Connect {
            session_id,
            connection,
            reply,
        })
        .await?
    }

    /// Register a connection under a fresh id
    ///
    /// # Errors
    ///
    /// See [`ConnectionMultiplexer::connect`].
    pub async fn attach(&self, connection: Arc<dyn NativeConnection>) -> BridgeResult<SessionId> {
        let session_id = SessionId::new();
        self.connect(session_id.clone(), connection).await?;
        Ok(session_id)
    }

    /// Look up a session, including closed ones
    pub async fn get_session(&self, session_id: &SessionId) -> Option<SessionInfo> {
        let session_id = session_id.clone();
        self.request(|reply| MuxRequest::GetSession { session_id, reply })
            .await
            .ok()
            .flatten()
    }

    /// All sessions ever registered, oldest first
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.request(|reply| MuxRequest::Sessions { reply })
            .await
            .unwrap_or_default()
    }

    /// One round trip, bounded by the command timeout
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownSession`], [`BridgeError::SessionClosed`] (also
    /// when the session ends while waiting), [`BridgeError::Timeout`] or
    /// [`BridgeError::MultiplexerDisposed`].
    pub async fn send(
        &self,
        session_id: &SessionId,
        command: NativeCommand,
    ) -> BridgeResult<NativeResponse> {
        let name = command.name().to_string();
        let submitted = self.submit(session_id, command).await?;
        let transaction_id = submitted.transaction_id;

        match tokio::time::timeout(self.command_timeout, submitted.response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::SessionClosed {
                session_id: session_id.clone(),
            }),
            Err(_) => {
                self.metrics.inc_native_timeouts();
                warn!(session = %session_id, transaction_id, command = %name, "engine command timed out");
                let _ = self.requests.send(MuxRequest::Abandon {
                    session_id: session_id.clone(),
                    transaction_id,
                });
                Err(BridgeError::timeout(
                    name,
                    u64::try_from(self.command_timeout.as_millis()).unwrap_or(u64::MAX),
                ))
            }
        }
    }

    /// One round trip without a timeout, for `run` and `step_*`
    ///
    /// # Errors
    ///
    /// As [`ConnectionMultiplexer::send`], minus the timeout.
    pub async fn send_continuation(
        &self,
        session_id: &SessionId,
        command: NativeCommand,
    ) -> BridgeResult<NativeResponse> {
        let submitted = self.submit(session_id, command).await?;
        submitted
            .response
            .await
            .map_err(|_| BridgeError::SessionClosed {
                session_id: session_id.clone(),
            })?
    }

    /// Send the same command to every live session concurrently
    pub async fn broadcast(
        &self,
        command: NativeCommand,
    ) -> Vec<(SessionId, BridgeResult<NativeResponse>)> {
        let live: Vec<SessionId> = self
            .sessions()
            .await
            .into_iter()
            .filter(SessionInfo::is_live)
            .map(|info| info.id)
            .collect();
        let sends = live.into_iter().map(|session_id| {
            let command = command.clone();
            async move {
                let result = self.send(&session_id, command).await;
                (session_id, result)
            }
        });
        futures::future::join_all(sends).await
    }

    /// End a session. Closing an already closed session is a no-op.
    ///
    /// # Errors
    ///
    /// [`BridgeError::UnknownSession`] or [`BridgeError::MultiplexerDisposed`].
    pub async fn close(&self, session_id: &SessionId) -> BridgeResult<()> {
        let session_id = session_id.clone();
        self.request(|reply| MuxRequest::Close { session_id, reply })
            .await?
    }

    /// Subscribe to lifecycle events. The receiver lags, and loses events,
    /// once it falls more than `event_capacity` events behind.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Subscribe to every event emitted from now on, without a capacity
    /// bound. Dropping the receiver unsubscribes.
    pub fn subscribe_unbounded(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// End every session and stop the actor. Only the first call, across
    /// all clones, does anything.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("disposing connection multiplexer");
        let (reply, done) = oneshot::channel();
        if self.requests.send(MuxRequest::Dispose { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Whether [`ConnectionMultiplexer::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    async fn submit(&self, session_id: &SessionId, command: NativeCommand) -> BridgeResult<Submitted> {
        let session_id = session_id.clone();
        self.request(|reply| MuxRequest::Submit {
            session_id,
            command,
            reply,
        })
        .await?
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> MuxRequest,
    ) -> BridgeResult<T> {
        if self.is_disposed() {
            return Err(BridgeError::MultiplexerDisposed);
        }
        let (reply, response) = oneshot::channel();
        self.requests
            .send(make(reply))
            .map_err(|_| BridgeError::MultiplexerDisposed)?;
        response.await.map_err(|_| BridgeError::MultiplexerDisposed)
    }
}
