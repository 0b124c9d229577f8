//! The task that owns the session table
//!
//! Only this task mutates sessions. Handles talk to it through
//! [`MuxRequest`]s; each session's reader and writer tasks report back
//! through [`Inbound`] messages. Waiters are oneshot channels keyed by
//! transaction id, resolved when the matching response is read.

use std::collections::HashMap;
use std::sync::Arc;

use dbgbridge_native::{NativeCommand, NativeConnection, NativeMessage, NativeResponse, OutboundFrame};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{EventListeners, MultiplexerConfig};
use super::events::{EndReason, SessionEvent};
use super::session::{ConnectionState, SessionId, SessionInfo};
use crate::error::{BridgeError, BridgeResult};
use crate::metrics::BridgeMetrics;

type Waiter = oneshot::Sender<BridgeResult<NativeResponse>>;

/// A command accepted by the actor and written to the session's queue
pub(super) struct Submitted {
    pub transaction_id: u64,
    pub response: oneshot::Receiver<BridgeResult<NativeResponse>>,
}

pub(super) enum MuxRequest {
    Connect {
        session_id: SessionId,
        connection: Arc<dyn NativeConnection>,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    Submit {
        session_id: SessionId,
        command: NativeCommand,
        reply: oneshot::Sender<BridgeResult<Submitted>>,
    },
    Abandon {
        session_id: SessionId,
        transaction_id: u64,
    },
    GetSession {
        session_id: SessionId,
        reply: oneshot::Sender<Option<SessionInfo>>,
    },
    Sessions {
        reply: oneshot::Sender<Vec<SessionInfo>>,
    },
    Close {
        session_id: SessionId,
        reply: oneshot::Sender<BridgeResult<()>>,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

enum Inbound {
    Packet {
        session_id: SessionId,
        message: NativeMessage,
    },
    ReadEnded {
        session_id: SessionId,
        error: Option<String>,
    },
    WriteFailed {
        session_id: SessionId,
        error: String,
    },
}

struct SessionEntry {
    info: SessionInfo,
    connection: Arc<dyn NativeConnection>,
    next_transaction: u64,
    waiters: HashMap<u64, Waiter>,
    frames: Option<mpsc::UnboundedSender<OutboundFrame>>,
    tasks: Vec<JoinHandle<()>>,
}

pub(super) struct MuxActor {
    config: MultiplexerConfig,
    sessions: HashMap<SessionId, SessionEntry>,
    requests: mpsc::UnboundedReceiver<MuxRequest>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    events: broadcast::Sender<SessionEvent>,
    listeners: EventListeners,
    metrics: Arc<BridgeMetrics>,
}

impl MuxActor {
    pub(super) fn new(
        config: MultiplexerConfig,
        requests: mpsc::UnboundedReceiver<MuxRequest>,
        events: broadcast::Sender<SessionEvent>,
        listeners: EventListeners,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        Self {
            config,
            sessions: HashMap::new(),
            requests,
            inbound_tx,
            inbound,
            events,
            listeners,
            metrics,
        }
    }

    pub(super) async fn run(mut self) {
        debug!("multiplexer actor started");
        loop {
            tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Some(reply) = self.handle_request(request) {
                            self.shutdown().await;
                            let _ = reply.send(());
                            break;
                        }
                    }
                    None => {
                        // every handle dropped without disposing
                        self.shutdown().await;
                        break;
                    }
                },
                Some(inbound) = self.inbound.recv() => self.handle_inbound(inbound),
            }
        }
        debug!("multiplexer actor stopped");
    }

    /// Returns the reply channel when the request asks for disposal
    fn handle_request(&mut self, request: MuxRequest) -> Option<oneshot::Sender<()>> {
        match request {
            MuxRequest::Connect {
                session_id,
                connection,
                reply,
            } => {
                let _ = reply.send(self.connect(session_id, connection));
            }
            MuxRequest::Submit {
                session_id,
                command,
                reply,
            } => {
                let _ = reply.send(self.submit(&session_id, command));
            }
            MuxRequest::Abandon {
                session_id,
                transaction_id,
            } => {
                if let Some(entry) = self.sessions.get_mut(&session_id)
                    && entry.waiters.remove(&transaction_id).is_some()
                {
                    debug!(session = %session_id, transaction_id, "waiter abandoned");
                }
            }
            MuxRequest::GetSession { session_id, reply } => {
                let _ = reply.send(self.sessions.get(&session_id).map(|e| e.info.clone()));
            }
            MuxRequest::Sessions { reply } => {
                let mut infos: Vec<SessionInfo> =
                    self.sessions.values().map(|e| e.info.clone()).collect();
                infos.sort_by(|a, b| {
                    a.established_at
                        .cmp(&b.established_at)
                        .then_with(|| a.id.cmp(&b.id))
                });
                let _ = reply.send(infos);
            }
            MuxRequest::Close { session_id, reply } => {
                let result = match self.sessions.get(&session_id) {
                    None => Err(BridgeError::UnknownSession { session_id }),
                    Some(entry) if !entry.info.is_live() => Ok(()),
                    Some(_) => {
                        self.end_and_close(&session_id, EndReason::Closed);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }
            MuxRequest::Dispose { reply } => return Some(reply),
        }
        None
    }

    fn connect(
        &mut self,
        session_id: SessionId,
        connection: Arc<dyn NativeConnection>,
    ) -> BridgeResult<()> {
        if self.sessions.contains_key(&session_id) {
            return Err(BridgeError::DuplicateSession { session_id });
        }
        let live = self.sessions.values().filter(|e| e.info.is_live()).count();
        if live >= self.config.max_sessions {
            return Err(BridgeError::TooManySessions {
                limit: self.config.max_sessions,
            });
        }

        let endpoint = connection.endpoint();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let tasks = vec![
            spawn_reader(
                session_id.clone(),
                Arc::clone(&connection),
                self.inbound_tx.clone(),
            ),
            spawn_writer(
                session_id.clone(),
                Arc::clone(&connection),
                frames_rx,
                self.inbound_tx.clone(),
            ),
        ];

        info!(session = %session_id, endpoint = ?endpoint, "native connection registered");
        self.sessions.insert(
            session_id.clone(),
            SessionEntry {
                info: SessionInfo::new(session_id, endpoint),
                connection,
                next_transaction: 1,
                waiters: HashMap::new(),
                frames: Some(frames_tx),
                tasks,
            },
        );
        Ok(())
    }

    fn submit(&mut self, session_id: &SessionId, command: NativeCommand) -> BridgeResult<Submitted> {
        let entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| BridgeError::UnknownSession {
                session_id: session_id.clone(),
            })?;
        let closed = || BridgeError::SessionClosed {
            session_id: session_id.clone(),
        };
        if !entry.info.is_live() {
            return Err(closed());
        }
        let Some(frames) = entry.frames.clone() else {
            return Err(closed());
        };

        let transaction_id = entry.next_transaction;
        entry.next_transaction += 1;
        debug!(session = %session_id, transaction_id, command = %command, "sending native command");

        frames
            .send(OutboundFrame::new(transaction_id, command))
            .map_err(|_| closed())?;
        let (tx, rx) = oneshot::channel();
        entry.waiters.insert(transaction_id, tx);
        self.metrics.inc_native_commands();

        Ok(Submitted {
            transaction_id,
            response: rx,
        })
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Packet {
                session_id,
                message,
            } => self.handle_packet(&session_id, message),
            Inbound::ReadEnded {
                session_id,
                error: None,
            } => self.end_and_close(&session_id, EndReason::ConnectionClosed),
            Inbound::ReadEnded {
                session_id,
                error: Some(error),
            } => self.end_and_close(&session_id, EndReason::Failed(error)),
            Inbound::WriteFailed { session_id, error } => {
                self.end_and_close(&session_id, EndReason::Failed(error));
            }
        }
    }

    fn handle_packet(&mut self, session_id: &SessionId, message: NativeMessage) {
        let Some(entry) = self.sessions.get_mut(session_id) else {
            return;
        };
        if !entry.info.is_live() {
            trace!(session = %session_id, kind = message.kind(), "packet for closed session ignored");
            return;
        }

        match message {
            NativeMessage::Init(init) => {
                if entry.info.state != ConnectionState::Connecting {
                    warn!(session = %session_id, "duplicate init packet ignored");
                    return;
                }
                if let Some(expected) = &self.config.idekey
                    && init.idekey.as_deref() != Some(expected.as_str())
                {
                    warn!(
                        session = %session_id,
                        expected = %expected,
                        announced = ?init.idekey,
                        "rejecting engine with foreign idekey"
                    );
                    let idekey = init.idekey;
                    self.end_and_close(session_id, EndReason::Rejected { idekey });
                    return;
                }
                entry.info.state = ConnectionState::Active;
                entry.info.init = Some(init.clone());
                self.metrics.session_started();
                info!(session = %session_id, fileuri = %init.fileuri, "debug session started");
                self.emit(SessionEvent::Started {
                    session_id: session_id.clone(),
                    init,
                });
            }
            NativeMessage::Response(response) => {
                let status = response.status;
                let reason = response.reason.clone();
                let changed = status.is_some() && status != entry.info.status;
                if status.is_some() {
                    entry.info.status = status;
                }

                match entry.waiters.remove(&response.transaction_id) {
                    Some(waiter) => {
                        trace!(session = %session_id, transaction_id = response.transaction_id, "response routed");
                        let _ = waiter.send(Ok(response));
                    }
                    None => debug!(
                        session = %session_id,
                        transaction_id = response.transaction_id,
                        "response without waiter"
                    ),
                }

                if let Some(status) = status {
                    if changed {
                        self.emit(SessionEvent::StatusChanged {
                            session_id: session_id.clone(),
                            status,
                            reason,
                        });
                    }
                    if status.is_terminal() {
                        self.end_and_close(session_id, EndReason::Completed);
                    }
                }
            }
            NativeMessage::Stream(stream) => self.emit(SessionEvent::Stream {
                session_id: session_id.clone(),
                stream: stream.kind,
                data: stream.data,
            }),
            NativeMessage::Notify(node) => {
                debug!(session = %session_id, notification = ?node.attr("name"), "engine notification");
            }
        }
    }

    /// End a session and close its connection in the background
    fn end_and_close(&mut self, session_id: &SessionId, reason: EndReason) {
        if let Some(connection) = self.end_session(session_id, reason) {
            tokio::spawn(close_connection(session_id.clone(), connection));
        }
    }

    /// Mark a session closed. Returns the connection to close, or `None` if
    /// the session was already closed.
    fn end_session(
        &mut self,
        session_id: &SessionId,
        reason: EndReason,
    ) -> Option<Arc<dyn NativeConnection>> {
        let entry = self.sessions.get_mut(session_id)?;
        if !entry.info.is_live() {
            return None;
        }

        let was_active = entry.info.state == ConnectionState::Active;
        entry.info.state = ConnectionState::Closed;
        entry.info.end_reason = Some(reason.clone());
        for (_, waiter) in entry.waiters.drain() {
            let _ = waiter.send(Err(BridgeError::SessionClosed {
                session_id: session_id.clone(),
            }));
        }
        entry.frames = None;
        for task in entry.tasks.drain(..) {
            task.abort();
        }
        let connection = Arc::clone(&entry.connection);

        self.metrics.session_ended(was_active);
        info!(session = %session_id, reason = %reason, "debug session ended");
        self.emit(SessionEvent::Ended {
            session_id: session_id.clone(),
            reason,
        });
        Some(connection)
    }

    async fn shutdown(&mut self) {
        let live: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|e| e.info.is_live())
            .map(|e| e.info.id.clone())
            .collect();

        let closing: Vec<_> = live
            .into_iter()
            .filter_map(|id| {
                self.end_session(&id, EndReason::Disposed)
                    .map(|connection| close_connection(id, connection))
            })
            .collect();
        futures::future::join_all(closing).await;
        info!(sessions = self.sessions.len(), "multiplexer disposed");
    }

    fn emit(&self, event: SessionEvent) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
        // no broadcast subscribers is fine
        let _ = self.events.send(event);
    }
}

async fn close_connection(session_id: SessionId, connection: Arc<dyn NativeConnection>) {
    if let Err(err) = connection.close().await {
        warn!(session = %session_id, error = %err, "failed to close native connection");
    }
}

fn spawn_reader(
    session_id: SessionId,
    connection: Arc<dyn NativeConnection>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match connection.receive().await {
                Ok(Some(message)) => {
                    trace!(session = %session_id, kind = message.kind(), "packet received");
                    let packet = Inbound::Packet {
                        session_id: session_id.clone(),
                        message,
                    };
                    if inbound.send(packet).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    let _ = inbound.send(Inbound::ReadEnded {
                        session_id,
                        error: None,
                    });
                    break;
                }
                Err(err) if err.is_fatal() => {
                    let _ = inbound.send(Inbound::ReadEnded {
                        session_id,
                        error: Some(err.to_string()),
                    });
                    break;
                }
                Err(err) => {
                    warn!(session = %session_id, error = %err, "skipping undecodable packet");
                }
            }
        }
    })
}

fn spawn_writer(
    session_id: SessionId,
    connection: Arc<dyn NativeConnection>,
    mut frames: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            let transaction_id = frame.transaction_id;
            if let Err(err) = connection.send(frame).await {
                warn!(session = %session_id, transaction_id, error = %err, "write to engine failed");
                let _ = inbound.send(Inbound::WriteFailed {
                    session_id,
                    error: err.to_string(),
                });
                break;
            }
        }
    })
}
