//! Message translator
//!
//! Entry point for client commands. Parses the envelope, routes it to the
//! handler of its domain and sends exactly one reply per command, whatever
//! the handler does (returns, fails or panics).
//!
//! ```text
//! raw JSON ──► parse ──► domain registry ──► DomainHandler::handle_method
//!                │              │                         │
//!                ▼              ▼                         ▼
//!          error reply     error reply       PendingCommand::succeed / fail
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dbgbridge_protocol::{CommandError, Domain, parse_command};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::callback::ClientCallback;
use crate::config::ConnectionConfig;
use crate::error::{HandlerError, error_chain};
use crate::handlers::{
    ConsoleHandler, DebuggerHandler, DomainHandler, HandlerContext, PageHandler, RuntimeHandler,
    SessionTable,
};
use crate::metrics::MetricsSnapshot;
use crate::multiplexer::{ConnectionMultiplexer, MultiplexerConfig, SessionEvent};
use crate::pending::PendingCommands;

/// Routes client commands to domain handlers and engine events to the client
pub struct MessageTranslator {
    callback: Arc<ClientCallback>,
    multiplexer: ConnectionMultiplexer,
    handlers: HashMap<Domain, Arc<dyn DomainHandler>>,
    debugger: DebuggerHandler,
    pending: Arc<PendingCommands>,
    disposed: AtomicBool,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MessageTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTranslator")
            .field("domains", &self.handlers.keys().collect::<Vec<_>>())
            .field("in_flight", &self.pending.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl MessageTranslator {
    /// Build the handler registry and start listening for engine sessions.
    /// Must be called from within a tokio runtime.
    pub fn new(config: ConnectionConfig, callback: Arc<ClientCallback>) -> Self {
        Self::build(config, callback, Vec::new())
    }

    /// Registry with `overrides` replacing the built-in handlers of their domains
    #[cfg(test)]
    fn with_handlers(
        config: ConnectionConfig,
        callback: Arc<ClientCallback>,
        overrides: Vec<Arc<dyn DomainHandler>>,
    ) -> Self {
        Self::build(config, callback, overrides)
    }

    fn build(
        config: ConnectionConfig,
        callback: Arc<ClientCallback>,
        overrides: Vec<Arc<dyn DomainHandler>>,
    ) -> Self {
        let multiplexer = ConnectionMultiplexer::new(
            MultiplexerConfig::from(&config),
            Arc::clone(callback.metrics()),
        );
        let ctx = HandlerContext {
            callback: Arc::clone(&callback),
            multiplexer: multiplexer.clone(),
            sessions: Arc::new(SessionTable::new()),
            config: Arc::new(config),
        };

        let debugger = DebuggerHandler::new(ctx.clone());
        let console = Arc::new(ConsoleHandler::new(Arc::clone(&callback)));
        let handlers: [Arc<dyn DomainHandler>; 4] = [
            Arc::new(debugger.clone()),
            Arc::new(RuntimeHandler::new(ctx.clone())),
            Arc::clone(&console) as Arc<dyn DomainHandler>,
            Arc::new(PageHandler::new(ctx.config.target_url.clone())),
        ];
        let handlers: HashMap<Domain, Arc<dyn DomainHandler>> = handlers
            .into_iter()
            .chain(overrides)
            .map(|handler| (handler.domain(), handler))
            .collect();

        let event_pump = spawn_event_pump(&multiplexer, debugger.clone(), console);
        debug!(domains = handlers.len(), "message translator ready");

        Self {
            pending: PendingCommands::new(Arc::clone(&callback)),
            callback,
            multiplexer,
            handlers,
            debugger,
            disposed: AtomicBool::new(false),
            event_pump: Mutex::new(Some(event_pump)),
        }
    }

    /// Handle one raw client command. Never fails; every outcome is a reply.
    pub async fn handle_command(&self, raw: &str) {
        if self.is_disposed() {
            warn!(bytes = raw.len(), "command received after dispose, ignored");
            return;
        }
        let metrics = self.callback.metrics();
        metrics.inc_commands_received();
        trace!(raw, "command received");

        let command = match parse_command(raw) {
            Ok(command) => command,
            Err(err) => {
                metrics.inc_commands_malformed();
                warn!(id = ?err.id(), error = %err, "malformed command");
                self.callback.reply_with_error(err.id(), err.to_string());
                return;
            }
        };

        let Some(handler) = command
            .method
            .domain
            .parse::<Domain>()
            .ok()
            .and_then(|domain| self.handlers.get(&domain))
        else {
            metrics.inc_commands_malformed();
            let err = CommandError::unknown_domain(Some(command.id), command.raw);
            warn!(id = %command.id, error = %err, "unknown domain");
            self.callback.reply_with_error(err.id(), err.to_string());
            return;
        };

        let method = command.method.to_string();
        let Some(pending) = self.pending.begin(command.id, method.as_str()) else {
            metrics.inc_duplicate_ids();
            return;
        };

        let outcome = AssertUnwindSafe(handler.handle_method(
            command.id,
            &command.method.action,
            command.params,
        ))
        .catch_unwind()
        .await;

        match outcome {
            Ok(Ok(result)) => {
                trace!(id = %command.id, method = %method, "command succeeded");
                pending.succeed(result);
            }
            Ok(Err(err)) => {
                log_failure(command.id, &method, &err);
                pending.fail(err.reply_text());
            }
            Err(panic) => {
                let payload = panic_message(panic.as_ref());
                error!(id = %command.id, method = %method, panic = %payload, "handler panicked");
                pending.fail(format!("Error handling command: handler panicked\n {payload}"));
            }
        }
    }

    /// Handle a command on its own task, so slow commands do not hold up
    /// the ones behind them
    pub fn spawn_command(self: &Arc<Self>, raw: String) -> JoinHandle<()> {
        let translator = Arc::clone(self);
        tokio::spawn(async move { translator.handle_command(&raw).await })
    }

    /// Run `callback` once the primary engine session ends, or right away if
    /// it already has
    pub fn on_session_end(&self, callback: impl FnOnce() + Send + 'static) {
        self.debugger.on_session_end(callback);
    }

    /// Stop replying, end all sessions and release the multiplexer.
    /// Only the first call does anything.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(in_flight = self.pending.len(), "disposing message translator");
        self.callback.dispose();

        for domain in Domain::ALL {
            if let Some(handler) = self.handlers.get(&domain) {
                handler.dispose().await;
            }
        }
        self.multiplexer.dispose().await;

        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
    }

    /// Whether [`MessageTranslator::dispose`] has been called
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Engine connections; attach native connections here
    pub fn multiplexer(&self) -> &ConnectionMultiplexer {
        &self.multiplexer
    }

    /// Current counters
    pub fn metrics(&self) -> MetricsSnapshot {
        self.callback.metrics().snapshot()
    }
}

fn log_failure(id: dbgbridge_protocol::MessageId, method: &str, err: &HandlerError) {
    match err {
        HandlerError::UnknownMethod { .. } => warn!(%id, method, error = %err, "unknown method"),
        _ => error!(%id, method, error = %err, chain = %error_chain(err), "error handling command"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Forward multiplexer lifecycle events to the handlers that react to them.
/// Subscribes before returning, so no event emitted afterwards is missed.
fn spawn_event_pump(
    multiplexer: &ConnectionMultiplexer,
    debugger: DebuggerHandler,
    console: Arc<ConsoleHandler>,
) -> JoinHandle<()> {
    let mut events = multiplexer.subscribe_unbounded();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debugger.on_session_event(&event);
            if let SessionEvent::Stream { stream, data, .. } = &event {
                console.on_stream(*stream, data);
            }
        }
        trace!("session event pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbgbridge_protocol::{MessageId, OutboundMessage};
    use serde_json::{Value, json};
    use tokio::sync::{Notify, mpsc};

    use crate::error::HandlerResult;

    /// Page handler that panics once released
    struct ExplodingPage {
        release: Arc<Notify>,
    }

    #[async_trait]
    impl DomainHandler for ExplodingPage {
        fn domain(&self) -> Domain {
            Domain::Page
        }

        async fn handle_method(&self, _id: MessageId, action: &str, _params: Value) -> HandlerResult<Value> {
            self.release.notified().await;
            panic!("page handler blew up on {action}");
        }
    }

    async fn next_message(outbound: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> OutboundMessage {
        tokio::time::timeout(std::time::Duration::from_secs(5), outbound.recv())
            .await
            .expect("timed out waiting for a client message")
            .expect("client channel closed")
    }

    #[tokio::test]
    async fn test_panicking_handler_replies_once_and_spares_other_commands() {
        let (callback, mut outbound) = ClientCallback::channel();
        let release = Arc::new(Notify::new());
        let translator = Arc::new(MessageTranslator::with_handlers(
            ConnectionConfig::default(),
            Arc::new(callback),
            vec![Arc::new(ExplodingPage {
                release: Arc::clone(&release),
            })],
        ));

        let exploding = translator.spawn_command(r#"{"id":1,"method":"Page.reload"}"#.to_string());
        translator
            .handle_command(r#"{"id":2,"method":"Console.enable"}"#)
            .await;
        // command 1 is still waiting inside its handler
        assert_eq!(
            next_message(&mut outbound).await,
            OutboundMessage::reply(MessageId(2), json!({}))
        );

        release.notify_one();
        exploding.await.unwrap();
        let OutboundMessage::Error { id, error } = next_message(&mut outbound).await else {
            panic!("expected an error reply");
        };
        assert_eq!(id, Some(MessageId(1)));
        assert_eq!(
            error,
            "Error handling command: handler panicked\n page handler blew up on reload"
        );
        assert!(outbound.try_recv().is_err(), "more than one reply for a panicked command");

        // the translator keeps serving after the panic
        translator
            .handle_command(r#"{"id":3,"method":"Console.disable"}"#)
            .await;
        assert_eq!(
            next_message(&mut outbound).await,
            OutboundMessage::reply(MessageId(3), json!({}))
        );
        translator.dispose().await;
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
