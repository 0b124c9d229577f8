//! # dbgbridge
//!
//! Bidirectional translator between a DevTools-style debugger client and
//! DBGp-style runtime debug engines.
//!
//! ```text
//! client ──JSON──► MessageTranslator ──► DomainHandler (Debugger, Runtime, Console, Page)
//!    ▲                                          │
//!    │                                          ▼
//! ClientCallback ◄──── events ──── ConnectionMultiplexer ◄──► engine sessions
//! ```
//!
//! Every client command gets exactly one reply, whether its handler
//! succeeds, fails or panics. A failing command never disturbs the sessions
//! other commands are using.
//!
//! ## Modules
//!
//! - [`translator`] - command parsing, dispatch and the single-reply guarantee
//! - [`handlers`] - one [`DomainHandler`](handlers::DomainHandler) per domain
//! - [`multiplexer`] - engine sessions behind a single-owner actor
//! - [`callback`] - the one exit towards the client
//! - [`frontends`] - client transports (STDIO)
//! - [`listener`] - TCP listener for engines
//! - [`config`], [`logging`], [`metrics`] - configuration, tracing setup, counters
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dbgbridge::{ClientCallback, ConnectionConfig, MessageTranslator};
//!
//! # async fn example() {
//! let (callback, mut outbound) = ClientCallback::channel();
//! let translator = MessageTranslator::new(ConnectionConfig::default(), Arc::new(callback));
//!
//! translator
//!     .handle_command(r#"{"id":1,"method":"Page.canScreencast"}"#)
//!     .await;
//! let reply = outbound.recv().await.unwrap();
//! assert_eq!(reply.to_json().unwrap(), r#"{"id":1,"result":{"result":false}}"#);
//!
//! translator.dispose().await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callback;
pub mod config;
pub mod error;
pub mod frontends;
pub mod handlers;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod multiplexer;
pub mod pending;
pub mod translator;

pub use callback::{ClientCallback, ClientSink};
pub use config::{BridgeConfig, ConnectionConfig, LogOutput, LogRotation, LoggingConfig};
pub use error::{BridgeError, BridgeResult, HandlerError, HandlerResult};
pub use frontends::{StdioFrontend, StdioFrontendConfig, run_stdio};
pub use listener::NativeListener;
pub use logging::LoggingGuard;
pub use metrics::{BridgeMetrics, MetricsSnapshot};
pub use multiplexer::{
    ConnectionMultiplexer, ConnectionState, EndReason, MultiplexerConfig, SessionEvent, SessionId,
    SessionInfo,
};
pub use translator::MessageTranslator;

pub use dbgbridge_native as native;
pub use dbgbridge_protocol as protocol;
