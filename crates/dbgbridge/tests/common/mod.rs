//! Shared fixtures: a translator wired to an in-memory client and scripted
//! engines on in-process connections.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dbgbridge::native::{ChannelConnection, ChannelPeer, EngineStatus, NativeNode, OutboundFrame};
use dbgbridge::protocol::{MessageId, OutboundMessage};
use dbgbridge::{ClientCallback, ConnectionConfig, MessageTranslator, SessionId};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// The client side of a translator
pub struct Client {
    pub translator: Arc<MessageTranslator>,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    backlog: VecDeque<OutboundMessage>,
}

impl Client {
    pub fn new() -> Self {
        Self::with_config(ConnectionConfig::default())
    }

    pub fn with_config(config: ConnectionConfig) -> Self {
        let (callback, outbound) = ClientCallback::channel();
        let translator = Arc::new(MessageTranslator::new(config, Arc::new(callback)));
        Self {
            translator,
            outbound,
            backlog: VecDeque::new(),
        }
    }

    /// Feed a raw line and wait for the handler to finish
    pub async fn send_raw(&self, raw: &str) {
        self.translator.handle_command(raw).await;
    }

    /// Dispatch a command on its own task; pair with [`Client::reply`]
    pub fn request(&self, id: i64, method: &str, params: Value) {
        let raw = json!({ "id": id, "method": method, "params": params }).to_string();
        self.translator.spawn_command(raw);
    }

    /// Dispatch a command and wait for its reply
    pub async fn call(&mut self, id: i64, method: &str, params: Value) -> OutboundMessage {
        self.request(id, method, params);
        self.reply(id).await
    }

    /// Dispatch a command that must succeed and return its result
    pub async fn call_ok(&mut self, id: i64, method: &str, params: Value) -> Value {
        result_of(self.call(id, method, params).await)
    }

    /// Dispatch a command that must fail and return the error text
    pub async fn call_err(&mut self, id: i64, method: &str, params: Value) -> String {
        error_of(self.call(id, method, params).await)
    }

    /// Next message answering `id`
    pub async fn reply(&mut self, id: i64) -> OutboundMessage {
        self.take(|message| message.id() == Some(MessageId(id))).await
    }

    /// Params of the next `method` event
    pub async fn event(&mut self, method: &str) -> Value {
        let message = self
            .take(|message| matches!(message, OutboundMessage::Event { method: m, .. } if m == method))
            .await;
        match message {
            OutboundMessage::Event { params, .. } => params,
            other => panic!("expected {method} event, got {other:?}"),
        }
    }

    /// Everything delivered so far that no test step has consumed
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        while let Ok(message) = self.outbound.try_recv() {
            self.backlog.push_back(message);
        }
        self.backlog.drain(..).collect()
    }

    /// Connect a scripted engine under `name`; it has not sent `init` yet
    pub async fn connect_engine(&self, name: &str) -> Engine {
        let (connection, peer) = ChannelConnection::pair(name);
        let session_id = SessionId::from(name);
        self.translator
            .multiplexer()
            .connect(session_id.clone(), Arc::new(connection))
            .await
            .unwrap();
        Engine { session_id, peer }
    }

    /// Connect an engine, announce it and wait for the bridge to start it.
    /// Returns the pending start command (`run` or `step_into`).
    pub async fn start_engine(&self, name: &str, fileuri: &str) -> (Engine, OutboundFrame) {
        let mut engine = self.connect_engine(name).await;
        engine.peer.send_init(fileuri, None).unwrap();
        let frame = engine.next().await;
        (engine, frame)
    }

    async fn take(&mut self, matches: impl Fn(&OutboundMessage) -> bool) -> OutboundMessage {
        if let Some(index) = self.backlog.iter().position(&matches) {
            return self.backlog.remove(index).unwrap();
        }
        loop {
            let message = tokio::time::timeout(WAIT, self.outbound.recv())
                .await
                .expect("timed out waiting for a client message")
                .expect("client channel closed");
            if matches(&message) {
                return message;
            }
            self.backlog.push_back(message);
        }
    }
}

pub fn result_of(message: OutboundMessage) -> Value {
    match message {
        OutboundMessage::Reply { result, .. } => result,
        other => panic!("expected a result, got {other:?}"),
    }
}

pub fn error_of(message: OutboundMessage) -> String {
    match message {
        OutboundMessage::Error { error, .. } => error,
        other => panic!("expected an error, got {other:?}"),
    }
}

/// A scripted engine
pub struct Engine {
    pub session_id: SessionId,
    pub peer: ChannelPeer,
}

impl Engine {
    /// Next command the bridge wrote
    pub async fn next(&mut self) -> OutboundFrame {
        tokio::time::timeout(WAIT, self.peer.next_command())
            .await
            .expect("timed out waiting for an engine command")
            .expect("bridge closed the engine connection")
    }

    /// Next command, which must be `name`
    pub async fn expect(&mut self, name: &str) -> OutboundFrame {
        let frame = self.next().await;
        assert_eq!(frame.command.name(), name, "unexpected engine command {frame:?}");
        frame
    }

    /// Wait until the bridge closes the connection
    pub async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(WAIT, self.peer.next_command())
                .await
                .expect("bridge kept the engine connection open");
            if next.is_none() {
                return;
            }
        }
    }

    /// Answer a continuation with a break
    pub fn break_on(&self, frame: &OutboundFrame) {
        self.peer
            .respond_status(frame, EngineStatus::Break, "ok")
            .unwrap();
    }

    /// Answer `stack_get` with `(filename, lineno, where)` frames, innermost first
    pub fn stack(&self, frame: &OutboundFrame, frames: &[(&str, u32, &str)]) {
        let nodes = frames
            .iter()
            .enumerate()
            .map(|(level, (filename, lineno, function))| {
                NativeNode::new("stack")
                    .with_attr("level", level)
                    .with_attr("type", "file")
                    .with_attr("filename", filename)
                    .with_attr("lineno", lineno)
                    .with_attr("where", function)
            })
            .collect();
        self.peer.respond_with(frame, &[], nodes).unwrap();
    }

    /// Answer `breakpoint_set` with a native id
    pub fn breakpoint_set(&self, frame: &OutboundFrame, native_id: &str) {
        self.peer
            .respond_with(frame, &[("id", native_id), ("state", "enabled")], Vec::new())
            .unwrap();
    }

    /// Answer with an empty success response
    pub fn ok(&self, frame: &OutboundFrame) {
        self.peer.respond_with(frame, &[], Vec::new()).unwrap();
    }

    /// Answer a continuation, then the `stack_get` that follows, leaving the
    /// session paused at `filename:lineno`
    pub async fn pause_at(&mut self, continuation: &OutboundFrame, filename: &str, lineno: u32) {
        self.break_on(continuation);
        let stack = self.expect("stack_get").await;
        self.stack(&stack, &[(filename, lineno, "{main}")]);
    }
}
