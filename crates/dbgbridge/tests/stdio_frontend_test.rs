//! Line-oriented client transport over in-memory pipes

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dbgbridge::native::{ChannelConnection, EngineStatus};
use dbgbridge::{
    BridgeResult, ClientCallback, ConnectionConfig, MessageTranslator, SessionId, StdioFrontend,
    StdioFrontendConfig,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(5);

struct Pipes {
    input: DuplexStream,
    output: Lines<BufReader<DuplexStream>>,
    translator: Arc<MessageTranslator>,
    frontend: JoinHandle<BridgeResult<()>>,
}

fn start(config: StdioFrontendConfig) -> Pipes {
    let (callback, outbound) = ClientCallback::channel();
    let translator = Arc::new(MessageTranslator::new(
        ConnectionConfig::default(),
        Arc::new(callback),
    ));
    let frontend = StdioFrontend::new(Arc::clone(&translator), outbound, config);

    let (input, bridge_in) = tokio::io::duplex(64 * 1024);
    let (bridge_out, output) = tokio::io::duplex(64 * 1024);
    let frontend = tokio::spawn(frontend.run(BufReader::new(bridge_in), bridge_out));

    Pipes {
        input,
        output: BufReader::new(output).lines(),
        translator,
        frontend,
    }
}

impl Pipes {
    async fn write_line(&mut self, line: &str) {
        self.input.write_all(line.as_bytes()).await.unwrap();
        self.input.write_all(b"\n").await.unwrap();
    }

    async fn read_message(&mut self) -> Value {
        let line = tokio::time::timeout(WAIT, self.output.next_line())
            .await
            .expect("timed out waiting for output")
            .unwrap()
            .expect("output closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Read `count` replies, keyed by id
    async fn read_replies(&mut self, count: usize) -> BTreeMap<i64, Value> {
        let mut replies = BTreeMap::new();
        while replies.len() < count {
            let message = self.read_message().await;
            if let Some(id) = message["id"].as_i64() {
                replies.insert(id, message);
            }
        }
        replies
    }

    async fn finish(self) -> BridgeResult<()> {
        drop(self.input);
        tokio::time::timeout(WAIT, self.frontend)
            .await
            .expect("frontend did not stop")
            .unwrap()
    }
}

#[tokio::test]
async fn test_each_line_gets_one_reply() {
    let mut pipes = start(StdioFrontendConfig::default());
    pipes
        .write_line(r#"{"id":1,"method":"Page.canScreencast"}"#)
        .await;
    pipes.write_line("").await;
    pipes.write_line("   ").await;
    pipes
        .write_line(r#"{"id":2,"method":"Debugger.nope"}"#)
        .await;

    let replies = pipes.read_replies(2).await;
    assert_eq!(replies[&1], json!({"id": 1, "result": {"result": false}}));
    assert_eq!(
        replies[&2],
        json!({"id": 2, "error": "Unknown Debugger method: nope"})
    );

    pipes.write_line("{broken").await;
    assert_eq!(
        pipes.read_message().await,
        json!({"id": null, "error": "Unparsable command: {broken"})
    );

    let translator = Arc::clone(&pipes.translator);
    pipes.finish().await.unwrap();
    assert!(translator.is_disposed());
}

#[tokio::test]
async fn test_oversized_lines_are_dropped() {
    let mut pipes = start(StdioFrontendConfig {
        max_line_size: 64,
        ..StdioFrontendConfig::default()
    });
    let padding = "x".repeat(100);
    pipes
        .write_line(&format!(r#"{{"id":1,"method":"Page.enable","params":{{"p":"{padding}"}}}}"#))
        .await;
    pipes.write_line(r#"{"id":2,"method":"Page.enable"}"#).await;

    assert_eq!(
        pipes.read_message().await,
        json!({"id": 2, "result": {}})
    );
    pipes.finish().await.unwrap();
}

#[tokio::test]
async fn test_events_are_written_as_lines() {
    let mut pipes = start(StdioFrontendConfig::default());
    pipes.write_line(r#"{"id":1,"method":"Runtime.enable"}"#).await;

    let event = pipes.read_message().await;
    assert_eq!(event["method"], json!("Runtime.executionContextCreated"));
    assert_eq!(pipes.read_message().await, json!({"id": 1, "result": {}}));
    pipes.finish().await.unwrap();
}

#[tokio::test]
async fn test_stops_when_primary_session_ends() {
    let mut pipes = start(StdioFrontendConfig {
        exit_on_session_end: true,
        ..StdioFrontendConfig::default()
    });

    let (connection, mut engine) = ChannelConnection::pair("s1");
    pipes
        .translator
        .multiplexer()
        .connect(SessionId::from("s1"), Arc::new(connection))
        .await
        .unwrap();
    engine.send_init("file:///srv/index.php", None).unwrap();
    let run = tokio::time::timeout(WAIT, engine.next_command())
        .await
        .unwrap()
        .unwrap();
    engine
        .respond_status(&run, EngineStatus::Stopping, "ok")
        .unwrap();

    // input stays open; the session end alone stops the frontend
    let result = tokio::time::timeout(WAIT, &mut pipes.frontend)
        .await
        .expect("frontend kept running")
        .unwrap();
    assert!(result.is_ok());
    assert!(pipes.translator.is_disposed());
}
