//! Command routing and the one-reply-per-command guarantee

mod common;

use common::{Client, error_of, result_of};
use dbgbridge::protocol::{MessageId, OutboundMessage};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;

#[tokio::test]
async fn test_unparsable_command_is_answered_with_null_id() {
    let mut client = Client::new();
    client.send_raw("not json at all").await;

    assert_eq!(
        client.drain(),
        vec![OutboundMessage::error(None, "Unparsable command: not json at all")]
    );
}

#[tokio::test]
async fn test_envelope_errors_keep_the_id() {
    let mut client = Client::new();

    let raw = r#"{"id":4,"params":{}}"#;
    client.send_raw(raw).await;
    assert_eq!(error_of(client.reply(4).await), format!("Missing method: {raw}"));

    let raw = r#"{"id":5,"method":"Debugger"}"#;
    client.send_raw(raw).await;
    assert_eq!(error_of(client.reply(5).await), format!("Badly formatted method: {raw}"));

    let raw = r#"{"id":6,"method":"Network.enable"}"#;
    client.send_raw(raw).await;
    assert_eq!(error_of(client.reply(6).await), format!("Unknown domain: {raw}"));
}

#[tokio::test]
async fn test_missing_id_is_answered_with_null_id() {
    let mut client = Client::new();
    let raw = r#"{"method":"Page.enable"}"#;
    client.send_raw(raw).await;

    assert_eq!(
        client.drain(),
        vec![OutboundMessage::error(None, format!("Missing id: {raw}"))]
    );
}

#[tokio::test]
async fn test_unknown_method_reply_names_domain_and_action() {
    let mut client = Client::new();
    let error = client.call_err(1, "Debugger.frobnicate", json!({})).await;
    assert_eq!(error, "Unknown Debugger method: frobnicate");

    let error = client.call_err(2, "Page.reload", json!({})).await;
    assert_eq!(error, "Unknown Page method: reload");
}

#[tokio::test]
async fn test_page_and_console_commands_without_engine() {
    let mut client = Client::new();

    assert_eq!(
        client.call_ok(1, "Page.canScreencast", json!({})).await,
        json!({"result": false})
    );
    assert_eq!(client.call_ok(2, "Console.enable", json!({})).await, json!({}));
    assert_eq!(client.call_ok(3, "Debugger.enable", json!({})).await, json!({}));

    let tree = client.call_ok(4, "Page.getResourceTree", json!({})).await;
    assert_eq!(tree["frameTree"]["frame"]["id"], json!("1"));
}

#[tokio::test]
async fn test_runtime_enable_announces_context_before_replying() {
    let mut client = Client::new();
    client
        .send_raw(r#"{"id":1,"method":"Runtime.enable"}"#)
        .await;

    let messages = client.drain();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[0],
        OutboundMessage::Event {
            method: "Runtime.executionContextCreated".to_string(),
            params: json!({"context": {"id": 1, "frameId": "1", "name": "dbgbridge"}}),
        }
    );
    assert_eq!(messages[1], OutboundMessage::reply(MessageId(1), json!({})));
}

#[tokio::test]
async fn test_session_commands_without_engine_fail() {
    let mut client = Client::new();

    let error = client.call_err(1, "Debugger.resume", json!({})).await;
    assert!(error.starts_with("Error handling command: No debug session"), "{error}");

    let error = client
        .call_err(2, "Runtime.evaluate", json!({"expression": "1 + 1"}))
        .await;
    assert!(error.starts_with("Error handling command: No debug session"), "{error}");
}

#[tokio::test]
async fn test_invalid_params_are_reported() {
    let mut client = Client::new();
    let error = client
        .call_err(1, "Debugger.setBreakpointByUrl", json!({"url": 3}))
        .await;
    assert!(error.starts_with("Error handling command: Invalid params:"), "{error}");

    let error = client
        .call_err(2, "Runtime.getProperties", json!({"objectId": "garbage"}))
        .await;
    assert!(error.contains("Invalid objectId"), "{error}");
}

#[tokio::test]
async fn test_breakpoints_without_engine_are_kept_unresolved() {
    let mut client = Client::new();
    let result = client
        .call_ok(
            1,
            "Debugger.setBreakpointByUrl",
            json!({"url": "file:///srv/app.php", "lineNumber": 9}),
        )
        .await;
    assert_eq!(result, json!({"breakpointId": "1", "locations": []}));

    assert_eq!(
        client
            .call_ok(2, "Debugger.removeBreakpoint", json!({"breakpointId": "1"}))
            .await,
        json!({})
    );
    let error = client
        .call_err(3, "Debugger.removeBreakpoint", json!({"breakpointId": "1"}))
        .await;
    assert!(error.starts_with("Error handling command: Invalid params:"), "{error}");
}

#[tokio::test]
async fn test_metrics_count_outcomes() {
    let mut client = Client::new();
    client.send_raw("{").await;
    client.call_ok(1, "Page.enable", json!({})).await;
    client.call_err(2, "Page.nope", json!({})).await;

    let metrics = client.translator.metrics();
    assert_eq!(metrics.commands_received, 3);
    assert_eq!(metrics.commands_malformed, 1);
    assert_eq!(metrics.commands_succeeded, 1);
    assert_eq!(metrics.commands_failed, 1);
}

#[tokio::test]
async fn test_dispose_silences_the_translator() {
    let mut client = Client::new();
    client.translator.dispose().await;
    client.translator.dispose().await;
    assert!(client.translator.is_disposed());
    assert!(client.translator.multiplexer().is_disposed());

    client
        .send_raw(r#"{"id":1,"method":"Page.enable"}"#)
        .await;
    client.send_raw("garbage").await;
    assert!(client.drain().is_empty());
    assert_eq!(client.translator.metrics().commands_received, 0);
}

#[tokio::test]
async fn test_session_end_callback_needs_a_session() {
    let client = Client::new();
    let (tx, mut rx) = tokio::sync::oneshot::channel();
    client.translator.on_session_end(move || {
        let _ = tx.send(());
    });
    client.translator.dispose().await;
    assert!(rx.try_recv().is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_any_input_gets_exactly_one_reply(raw in "\\PC{0,64}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let messages = runtime.block_on(async {
            let mut client = Client::new();
            client.send_raw(&raw).await;
            let messages = client.drain();
            client.translator.dispose().await;
            messages
        });
        prop_assert_eq!(messages.len(), 1);
        prop_assert!(messages[0].is_response());
    }

    #[test]
    fn prop_ids_are_echoed(id in any::<i32>()) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let reply = runtime.block_on(async {
            let mut client = Client::new();
            client
                .send_raw(&json!({"id": id, "method": "Page.canEmulate"}).to_string())
                .await;
            let reply = client.reply(i64::from(id)).await;
            client.translator.dispose().await;
            reply
        });
        prop_assert_eq!(result_of(reply), json!({"result": false}));
    }
}
