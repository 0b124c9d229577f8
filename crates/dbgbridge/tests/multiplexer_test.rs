//! Session registry, routing and lifecycle of the connection multiplexer

use std::sync::Arc;
use std::time::Duration;

use dbgbridge::native::{
    ChannelConnection, ChannelPeer, EngineStatus, NativeCommand, NativeNode, StreamKind,
};
use dbgbridge::{
    BridgeError, BridgeMetrics, ConnectionMultiplexer, ConnectionState, EndReason,
    MultiplexerConfig, SessionEvent, SessionId,
};
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn multiplexer(config: MultiplexerConfig) -> (ConnectionMultiplexer, Arc<BridgeMetrics>) {
    let metrics = Arc::new(BridgeMetrics::new());
    (ConnectionMultiplexer::new(config, Arc::clone(&metrics)), metrics)
}

async fn connect(mux: &ConnectionMultiplexer, name: &str) -> ChannelPeer {
    let (connection, peer) = ChannelConnection::pair(name);
    mux.connect(SessionId::from(name), Arc::new(connection))
        .await
        .unwrap();
    peer
}

async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .unwrap()
}

async fn next_ended(events: &mut broadcast::Receiver<SessionEvent>) -> (SessionId, EndReason) {
    loop {
        if let SessionEvent::Ended { session_id, reason } = next_event(events).await {
            return (session_id, reason);
        }
    }
}

#[tokio::test]
async fn test_init_starts_session() {
    let (mux, metrics) = multiplexer(MultiplexerConfig::default());
    let mut events = mux.subscribe();
    let peer = connect(&mux, "s1").await;

    let info = mux.get_session(&SessionId::from("s1")).await.unwrap();
    assert_eq!(info.state, ConnectionState::Connecting);
    assert_eq!(info.endpoint.as_deref(), Some("s1"));

    peer.send_init("file:///srv/index.php", Some("dev")).unwrap();
    let SessionEvent::Started { session_id, init } = next_event(&mut events).await else {
        panic!("expected Started");
    };
    assert_eq!(session_id, SessionId::from("s1"));
    assert_eq!(init.idekey.as_deref(), Some("dev"));

    let info = mux.get_session(&session_id).await.unwrap();
    assert_eq!(info.state, ConnectionState::Active);
    assert_eq!(metrics.snapshot().active_sessions, 1);
    mux.dispose().await;
}

#[tokio::test]
async fn test_duplicate_ids_are_refused_even_after_close() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let _peer = connect(&mux, "s1").await;

    let (connection, _other) = ChannelConnection::pair("again");
    let err = mux
        .connect(SessionId::from("s1"), Arc::new(connection))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateSession { .. }), "{err}");

    mux.close(&SessionId::from("s1")).await.unwrap();
    let (connection, _other) = ChannelConnection::pair("again");
    let err = mux
        .connect(SessionId::from("s1"), Arc::new(connection))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::DuplicateSession { .. }), "{err}");
    mux.dispose().await;
}

#[tokio::test]
async fn test_session_limit_counts_live_sessions() {
    let (mux, _) = multiplexer(MultiplexerConfig {
        max_sessions: 1,
        ..MultiplexerConfig::default()
    });
    let _first = connect(&mux, "s1").await;

    let (connection, _peer) = ChannelConnection::pair("s2");
    let err = mux
        .connect(SessionId::from("s2"), Arc::new(connection))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::TooManySessions { limit: 1 }), "{err}");

    mux.close(&SessionId::from("s1")).await.unwrap();
    let _second = connect(&mux, "s2").await;
    mux.dispose().await;
}

#[tokio::test]
async fn test_responses_are_routed_by_transaction_id() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let mut peer = connect(&mux, "s1").await;
    let session = SessionId::from("s1");

    let first = tokio::spawn({
        let mux = mux.clone();
        let session = session.clone();
        async move { mux.send(&session, NativeCommand::stack_get()).await }
    });
    let frame_a = tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    let second = tokio::spawn({
        let mux = mux.clone();
        let session = session.clone();
        async move { mux.send(&session, NativeCommand::context_names(0)).await }
    });
    let frame_b = tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    assert_eq!(frame_a.transaction_id, 1);
    assert_eq!(frame_b.transaction_id, 2);

    // answered out of order
    peer.respond_with(&frame_b, &[], vec![NativeNode::new("context").with_attr("id", 0)])
        .unwrap();
    peer.respond_with(&frame_a, &[], Vec::new()).unwrap();

    let response_b = second.await.unwrap().unwrap();
    assert_eq!(response_b.command, "context_names");
    assert_eq!(response_b.children.len(), 1);
    let response_a = first.await.unwrap().unwrap();
    assert_eq!(response_a.command, "stack_get");
    mux.dispose().await;
}

#[tokio::test]
async fn test_send_times_out_and_session_survives() {
    let (mux, metrics) = multiplexer(MultiplexerConfig {
        command_timeout: Duration::from_millis(50),
        ..MultiplexerConfig::default()
    });
    let mut peer = connect(&mux, "s1").await;
    let session = SessionId::from("s1");

    let err = mux.send(&session, NativeCommand::stack_get()).await.unwrap_err();
    assert!(err.is_timeout(), "{err}");
    assert_eq!(metrics.snapshot().native_timeouts, 1);

    // the late answer finds no waiter and is dropped
    let stale = peer.next_command().await.unwrap();
    peer.respond_with(&stale, &[], Vec::new()).unwrap();

    let pending = tokio::spawn({
        let mux = mux.clone();
        let session = session.clone();
        async move { mux.send(&session, NativeCommand::source("file:///a.php")).await }
    });
    let frame = tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    assert_eq!(frame.transaction_id, 2);
    peer.respond_with(&frame, &[], Vec::new()).unwrap();
    assert_eq!(pending.await.unwrap().unwrap().command, "source");
    mux.dispose().await;
}

#[tokio::test]
async fn test_continuations_are_not_timed() {
    let (mux, _) = multiplexer(MultiplexerConfig {
        command_timeout: Duration::from_millis(20),
        ..MultiplexerConfig::default()
    });
    let mut peer = connect(&mux, "s1").await;

    let running = tokio::spawn({
        let mux = mux.clone();
        async move {
            mux.send_continuation(&SessionId::from("s1"), NativeCommand::run())
                .await
        }
    });
    let frame = tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer.respond_status(&frame, EngineStatus::Break, "ok").unwrap();

    let response = running.await.unwrap().unwrap();
    assert_eq!(response.status, Some(EngineStatus::Break));
    mux.dispose().await;
}

#[tokio::test]
async fn test_disconnect_ends_session_once_and_fails_waiters() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let mut events = mux.subscribe();
    let mut peer = connect(&mux, "s1").await;
    let session = SessionId::from("s1");

    let waiting = tokio::spawn({
        let mux = mux.clone();
        let session = session.clone();
        async move { mux.send_continuation(&session, NativeCommand::run()).await }
    });
    tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    peer.disconnect();

    let (ended, reason) = next_ended(&mut events).await;
    assert_eq!(ended, session);
    assert_eq!(reason, EndReason::ConnectionClosed);

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, BridgeError::SessionClosed { .. }), "{err}");
    let err = mux.send(&session, NativeCommand::stack_get()).await.unwrap_err();
    assert!(matches!(err, BridgeError::SessionClosed { .. }), "{err}");

    // closing an ended session changes nothing and emits nothing
    mux.close(&session).await.unwrap();
    let info = mux.get_session(&session).await.unwrap();
    assert_eq!(info.end_reason, Some(EndReason::ConnectionClosed));

    mux.dispose().await;
    assert!(events.try_recv().is_err(), "session ended twice");
}

#[tokio::test]
async fn test_unknown_session() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let err = mux
        .send(&SessionId::from("nope"), NativeCommand::stack_get())
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::UnknownSession { .. }), "{err}");
    let err = mux.close(&SessionId::from("nope")).await.unwrap_err();
    assert!(matches!(err, BridgeError::UnknownSession { .. }), "{err}");
    assert!(mux.get_session(&SessionId::from("nope")).await.is_none());
    mux.dispose().await;
}

#[tokio::test]
async fn test_foreign_idekey_is_rejected() {
    let (mux, metrics) = multiplexer(MultiplexerConfig {
        idekey: Some("vscode".to_string()),
        ..MultiplexerConfig::default()
    });
    let mut events = mux.subscribe();
    let mut peer = connect(&mux, "s1").await;

    peer.send_init("file:///srv/index.php", Some("phpstorm")).unwrap();
    let (_, reason) = next_ended(&mut events).await;
    assert_eq!(
        reason,
        EndReason::Rejected {
            idekey: Some("phpstorm".to_string())
        }
    );
    tokio::time::timeout(WAIT, async { while peer.next_command().await.is_some() {} })
        .await
        .unwrap();

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.sessions_started, 0);
    assert_eq!(snapshot.active_sessions, 0);
    mux.dispose().await;
}

#[tokio::test]
async fn test_terminal_status_completes_session() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let mut events = mux.subscribe();
    let mut peer = connect(&mux, "s1").await;
    peer.send_init("file:///srv/index.php", None).unwrap();

    let running = tokio::spawn({
        let mux = mux.clone();
        async move {
            mux.send_continuation(&SessionId::from("s1"), NativeCommand::run())
                .await
        }
    });
    let frame = tokio::time::timeout(WAIT, peer.next_command()).await.unwrap().unwrap();
    peer.respond_status(&frame, EngineStatus::Stopping, "ok").unwrap();

    let response = running.await.unwrap().unwrap();
    assert_eq!(response.status, Some(EngineStatus::Stopping));
    let (_, reason) = next_ended(&mut events).await;
    assert_eq!(reason, EndReason::Completed);
    mux.dispose().await;
}

#[tokio::test]
async fn test_broadcast_reaches_live_sessions() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let mut one = connect(&mux, "s1").await;
    let mut two = connect(&mux, "s2").await;
    let _gone = connect(&mux, "s3").await;
    mux.close(&SessionId::from("s3")).await.unwrap();

    let engines = tokio::spawn(async move {
        for peer in [&mut one, &mut two] {
            let frame = peer.next_command().await.unwrap();
            assert_eq!(frame.command.name(), "feature_set");
            peer.respond_with(&frame, &[("success", "1")], Vec::new()).unwrap();
        }
        (one, two)
    });

    let mut results = mux
        .broadcast(NativeCommand::feature_set("max_depth", 2))
        .await;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].0, SessionId::from("s1"));
    assert_eq!(results[1].0, SessionId::from("s2"));
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let _ = engines.await.unwrap();
    mux.dispose().await;
}

#[tokio::test]
async fn test_dispose_ends_everything() {
    let (mux, _) = multiplexer(MultiplexerConfig::default());
    let mut events = mux.subscribe();
    let mut peer = connect(&mux, "s1").await;

    let clone = mux.clone();
    mux.dispose().await;
    clone.dispose().await;
    assert!(clone.is_disposed());

    let (_, reason) = next_ended(&mut events).await;
    assert_eq!(reason, EndReason::Disposed);
    assert!(peer.next_command().await.is_none());

    let (connection, _other) = ChannelConnection::pair("late");
    let err = mux
        .connect(SessionId::from("late"), Arc::new(connection))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::MultiplexerDisposed), "{err}");
    assert!(mux.sessions().await.is_empty());
}

#[tokio::test]
async fn test_unbounded_subscribers_never_lag() {
    let (mux, _) = multiplexer(MultiplexerConfig {
        event_capacity: 2,
        ..MultiplexerConfig::default()
    });
    let mut lagging = mux.subscribe();
    let mut events = mux.subscribe_unbounded();
    let mut peer = connect(&mux, "s1").await;

    peer.send_init("file:///srv/index.php", None).unwrap();
    for n in 0..50 {
        peer.send_stream(StreamKind::Stdout, &n.to_string()).unwrap();
    }
    peer.disconnect();

    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(WAIT, events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event feed closed");
        let ended = matches!(event, SessionEvent::Ended { .. });
        seen.push(event);
        if ended {
            break;
        }
    }
    assert!(matches!(seen.first(), Some(SessionEvent::Started { .. })));
    let streamed: Vec<String> = seen
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Stream { data, .. } => Some(data.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, (0..50).map(|n| n.to_string()).collect::<Vec<_>>());
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::Ended {
            session_id: SessionId::from("s1"),
            reason: EndReason::ConnectionClosed,
        })
    );

    // the bounded subscriber fell behind
    assert!(matches!(
        lagging.recv().await,
        Err(broadcast::error::RecvError::Lagged(_))
    ));
    mux.dispose().await;
}
