mod common;

use pretty_assertions::assert_eq;
use serde_json::json;

use self::common::{ClientFrame, FakeConnector, ServerConn, fast_reconnect};
use switchboard::Token;
use switchboard::gateway::{Config, Connection, Event};

fn config() -> Config {
    Config::new(Token::from("bot-token"), 0)
        .url("wss://gateway.test")
        .reconnect(fast_reconnect())
}

async fn handshake(server: &ServerConn) {
    server.send(10, json!({"heartbeat_interval": 41_250}));
    let identify = server.expect_payload(2).await;
    assert_eq!(identify["token"], "bot-token");
}

#[tokio::test]
async fn resumes_with_the_stored_session_after_a_generic_close() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    assert_eq!(server.url, "wss://gateway.test/?v=10&encoding=json");
    handshake(&server).await;

    server.dispatch(
        "READY",
        1,
        json!({"session_id": "abc", "resume_gateway_url": "wss://resume.test", "v": 10}),
    );
    let Some(Event::Ready(ready)) = handle.next_event().await else {
        panic!("expected ready");
    };
    assert_eq!(ready.session_id, "abc");

    server.dispatch("MESSAGE_CREATE", 2, json!({"content": "hi"}));
    let Some(Event::Dispatch(dispatch)) = handle.next_event().await else {
        panic!("expected the dispatch to be forwarded");
    };
    assert_eq!(dispatch.kind, "MESSAGE_CREATE");
    assert_eq!(dispatch.sequence, 2);

    server.close(4000);

    // The first retry after a generic close resumes instead of identifying,
    // at the resume url the server handed out.
    let server = accept.recv_async().await.unwrap();
    assert_eq!(server.url, "wss://resume.test/?v=10&encoding=json");
    server.send(10, json!({"heartbeat_interval": 41_250}));
    let resume = server.expect_payload(6).await;
    assert_eq!(resume["session_id"], "abc");
    assert_eq!(resume["seq"], 2);
    assert_eq!(resume["token"], "bot-token");

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn non_resumable_invalid_session_forces_a_fresh_identify() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;
    server.dispatch("READY", 1, json!({"session_id": "abc", "v": 10}));
    assert!(matches!(handle.next_event().await, Some(Event::Ready(_))));

    server.send(9, json!(false));
    let ClientFrame::Close(code) = server.next_frame().await else {
        panic!("expected the client to close");
    };
    assert_eq!(code, Some(1000));

    // The next attempt must identify, not resume.
    let server = accept.recv_async().await.unwrap();
    server.send(10, json!({"heartbeat_interval": 41_250}));
    server.expect_payload(2).await;

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn resumable_invalid_session_resumes_in_place() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;
    server.dispatch("READY", 1, json!({"session_id": "abc", "v": 10}));
    assert!(matches!(handle.next_event().await, Some(Event::Ready(_))));

    // No reconnect round trip: the resume goes out on the same connection.
    server.send(9, json!(true));
    let resume = server.expect_payload(6).await;
    assert_eq!(resume["session_id"], "abc");
    assert_eq!(resume["seq"], 1);

    server.dispatch("RESUMED", 2, json!(null));
    assert!(matches!(handle.next_event().await, Some(Event::Resumed)));

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_ready_payload_restarts_the_handshake() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;

    // A READY without a session id cannot start a session; skipping it
    // would leave the handshake stuck, so the connection starts over.
    server.dispatch("READY", 1, json!({"v": 10}));

    let server = accept.recv_async().await.unwrap();
    server.send(10, json!({"heartbeat_interval": 41_250}));
    server.expect_payload(2).await;

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_frames_before_ready_force_a_reconnect() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;

    // The heartbeat is already running, but READY has not landed yet; a
    // frame that fails to parse still gates the handshake.
    server.send(10, json!({}));

    let server = accept.recv_async().await.unwrap();
    server.send(10, json!({"heartbeat_interval": 41_250}));
    server.expect_payload(2).await;

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn fatal_close_code_ends_the_run() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;
    server.close(4004);

    let Some(Event::Closed(Some(frame))) = handle.next_event().await else {
        panic!("expected a close frame in the final event");
    };
    assert_eq!(frame.code, 4004);
    assert!(run.await.unwrap().is_err());
    assert!(handle.is_finished());
}

#[tokio::test]
async fn unacknowledged_heartbeat_reconnects_and_resumes() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    server.send(10, json!({"heartbeat_interval": 50}));
    server.expect_payload(2).await;
    server.dispatch("READY", 1, json!({"session_id": "abc", "v": 10}));
    assert!(matches!(handle.next_event().await, Some(Event::Ready(_))));

    // Never acknowledge; the next tick declares the connection zombied.
    let heartbeat = server.expect_payload(1).await;
    assert_eq!(heartbeat, json!(1));
    let ClientFrame::Close(code) = server.next_frame().await else {
        panic!("expected an abrupt close");
    };
    assert_eq!(code, Some(4000));

    let server = accept.recv_async().await.unwrap();
    server.send(10, json!({"heartbeat_interval": 41_250}));
    server.expect_payload(6).await;

    handle.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn stop_closes_gracefully_and_is_idempotent() {
    let (connector, accept) = FakeConnector::new();
    let (connection, handle) = Connection::with_connector(config(), connector);
    let run = tokio::spawn(connection.run());

    let server = accept.recv_async().await.unwrap();
    handshake(&server).await;

    let second = handle.clone();
    tokio::join!(handle.stop(), second.stop());

    let ClientFrame::Close(code) = server.next_frame().await else {
        panic!("expected a graceful close");
    };
    assert_eq!(code, Some(1000));

    assert!(matches!(handle.next_event().await, Some(Event::Closed(_))));
    assert!(handle.next_event().await.is_none());
    run.await.unwrap().unwrap();
    assert!(handle.is_finished());
}
