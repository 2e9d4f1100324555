/*
[INPUT]:  Scripted server peers over in-memory pipes
[OUTPUT]: Test results for reconnection, keepalive, replay and close
[POS]:    Integration tests - connection state machine
[UPDATE]: When reconnect, keepalive, or close semantics change
*/

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{
    DuplexConnector, MockPeer, QUIET_KEEPALIVE, connection_config, init_tracing, next_peer,
    stream_config,
};
use market_stream::ws::frame::{self, Frame, FrameError, Opcode};
use market_stream::ws::{Connection, ConnectionState, RawMessage};
use market_stream::{StreamConfig, StreamError};
use tokio::time::Instant;

async fn wait_connected(connection: &Connection) {
    let mut state = connection.watch_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|state| *state == ConnectionState::Connected),
    )
    .await
    .expect("timed out waiting for Connected")
    .expect("connection task ended");
}

fn assert_gaps(attempts: &[Instant], expected_ms: &[u64]) {
    let gaps: Vec<Duration> = attempts.windows(2).map(|pair| pair[1] - pair[0]).collect();
    assert_eq!(gaps.len(), expected_ms.len(), "gaps: {gaps:?}");
    for (gap, ms) in gaps.iter().zip(expected_ms) {
        let expected = Duration::from_millis(*ms);
        assert!(
            *gap >= expected && *gap <= expected + Duration::from_millis(5),
            "gap {gap:?} not close to {expected:?}; all gaps: {gaps:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_caps_and_resets_after_success() {
    init_tracing();
    let (connector, mut peers) =
        DuplexConnector::scripted(&[false, false, false, false, true, false, false, true]);
    let config = StreamConfig::new("ws://127.0.0.1:9001/ws", QUIET_KEEPALIVE)
        .with_backoff(Duration::from_millis(100), Duration::from_millis(400));
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let first = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    drop(first);

    let _second = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    // the session held 2s, then the first retry is immediate and backoff restarts at initial
    assert_gaps(&connector.attempts(), &[100, 200, 400, 400, 2000, 100, 200]);
    connection.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_session_drop_is_immediate() {
    init_tracing();
    let (connector, mut peers) = DuplexConnector::new();
    let config = StreamConfig::new("ws://127.0.0.1:9001/ws", QUIET_KEEPALIVE)
        .with_backoff(Duration::from_secs(2), Duration::from_secs(8));
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let dropped_at = Instant::now();
    drop(peer);
    let _again = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    let attempts = connector.attempts();
    assert_eq!(attempts.len(), 2);
    let gap = attempts[1] - dropped_at;
    assert!(gap < Duration::from_millis(5), "reconnect waited {gap:?} after the session dropped");
    connection.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_session_dropped_right_after_connect_waits_backoff() {
    init_tracing();
    let (connector, mut peers) = DuplexConnector::new();
    let config = StreamConfig::new("ws://127.0.0.1:9001/ws", QUIET_KEEPALIVE)
        .with_backoff(Duration::from_secs(2), Duration::from_secs(8));
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    drop(peer);

    let _again = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    assert_gaps(&connector.attempts(), &[2000]);
    connection.close().await;
}

#[tokio::test]
async fn test_ping_answered_with_same_payload() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let connection = Connection::spawn(connector, connection_config(&config), None).unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    peer.send_frame(&Frame::ping(b"abc".to_vec())).await;
    let pong = peer.recv_frame().await.unwrap();
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"abc");

    connection.close().await;
}

#[tokio::test]
async fn test_keepalive_sends_pings_while_connected() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(Duration::from_millis(50));
    let connection = Connection::spawn(connector, connection_config(&config), None).unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    for _ in 0..2 {
        let ping = tokio::time::timeout(Duration::from_secs(2), peer.recv_frame())
            .await
            .expect("no keepalive ping")
            .unwrap();
        assert_eq!(ping.opcode, Opcode::Ping);
        assert!(ping.payload.is_empty());
    }

    connection.close().await;
}

#[tokio::test]
async fn test_text_and_binary_delivered_in_order() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let mut connection = Connection::spawn(connector, connection_config(&config), None).unwrap();
    let mut raw = connection.take_receiver().unwrap();
    assert!(connection.take_receiver().is_none());

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    peer.send_text("one").await;
    peer.send_frame(&Frame::binary(vec![1, 2, 3])).await;
    peer.send_frame(&Frame::pong(Vec::new())).await;
    peer.send_text("two").await;

    assert_eq!(raw.recv().await, Some(RawMessage::Text("one".into())));
    assert_eq!(raw.recv().await, Some(RawMessage::Binary(vec![1, 2, 3])));
    assert_eq!(raw.recv().await, Some(RawMessage::Text("two".into())));

    connection.close().await;
}

#[tokio::test]
async fn test_invalid_utf8_text_dropped_without_reconnect() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let mut connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();
    let mut raw = connection.take_receiver().unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    peer.send_frame(&Frame::new(Opcode::Text, vec![0xff, 0xfe])).await;
    peer.send_text("after").await;

    assert_eq!(raw.recv().await, Some(RawMessage::Text("after".into())));
    assert_eq!(connector.attempts().len(), 1);

    connection.close().await;
}

#[tokio::test]
async fn test_server_close_echoed_then_reconnects() {
    let reasons = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorded = reasons.clone();
    let config = stream_config(QUIET_KEEPALIVE).on_disconnect(move |reason| {
        recorded.lock().unwrap().push(reason.to_string());
    });
    let (connector, mut peers) = DuplexConnector::new();
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    peer.send_frame(&Frame::close_with(1001, "going away")).await;

    let echo = peer.recv_frame().await.unwrap();
    assert_eq!(echo.opcode, Opcode::Close);
    assert_eq!(echo.close_code(), Some(1001));

    let _second = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    assert_eq!(connector.attempts().len(), 2);
    let reasons = reasons.lock().unwrap().clone();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("1001"), "reason: {}", reasons[0]);

    connection.close().await;
}

#[tokio::test]
async fn test_masked_server_frame_drops_connection() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let mut connection = Connection::spawn(connector, connection_config(&config), None).unwrap();
    let mut raw = connection.take_receiver().unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    peer.send_raw(&frame::encode_with_mask(&Frame::text("masked"), Some([1, 2, 3, 4])))
        .await;

    let mut second = MockPeer::accept(next_peer(&mut peers).await).await;
    second.send_text("clean").await;
    assert_eq!(raw.recv().await, Some(RawMessage::Text("clean".into())));

    connection.close().await;
}

#[tokio::test]
async fn test_fragmented_message_drops_connection() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let mut connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();
    let mut raw = connection.take_receiver().unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    peer.send_frame(&Frame {
        opcode: Opcode::Text,
        fin: false,
        payload: b"par".to_vec(),
    })
    .await;

    let mut second = MockPeer::accept(next_peer(&mut peers).await).await;
    second.send_text("whole").await;
    assert_eq!(raw.recv().await, Some(RawMessage::Text("whole".into())));
    assert_eq!(connector.attempts().len(), 2);

    connection.close().await;
}

#[tokio::test]
async fn test_oversized_frame_drops_session_and_reconnects() {
    let reasons = Arc::new(Mutex::new(Vec::<String>::new()));
    let recorded = reasons.clone();
    let config = stream_config(QUIET_KEEPALIVE).on_disconnect(move |reason| {
        recorded.lock().unwrap().push(reason.to_string());
    });
    let (connector, mut peers) = DuplexConnector::new();
    let mut connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();
    let mut raw = connection.take_receiver().unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    // text frame header announcing a 64-bit length past the limit, no payload
    let mut header = vec![0x81, 127];
    header.extend_from_slice(&(frame::MAX_PAYLOAD_LEN + 1).to_be_bytes());
    peer.send_raw(&header).await;

    let mut second = MockPeer::accept(next_peer(&mut peers).await).await;
    second.send_text("after").await;
    assert_eq!(raw.recv().await, Some(RawMessage::Text("after".into())));
    assert_eq!(connector.attempts().len(), 2);

    let reasons = reasons.lock().unwrap().clone();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("exceeds limit"), "reason: {}", reasons[0]);

    connection.close().await;
}

#[tokio::test]
async fn test_rejected_handshake_is_retried() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    MockPeer::reject(next_peer(&mut peers).await, "503 Service Unavailable").await;
    let _peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    assert_eq!(connector.attempts().len(), 2);
    connection.close().await;
}

#[tokio::test]
async fn test_latest_subscription_replayed_after_reconnect() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let connection =
        Connection::spawn(connector, connection_config(&config), Some("sub-1".into())).unwrap();

    let mut first = MockPeer::accept(next_peer(&mut peers).await).await;
    assert_eq!(first.recv_text().await, "sub-1");
    wait_connected(&connection).await;

    connection.set_subscription(Some("sub-2".into())).await.unwrap();
    connection.send_text("incremental").await.unwrap();
    assert_eq!(first.recv_text().await, "incremental");
    drop(first);

    let mut second = MockPeer::accept(next_peer(&mut peers).await).await;
    assert_eq!(second.recv_text().await, "sub-2");

    connection.close().await;
}

#[tokio::test]
async fn test_concurrent_close_sends_one_close_frame() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;

    tokio::join!(connection.close(), connection.close());
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(connection.is_closed());

    let close = peer.recv_frame().await.unwrap();
    assert_eq!(close.close_code(), Some(1000));
    assert!(matches!(peer.recv_frame().await, Err(FrameError::Eof)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(peers.try_recv().is_err());
    assert_eq!(connector.attempts().len(), 1);

    connection.close().await;
    assert!(matches!(
        connection.send_text("late").await,
        Err(StreamError::Closed)
    ));
}

#[tokio::test]
async fn test_close_while_waiting_to_retry() {
    let (connector, _peers) = DuplexConnector::scripted(&[false; 8]);
    let config = StreamConfig::new("ws://127.0.0.1:9001/ws", QUIET_KEEPALIVE)
        .with_backoff(Duration::from_secs(60), Duration::from_secs(60));
    let connection = Connection::spawn(connector.clone(), connection_config(&config), None).unwrap();

    let mut state = connection.watch_state();
    state
        .wait_for(|state| *state == ConnectionState::Disconnected && !connector.attempts().is_empty())
        .await
        .unwrap();

    let started = std::time::Instant::now();
    connection.close().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert_eq!(connector.attempts().len(), 1);
}

#[tokio::test]
async fn test_dropping_handle_closes_connection() {
    let (connector, mut peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let connection = Connection::spawn(connector, connection_config(&config), None).unwrap();

    let mut peer = MockPeer::accept(next_peer(&mut peers).await).await;
    wait_connected(&connection).await;
    drop(connection);

    let close = tokio::time::timeout(Duration::from_secs(2), peer.recv_frame())
        .await
        .expect("no close frame after drop")
        .unwrap();
    assert_eq!(close.opcode, Opcode::Close);
}

#[test]
fn test_spawn_outside_runtime_is_config_error() {
    let (connector, _peers) = DuplexConnector::new();
    let config = stream_config(QUIET_KEEPALIVE);
    let err = Connection::spawn(connector, connection_config(&config), None).unwrap_err();
    assert!(err.is_config_error());
}
