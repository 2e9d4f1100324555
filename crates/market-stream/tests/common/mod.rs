/*
[INPUT]:  Test scenarios needing a WebSocket server side
[OUTPUT]: Scripted in-memory connector, mock server peer, tracing setup
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for market-stream tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use market_stream::config::{ConnectionConfig, StreamConfig};
use market_stream::ws::frame::{self, Frame, FrameError, Opcode, Role};
use market_stream::ws::{Connector, compute_accept_key};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio::time::Instant;

const DUPLEX_BUFFER: usize = 64 * 1024;

/// Keepalive long enough to never fire in a real-time test.
pub const QUIET_KEEPALIVE: Duration = Duration::from_secs(3600);

/// Install a test-writer subscriber once; `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn stream_config(keepalive: Duration) -> StreamConfig {
    StreamConfig::new("ws://127.0.0.1:9001/ws", keepalive)
        .with_backoff(Duration::from_millis(10), Duration::from_millis(100))
        .with_connect_timeout(Duration::from_secs(5))
}

pub fn connection_config(config: &StreamConfig) -> ConnectionConfig {
    config.connection_config().unwrap()
}

/// In-memory connector. Each attempt pops the script (`false` refuses,
/// `true` or an empty script accepts) and hands the server half of a duplex
/// pipe to the test.
#[derive(Clone)]
pub struct DuplexConnector {
    script: Arc<Mutex<VecDeque<bool>>>,
    attempts: Arc<Mutex<Vec<Instant>>>,
    peers: mpsc::UnboundedSender<DuplexStream>,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        Self::scripted(&[])
    }

    pub fn scripted(script: &[bool]) -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(script.iter().copied().collect())),
            attempts: Arc::new(Mutex::new(Vec::new())),
            peers,
        };
        (connector, rx)
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    type Stream = DuplexStream;

    async fn connect(&self, _host: &str, _port: u16) -> io::Result<DuplexStream> {
        self.attempts.lock().unwrap().push(Instant::now());
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !accept {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "scripted refusal"));
        }

        let (client, server) = tokio::io::duplex(DUPLEX_BUFFER);
        self.peers
            .send(server)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "test dropped the peer queue"))?;
        Ok(client)
    }
}

/// Server side of one connection attempt.
pub struct MockPeer {
    stream: DuplexStream,
}

impl MockPeer {
    /// Read the upgrade request and answer 101 with the matching accept key.
    pub async fn accept(mut stream: DuplexStream) -> Self {
        let request = read_request_head(&mut stream).await;
        let key = request
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("sec-websocket-key")
                    .then(|| value.trim().to_string())
            })
            .expect("request carries Sec-WebSocket-Key");

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {}\r\n\
             \r\n",
            compute_accept_key(&key)
        );
        stream.write_all(response.as_bytes()).await.unwrap();
        Self { stream }
    }

    /// Read the upgrade request and refuse it with `status`.
    pub async fn reject(mut stream: DuplexStream, status: &str) {
        read_request_head(&mut stream).await;
        let response = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n\r\n");
        stream.write_all(response.as_bytes()).await.unwrap();
    }

    pub async fn send_frame(&mut self, frame: &Frame) {
        self.send_raw(&frame::encode_with_mask(frame, None)).await;
    }

    pub async fn send_text(&mut self, text: &str) {
        self.send_frame(&Frame::text(text)).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn recv_frame(&mut self) -> Result<Frame, FrameError> {
        frame::decode(&mut self.stream, Role::Server).await
    }

    /// Next text frame, skipping keepalive pings.
    pub async fn recv_text(&mut self) -> String {
        loop {
            let frame = self.recv_frame().await.unwrap();
            match frame.opcode {
                Opcode::Text => return String::from_utf8(frame.payload).unwrap(),
                Opcode::Ping | Opcode::Pong => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_json(&mut self) -> serde_json::Value {
        serde_json::from_str(&self.recv_text().await).unwrap()
    }
}

/// Wait for the next connection attempt the connector accepted.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<DuplexStream>) -> DuplexStream {
    tokio::time::timeout(Duration::from_secs(5), peers.recv())
        .await
        .expect("timed out waiting for a connection attempt")
        .expect("connector dropped")
}

async fn read_request_head(stream: &mut DuplexStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}
