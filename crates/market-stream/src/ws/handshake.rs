/*
[INPUT]:  Connected byte stream (usually TLS), host, port, resource path
[OUTPUT]: Upgraded stream ready for framing, or a typed HandshakeError
[POS]:    WebSocket layer - RFC 6455 opening handshake (client side only)
[UPDATE]: When changing request headers or response validation
*/

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use rand::rngs::OsRng;
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("I/O error during handshake: {0}")]
    Io(#[from] std::io::Error),

    #[error("server answered {status} {reason} instead of 101")]
    UnexpectedStatus { status: u16, reason: String },

    #[error("missing Sec-WebSocket-Accept header")]
    MissingAccept,

    #[error("Sec-WebSocket-Accept mismatch: expected {expected}, got {actual}")]
    AcceptMismatch { expected: String, actual: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("response head exceeds 8 KiB")]
    ResponseTooLarge,
}

/// `base64(SHA1(key ++ GUID))`, the value a server must echo back.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// One opening handshake. A new one (and a new nonce) is built for every attempt.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    host: String,
    port: u16,
    resource: String,
    key: String,
}

impl ClientHandshake {
    pub fn new(host: impl Into<String>, port: u16, resource: impl Into<String>) -> Self {
        let mut nonce = [0u8; 16];
        OsRng.fill_bytes(&mut nonce);
        Self::with_key(host, port, resource, STANDARD.encode(nonce))
    }

    pub fn with_key(
        host: impl Into<String>,
        port: u16,
        resource: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            resource: resource.into(),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn request(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let host = match self.port {
            80 | 443 => host,
            port => format!("{host}:{port}"),
        };
        format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             \r\n",
            self.resource, host, self.key
        )
    }

    pub async fn perform<S>(&self, stream: &mut S) -> Result<(), HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(self.request().as_bytes()).await?;
        stream.flush().await?;

        let head = read_response_head(stream).await?;
        let response = Response::parse(&head)?;

        if response.status != 101 {
            return Err(HandshakeError::UnexpectedStatus {
                status: response.status,
                reason: response.reason,
            });
        }

        let actual = response
            .header("sec-websocket-accept")
            .ok_or(HandshakeError::MissingAccept)?;
        let expected = compute_accept_key(&self.key);
        if actual != expected {
            return Err(HandshakeError::AcceptMismatch {
                expected,
                actual: actual.to_string(),
            });
        }

        debug!(host = %self.host, resource = %self.resource, "ws handshake accepted");
        Ok(())
    }
}

/// Read up to and including the blank line, one byte at a time so frame bytes stay unread.
async fn read_response_head<S>(stream: &mut S) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(HandshakeError::Malformed(
                "connection closed before end of response head".to_string(),
            ));
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(HandshakeError::ResponseTooLarge);
        }
    }
}

#[derive(Debug)]
struct Response {
    status: u16,
    reason: String,
    headers: Vec<(String, String)>,
}

impl Response {
    fn parse(head: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(head)
            .map_err(|_| HandshakeError::Malformed("response head is not UTF-8".to_string()))?;
        let mut lines = text.split("\r\n");

        let status_line = lines.next().unwrap_or_default();
        let mut parts = status_line.splitn(3, ' ');
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(HandshakeError::Malformed(format!(
                "bad status line: {status_line:?}"
            )));
        }
        let status = parts
            .next()
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| HandshakeError::Malformed(format!("bad status line: {status_line:?}")))?;
        let reason = parts.next().unwrap_or_default().to_string();

        let mut headers = Vec::new();
        for line in lines.take_while(|line| !line.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HandshakeError::Malformed(format!("bad header line: {line:?}")))?;
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}
