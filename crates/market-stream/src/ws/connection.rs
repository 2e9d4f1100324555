/*
[INPUT]:  Connector, resolved ConnectionConfig, optional subscription payload
[OUTPUT]: Raw text/binary messages on a bounded queue; observable connection state
[POS]:    WebSocket layer - connection actor with reconnection and subscription replay
[UPDATE]: When changing the reconnect state machine, keepalive, or close semantics
*/

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::frame::{self, Frame, FrameError, Opcode, Role};
use super::handshake::ClientHandshake;
use super::transport::Connector;
use crate::config::ConnectionConfig;
use crate::error::{Result, StreamError};

const COMMAND_CAPACITY: usize = 64;
const FRAME_BUFFER: usize = 16;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);
/// Sessions shorter than this wait out the backoff before reconnecting.
const STABLE_SESSION: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
    /// Terminal. Reached only through `close()` or dropping every handle;
    /// a Close frame from the server leads to `Disconnected` and a reconnect.
    Closed,
}

/// Payload of one data frame, as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawMessage {
    Text(String),
    Binary(Vec<u8>),
}

impl RawMessage {
    pub fn into_text(self) -> std::result::Result<String, std::string::FromUtf8Error> {
        match self {
            RawMessage::Text(text) => Ok(text),
            RawMessage::Binary(bytes) => String::from_utf8(bytes),
        }
    }
}

#[derive(Debug)]
enum Command {
    Send(String),
    SetSubscription(Option<String>),
}

/// Handle to a self-healing WebSocket connection.
///
/// The connection task owns the transport, the backoff and the stored
/// subscription; this handle only talks to it through a bounded command queue.
/// Network failures never surface here: the task reconnects until [`close`]
/// is called or every handle is dropped.
///
/// [`close`]: Connection::close
#[derive(Debug)]
pub struct Connection {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    shutdown: CancellationToken,
    receiver: Option<mpsc::Receiver<RawMessage>>,
}

impl Connection {
    /// Start the connection task. Returns immediately; connecting happens in the background.
    pub fn spawn<C: Connector>(
        connector: C,
        config: ConnectionConfig,
        subscription: Option<String>,
    ) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(StreamError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(StreamError::Config(
                "Connection::spawn requires a Tokio runtime".to_string(),
            ));
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (raw_tx, raw_rx) = mpsc::channel(config.queue_capacity);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shutdown = CancellationToken::new();

        let supervisor = Supervisor {
            backoff: Backoff::new(config.initial_backoff, config.max_backoff),
            connector,
            config,
            subscription,
            failures: 0,
            commands: command_rx,
            raw_tx,
            state: state_tx,
            shutdown: shutdown.clone(),
        };
        tokio::spawn(supervisor.run());

        Ok(Self {
            commands: command_tx,
            state: state_rx,
            shutdown,
            receiver: Some(raw_rx),
        })
    }

    /// Get the raw message receiver (first call only)
    pub fn take_receiver(&mut self) -> Option<mpsc::Receiver<RawMessage>> {
        self.receiver.take()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Send a text frame on the live session.
    ///
    /// While disconnected the message is dropped; the stored subscription is
    /// what gets replayed on reconnect.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.command(Command::Send(text.into())).await
    }

    /// Replace the payload replayed after every reconnect.
    pub async fn set_subscription(&self, payload: Option<String>) -> Result<()> {
        self.command(Command::SetSubscription(payload)).await
    }

    /// Close permanently. Idempotent; concurrent callers all wait for `Closed`.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn command(&self, command: Command) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(StreamError::Closed);
        }
        tokio::select! {
            _ = self.shutdown.cancelled() => Err(StreamError::Closed),
            sent = self.commands.send(command) => sent.map_err(|_| StreamError::Closed),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Phase {
    Attempt,
    Wait(Duration),
    Stop,
}

enum SessionEnd {
    Disconnected(String),
    Closed,
}

enum Flow {
    Continue,
    End(SessionEnd),
}

struct Supervisor<C: Connector> {
    connector: C,
    config: ConnectionConfig,
    backoff: Backoff,
    subscription: Option<String>,
    failures: u32,
    commands: mpsc::Receiver<Command>,
    raw_tx: mpsc::Sender<RawMessage>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl<C: Connector> Supervisor<C> {
    async fn run(mut self) {
        let mut phase = Phase::Attempt;
        loop {
            phase = match phase {
                Phase::Attempt => self.attempt().await,
                Phase::Wait(delay) => self.wait(delay).await,
                Phase::Stop => break,
            };
        }

        self.set_state(ConnectionState::Closed);
        info!(
            host = %self.config.host,
            resource = %self.config.resource,
            "ws connection closed"
        );
    }

    async fn attempt(&mut self) -> Phase {
        if self.shutdown.is_cancelled() {
            return Phase::Stop;
        }
        self.set_state(ConnectionState::Connecting);

        let connect_timeout = self.config.connect_timeout;
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => return Phase::Stop,
            result = tokio::time::timeout(
                connect_timeout,
                establish(&self.connector, &self.config),
            ) => result,
        };

        let mut stream = match result {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return self.retry_after(err),
            Err(_) => {
                return self.retry_after(StreamError::Timeout {
                    duration: connect_timeout,
                });
            }
        };

        self.backoff.reset();
        self.failures = 0;
        self.drain_commands();

        if let Some(payload) = self.subscription.clone() {
            let bytes = payload.len();
            if let Err(err) = frame::write_frame(&mut stream, &Frame::text(payload)).await {
                return self.retry_after(err.into());
            }
            debug!(bytes, "ws subscription replayed");
        }

        self.set_state(ConnectionState::Connected);
        info!(
            host = %self.config.host,
            resource = %self.config.resource,
            "ws connected"
        );

        let started = Instant::now();
        match self.run_session(stream).await {
            SessionEnd::Closed => Phase::Stop,
            SessionEnd::Disconnected(reason) => {
                self.set_state(ConnectionState::Disconnected);
                if let Some(hook) = &self.config.on_disconnect {
                    hook.notify(&reason);
                }
                let lasted = started.elapsed();
                if lasted < STABLE_SESSION {
                    let delay = self.backoff.next_delay();
                    warn!(
                        reason = %reason,
                        lasted = ?lasted,
                        retry_in = ?delay,
                        "ws session dropped early; reconnecting with backoff"
                    );
                    return Phase::Wait(delay);
                }
                warn!(reason = %reason, lasted = ?lasted, "ws session lost; reconnecting");
                Phase::Attempt
            }
        }
    }

    fn retry_after(&mut self, err: StreamError) -> Phase {
        self.set_state(ConnectionState::Disconnected);
        self.failures = self.failures.saturating_add(1);
        let delay = self.backoff.next_delay();
        warn!(
            host = %self.config.host,
            failures = self.failures,
            retry_in = ?delay,
            error = %err,
            "ws connect failed; retrying with backoff"
        );
        Phase::Wait(delay)
    }

    async fn wait(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Phase::Stop,
                _ = &mut sleep => return Phase::Attempt,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return Phase::Stop,
                },
            }
        }
    }

    /// Apply everything queued while offline so the replay reflects the latest subscription.
    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply_offline(command);
        }
    }

    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::SetSubscription(payload) => self.subscription = payload,
            Command::Send(text) => {
                debug!(bytes = text.len(), "ws offline; message superseded by subscription replay");
            }
        }
    }

    async fn run_session(&mut self, stream: C::Stream) -> SessionEnd {
        let (reader, mut writer) = tokio::io::split(stream);

        let (frame_tx, mut frames) = mpsc::channel(FRAME_BUFFER);
        let reader_task = tokio::spawn(read_frames(reader, frame_tx));

        let (tick_tx, mut ticks) = mpsc::channel(1);
        let keepalive_task = tokio::spawn(keepalive(
            self.config.keepalive_interval,
            tick_tx,
            self.state.subscribe(),
        ));

        let end = loop {
            let flow = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.set_state(ConnectionState::Closing);
                    send_close(&mut writer).await;
                    Flow::End(SessionEnd::Closed)
                }
                command = self.commands.recv() => match command {
                    Some(Command::Send(text)) => send(&mut writer, Frame::text(text)).await,
                    Some(Command::SetSubscription(payload)) => {
                        self.subscription = payload;
                        Flow::Continue
                    }
                    None => {
                        self.set_state(ConnectionState::Closing);
                        send_close(&mut writer).await;
                        Flow::End(SessionEnd::Closed)
                    }
                },
                frame = frames.recv() => match frame {
                    Some(Ok(frame)) => self.dispatch(frame, &mut writer).await,
                    Some(Err(err)) => Flow::End(SessionEnd::Disconnected(describe(&err))),
                    None => Flow::End(SessionEnd::Disconnected("reader stopped".to_string())),
                },
                Some(()) = ticks.recv() => {
                    debug!("ws keepalive ping");
                    send(&mut writer, Frame::ping(Vec::new())).await
                }
            };

            if let Flow::End(end) = flow {
                break end;
            }
        };

        keepalive_task.abort();
        reader_task.abort();
        let _ = reader_task.await;
        end
    }

    async fn dispatch<W>(&mut self, frame: Frame, writer: &mut W) -> Flow
    where
        W: AsyncWrite + Unpin,
    {
        if !frame.fin || frame.opcode == Opcode::Continuation {
            return Flow::End(SessionEnd::Disconnected(
                "fragmented messages are not supported".to_string(),
            ));
        }

        match frame.opcode {
            Opcode::Text => match String::from_utf8(frame.payload) {
                Ok(text) => self.deliver(RawMessage::Text(text)).await,
                Err(err) => {
                    warn!(bytes = err.as_bytes().len(), "ws text frame is not UTF-8; dropped");
                    Flow::Continue
                }
            },
            Opcode::Binary => self.deliver(RawMessage::Binary(frame.payload)).await,
            Opcode::Ping => send(writer, Frame::pong(frame.payload)).await,
            Opcode::Pong => Flow::Continue,
            Opcode::Close => {
                let code = frame.close_code();
                let reply = match code {
                    Some(code) => Frame::close_with(code, ""),
                    None => Frame::new(Opcode::Close, Vec::new()),
                };
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, frame::write_frame(writer, &reply)).await;
                Flow::End(SessionEnd::Disconnected(format!(
                    "server closed the connection (code {code:?})"
                )))
            }
            Opcode::Continuation => Flow::Continue,
        }
    }

    /// Push to the raw queue, waiting while it is full.
    async fn deliver(&mut self, message: RawMessage) -> Flow {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Flow::Continue,
            sent = self.raw_tx.send(message) => {
                if sent.is_err() {
                    debug!("ws raw receiver dropped; message discarded");
                }
                Flow::Continue
            }
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "ws state transition");
        }
    }
}

async fn establish<C: Connector>(connector: &C, config: &ConnectionConfig) -> Result<C::Stream> {
    let mut stream = connector.connect(&config.host, config.port).await?;
    ClientHandshake::new(&config.host, config.port, &config.resource)
        .perform(&mut stream)
        .await?;
    Ok(stream)
}

async fn send<W>(writer: &mut W, frame: Frame) -> Flow
where
    W: AsyncWrite + Unpin,
{
    match frame::write_frame(writer, &frame).await {
        Ok(()) => Flow::Continue,
        Err(err) => Flow::End(SessionEnd::Disconnected(format!("write failed: {err}"))),
    }
}

/// Best effort: one Close frame, then shut the write side, bounded by CLOSE_TIMEOUT.
async fn send_close<W>(writer: &mut W)
where
    W: AsyncWrite + Unpin,
{
    let closing = async {
        frame::write_frame(writer, &Frame::close()).await?;
        writer.shutdown().await
    };
    match tokio::time::timeout(CLOSE_TIMEOUT, closing).await {
        Ok(Ok(())) => debug!("ws close frame sent"),
        Ok(Err(err)) => debug!(error = %err, "ws close frame not delivered"),
        Err(_) => debug!("ws close frame timed out"),
    }
}

async fn read_frames<R>(mut reader: R, frames: mpsc::Sender<std::result::Result<Frame, FrameError>>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let result = frame::decode(&mut reader, Role::Client).await;
        let failed = result.is_err();
        if frames.send(result).await.is_err() || failed {
            break;
        }
    }
}

async fn keepalive(
    interval: Duration,
    ticks: mpsc::Sender<()>,
    state: watch::Receiver<ConnectionState>,
) {
    loop {
        tokio::time::sleep(interval).await;
        if *state.borrow() != ConnectionState::Connected {
            continue;
        }
        if let Err(TrySendError::Closed(())) = ticks.try_send(()) {
            break;
        }
    }
}

fn describe(err: &FrameError) -> String {
    if err.is_disconnect() {
        err.to_string()
    } else {
        format!("protocol error: {err}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_message_into_text() {
        assert_eq!(RawMessage::Text("a".into()).into_text().unwrap(), "a");
        assert_eq!(RawMessage::Binary(b"b".to_vec()).into_text().unwrap(), "b");
        assert!(RawMessage::Binary(vec![0xff, 0xfe]).into_text().is_err());
    }

    #[tokio::test]
    async fn keepalive_ticks_only_while_connected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (tick_tx, mut ticks) = mpsc::channel(1);
        let task = tokio::spawn(keepalive(Duration::from_millis(5), tick_tx, state_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(ticks.try_recv().is_err());

        state_tx.send_replace(ConnectionState::Connected);
        let tick = tokio::time::timeout(Duration::from_secs(1), ticks.recv()).await;
        assert_eq!(tick.unwrap(), Some(()));

        task.abort();
    }

    #[tokio::test]
    async fn read_frames_stops_after_error() {
        let mut bytes = frame::encode_with_mask(&Frame::text("hi"), None);
        bytes.extend_from_slice(&[0x83, 0x00]);
        let (tx, mut rx) = mpsc::channel(4);

        read_frames(bytes.as_slice(), tx).await;

        assert_eq!(rx.recv().await.unwrap().unwrap(), Frame::text("hi"));
        assert!(matches!(
            rx.recv().await.unwrap(),
            Err(FrameError::InvalidOpcode(0x3))
        ));
        assert!(rx.recv().await.is_none());
    }
}
