/*
[INPUT]:  Connector, Channel parameters, initial ids, StreamConfig
[OUTPUT]: Typed messages on a bounded MessageStream; live subscription control
[POS]:    Channel layer - generic typed client and its parsing task
[UPDATE]: When changing subscription bookkeeping, parsing, or output delivery
*/

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Channel, ChannelMessage, ParseError, SubscriptionAction};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::ws::{Connection, ConnectionState, Connector, RawMessage};

const MESSAGE_SAMPLE_LIMIT: usize = 3;
const SUBSCRIPTION_LOG_LIMIT: usize = 10;
const UNKNOWN_LOG_LIMIT: usize = 3;
const PARSE_FAIL_LOG_LIMIT: usize = 3;
const RAW_LOG_MAX_BYTES: usize = 1024;

static MESSAGE_SAMPLE_COUNT: AtomicUsize = AtomicUsize::new(0);
static SUBSCRIBE_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNKNOWN_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);
static PARSE_FAIL_LOG_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Typed client for one channel over one self-healing connection.
///
/// The subscription set lives here; every change stores the rebuilt full
/// payload on the connection (for replay) before the incremental update is
/// sent, so a reconnect never resurrects a stale set.
#[derive(Debug)]
pub struct ChannelClient<Ch: Channel> {
    channel: Ch,
    subscriptions: BTreeSet<Ch::Id>,
    connection: Connection,
    stream: Option<MessageStream<Ch::Message>>,
}

impl<Ch: Channel> ChannelClient<Ch> {
    pub async fn connect<C: Connector>(
        connector: C,
        channel: Ch,
        ids: impl IntoIterator<Item = Ch::Id>,
        config: StreamConfig,
    ) -> Result<Self> {
        let connection_config = config.connection_config()?;
        let capacity = connection_config.queue_capacity;
        let subscriptions: BTreeSet<Ch::Id> = ids.into_iter().collect();
        let payload = channel.subscription_payload(&subscriptions)?;

        let mut connection = Connection::spawn(connector, connection_config, payload)?;
        let raw = connection.take_receiver().ok_or(StreamError::Closed)?;
        let (output_tx, output_rx) = mpsc::channel(capacity);
        tokio::spawn(run_parser::<Ch>(raw, output_tx, connection.shutdown_token()));

        info!(
            channel = Ch::NAME,
            endpoint = %config.endpoint,
            subscriptions = subscriptions.len(),
            "channel client started"
        );

        Ok(Self {
            channel,
            subscriptions,
            connection,
            stream: Some(MessageStream::new(output_rx)),
        })
    }

    /// Typed output (first call only)
    pub fn stream(&mut self) -> Option<MessageStream<Ch::Message>> {
        self.stream.take()
    }

    pub fn channel(&self) -> &Ch {
        &self.channel
    }

    pub fn subscriptions(&self) -> &BTreeSet<Ch::Id> {
        &self.subscriptions
    }

    pub async fn subscribe(&mut self, ids: impl IntoIterator<Item = Ch::Id>) -> Result<()> {
        let added: BTreeSet<Ch::Id> = ids
            .into_iter()
            .filter(|id| !self.subscriptions.contains(id))
            .collect();
        self.apply(SubscriptionAction::Subscribe, added).await
    }

    pub async fn unsubscribe(&mut self, ids: impl IntoIterator<Item = Ch::Id>) -> Result<()> {
        let removed: BTreeSet<Ch::Id> = ids
            .into_iter()
            .filter(|id| self.subscriptions.contains(id))
            .collect();
        self.apply(SubscriptionAction::Unsubscribe, removed).await
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Close the connection and stop parsing. Idempotent.
    pub async fn close(&self) {
        self.connection.close().await;
    }

    async fn apply(&mut self, action: SubscriptionAction, changed: BTreeSet<Ch::Id>) -> Result<()> {
        if self.connection.is_closed() {
            return Err(StreamError::Closed);
        }
        if changed.is_empty() {
            return Ok(());
        }

        let mut next = self.subscriptions.clone();
        match action {
            SubscriptionAction::Subscribe => next.extend(changed.iter().cloned()),
            SubscriptionAction::Unsubscribe => next.retain(|id| !changed.contains(id)),
        }

        let changed: Vec<Ch::Id> = changed.into_iter().collect();
        let payload = self.channel.subscription_payload(&next)?;
        let update = self.channel.update_payload(action, &changed)?;

        self.connection.set_subscription(payload).await?;
        self.connection.send_text(update).await?;
        self.subscriptions = next;

        log_subscription_sent(Ch::NAME, action, &changed);
        Ok(())
    }
}

/// Bounded queue of typed messages; ends once the client is closed.
#[derive(Debug)]
pub struct MessageStream<T> {
    inner: mpsc::Receiver<T>,
}

impl<T> MessageStream<T> {
    fn new(inner: mpsc::Receiver<T>) -> Self {
        Self { inner }
    }

    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    pub fn try_recv(&mut self) -> std::result::Result<T, mpsc::error::TryRecvError> {
        self.inner.try_recv()
    }

    /// Messages queued and not yet taken.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T> Stream for MessageStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.poll_recv(cx)
    }
}

async fn run_parser<Ch: Channel>(
    mut raw: mpsc::Receiver<RawMessage>,
    output: mpsc::Sender<Ch::Message>,
    shutdown: CancellationToken,
) {
    'outer: loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = raw.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let text = match message.into_text() {
            Ok(text) => text,
            Err(err) => {
                log_parse_fail_once(Ch::NAME, &ParseError::Utf8, &String::from_utf8_lossy(err.as_bytes()));
                continue;
            }
        };

        let messages = match Ch::parse(&text) {
            Ok(messages) => messages,
            Err(err) => {
                log_parse_fail_once(Ch::NAME, &err, &text);
                continue;
            }
        };

        for message in messages {
            if message.is_unknown() {
                log_unknown_message_once(Ch::NAME, message.kind(), &text);
            } else {
                log_message_sample_once(Ch::NAME, message.kind());
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break 'outer,
                sent = output.send(message) => {
                    if sent.is_err() {
                        break 'outer;
                    }
                }
            }
        }
    }

    debug!(channel = Ch::NAME, "channel parser stopped");
}

fn log_subscription_sent<Id: std::fmt::Debug>(channel: &str, action: SubscriptionAction, ids: &[Id]) {
    let count = SUBSCRIBE_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count >= SUBSCRIPTION_LOG_LIMIT {
        return;
    }

    let ids = truncate_for_log(&format!("{ids:?}"), RAW_LOG_MAX_BYTES);
    info!(
        sample_index = count + 1,
        sample_limit = SUBSCRIPTION_LOG_LIMIT,
        channel,
        action = action.as_str(),
        ids = %ids,
        "ws subscription sent"
    );
}

fn log_message_sample_once(channel: &str, kind: &str) {
    let count = MESSAGE_SAMPLE_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < MESSAGE_SAMPLE_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = MESSAGE_SAMPLE_LIMIT,
            channel,
            kind,
            "ws message sample"
        );
    }
}

fn log_unknown_message_once(channel: &str, kind: &str, raw: &str) {
    let count = UNKNOWN_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < UNKNOWN_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = UNKNOWN_LOG_LIMIT,
            channel,
            kind,
            bytes = raw.len(),
            "ws message kind unrecognized"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = UNKNOWN_LOG_LIMIT,
            channel,
            kind,
            message = %preview,
            "ws message kind unrecognized"
        );
    }
}

fn log_parse_fail_once(channel: &str, err: &ParseError, raw: &str) {
    let count = PARSE_FAIL_LOG_COUNT.fetch_add(1, Ordering::Relaxed);
    if count < PARSE_FAIL_LOG_LIMIT {
        info!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            channel,
            error = %err,
            bytes = raw.len(),
            "ws message parse failed"
        );
        let preview = truncate_for_log(raw, RAW_LOG_MAX_BYTES);
        debug!(
            sample_index = count + 1,
            sample_limit = PARSE_FAIL_LOG_LIMIT,
            channel,
            error = %err,
            bytes = raw.len(),
            message = %preview,
            "ws message parse failed"
        );
    }
}

fn truncate_for_log(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = String::with_capacity(end + 3);
    out.push_str(&value[..end]);
    out.push_str("...");
    out
}
