/*
[INPUT]:  Channel parameters, subscription ids, raw text payloads
[OUTPUT]: Subscription payloads and typed messages per channel
[POS]:    Channel layer - typed clients over one Connection each
[UPDATE]: When adding channels or changing the Channel contract
*/

pub mod client;
pub mod comments;
pub mod crypto_prices;
pub(crate) mod live_data;
pub mod market;
pub mod user;

use std::collections::BTreeSet;
use std::fmt::Debug;

use serde_json::Value;
use thiserror::Error;

use crate::error::Result;
use crate::types::{CommentMessage, CryptoPriceMessage, MarketMessage, UnknownMessage, UserMessage};

pub use client::{ChannelClient, MessageStream};
pub use comments::{CommentsChannel, CommentsClient, connect_comments};
pub use crypto_prices::{CryptoPricesChannel, CryptoPricesClient, connect_crypto_prices};
pub use market::{MarketChannel, MarketClient, connect_market};
pub use user::{UserChannel, UserClient, connect_user};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("binary payload is not UTF-8")]
    Utf8,

    #[error("unexpected shape: {0}")]
    Shape(String),
}

/// Implemented by every typed message union.
pub trait ChannelMessage: Send + Debug + 'static {
    /// Discriminator the message was decoded from.
    fn kind(&self) -> &str;

    fn is_unknown(&self) -> bool;
}

/// What differs between channels: endpoint, payload formats and decoding.
///
/// Everything else (connection, replay, parsing task, output queue) lives in
/// [`ChannelClient`].
pub trait Channel: Send + Sync + 'static {
    type Id: Ord + Clone + Send + Sync + Debug + 'static;
    type Message: ChannelMessage;

    const NAME: &'static str;
    const ENDPOINT: &'static str;

    /// Full payload replayed after every reconnect, or `None` when there is
    /// nothing to subscribe to.
    fn subscription_payload(&self, ids: &BTreeSet<Self::Id>) -> Result<Option<String>>;

    /// Incremental message for ids entering or leaving the set on a live session.
    fn update_payload(&self, action: SubscriptionAction, ids: &[Self::Id]) -> Result<String>;

    /// Decode one raw text payload into zero or more messages.
    fn parse(raw: &str) -> std::result::Result<Vec<Self::Message>, ParseError>;
}

impl ChannelMessage for MarketMessage {
    fn kind(&self) -> &str {
        MarketMessage::kind(self)
    }

    fn is_unknown(&self) -> bool {
        matches!(self, MarketMessage::Unknown(_))
    }
}

impl ChannelMessage for UserMessage {
    fn kind(&self) -> &str {
        UserMessage::kind(self)
    }

    fn is_unknown(&self) -> bool {
        matches!(self, UserMessage::Unknown(_))
    }
}

impl ChannelMessage for CryptoPriceMessage {
    fn kind(&self) -> &str {
        match self {
            CryptoPriceMessage::Price { source, .. } => source.topic(),
            CryptoPriceMessage::Unknown(unknown) => &unknown.kind,
        }
    }

    fn is_unknown(&self) -> bool {
        matches!(self, CryptoPriceMessage::Unknown(_))
    }
}

impl ChannelMessage for CommentMessage {
    fn kind(&self) -> &str {
        CommentMessage::kind(self)
    }

    fn is_unknown(&self) -> bool {
        matches!(self, CommentMessage::Unknown(_))
    }
}

/// Split a payload into its JSON objects. Feeds send either one object or an
/// array of them; a blank payload carries none.
pub(crate) fn json_objects(raw: &str) -> std::result::Result<Vec<Value>, ParseError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }

    match serde_json::from_str::<Value>(raw)? {
        object @ Value::Object(_) => Ok(vec![object]),
        Value::Array(items) => {
            for item in &items {
                if !item.is_object() {
                    return Err(ParseError::Shape(format!(
                        "array element is {}, expected an object",
                        json_type(item)
                    )));
                }
            }
            Ok(items)
        }
        other => Err(ParseError::Shape(format!(
            "payload is {}, expected an object or array",
            json_type(&other)
        ))),
    }
}

pub(crate) fn str_field<'a>(
    object: &'a Value,
    name: &str,
) -> std::result::Result<&'a str, ParseError> {
    object
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ParseError::Shape(format!("missing string field {name:?}")))
}

pub(crate) fn unknown(kind: impl Into<String>, object: &Value) -> UnknownMessage {
    UnknownMessage {
        kind: kind.into(),
        raw: object.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
