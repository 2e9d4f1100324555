/*
[INPUT]:  Live-data service envelopes (crypto prices, comments)
[OUTPUT]: Typed Rust structs and the CryptoPriceMessage / CommentMessage unions
[POS]:    Data layer - live-data topic message definitions
[UPDATE]: When the live-data service adds topics, event types or fields
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::UnknownMessage;
use super::enums::{CommentEntityType, PriceSource};
use super::serde_helpers;

/// Outer frame of every live-data message: `{topic, type, timestamp, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveDataEnvelope {
    pub topic: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, with = "serde_helpers::option_timestamp_ms")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptoPrice {
    pub symbol: String,
    #[serde(with = "serde_helpers::decimal")]
    pub value: Decimal,
    #[serde(with = "serde_helpers::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CryptoPriceMessage {
    Price {
        source: PriceSource,
        price: CryptoPrice,
    },
    Unknown(UnknownMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub pseudonym: Option<String>,
    #[serde(default)]
    pub proxy_wallet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(with = "serde_helpers::id_string")]
    pub id: String,
    #[serde(default)]
    pub body: String,
    pub parent_entity_type: CommentEntityType,
    #[serde(rename = "parentEntityID")]
    pub parent_entity_id: i64,
    #[serde(default, rename = "parentCommentID")]
    pub parent_comment_id: Option<String>,
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub reply_address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub profile: Option<CommentProfile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    #[serde(with = "serde_helpers::id_string")]
    pub id: String,
    #[serde(rename = "commentID", with = "serde_helpers::id_string")]
    pub comment_id: String,
    pub reaction_type: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub user_address: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommentMessage {
    CommentCreated(Comment),
    CommentRemoved(Comment),
    ReactionCreated(Reaction),
    ReactionRemoved(Reaction),
    Unknown(UnknownMessage),
}

impl CommentMessage {
    pub fn kind(&self) -> &str {
        match self {
            CommentMessage::CommentCreated(_) => "comment_created",
            CommentMessage::CommentRemoved(_) => "comment_removed",
            CommentMessage::ReactionCreated(_) => "reaction_created",
            CommentMessage::ReactionRemoved(_) => "reaction_removed",
            CommentMessage::Unknown(unknown) => &unknown.kind,
        }
    }
}
