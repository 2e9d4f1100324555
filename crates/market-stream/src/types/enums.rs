/*
[INPUT]:  Feed schema definitions and serde requirements
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - enum definitions shared by the streamed messages
[UPDATE]: When a feed adds values or new enums are needed
*/

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY", alias = "buy")]
    Buy,
    #[serde(rename = "SELL", alias = "sell")]
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Matched,
    Mined,
    Confirmed,
    Retrying,
    Failed,
}

/// What happened to an order in a user-channel `order` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderEventKind {
    Placement,
    Update,
    Cancellation,
}

/// Upstream of the crypto price topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Binance,
    Chainlink,
}

impl PriceSource {
    pub fn topic(self) -> &'static str {
        match self {
            PriceSource::Binance => "crypto_prices",
            PriceSource::Chainlink => "crypto_prices_chainlink",
        }
    }

    pub fn from_topic(topic: &str) -> Option<Self> {
        match topic {
            "crypto_prices" => Some(PriceSource::Binance),
            "crypto_prices_chainlink" => Some(PriceSource::Chainlink),
            _ => None,
        }
    }
}

/// Kind of entity a comment thread hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommentEntityType {
    Event,
    Series,
    #[serde(alias = "market")]
    Market,
}

impl CommentEntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            CommentEntityType::Event => "Event",
            CommentEntityType::Series => "Series",
            CommentEntityType::Market => "Market",
        }
    }
}
