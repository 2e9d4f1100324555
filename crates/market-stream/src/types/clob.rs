/*
[INPUT]:  Order-book service event payloads (market and user channels)
[OUTPUT]: Typed Rust structs and the MarketMessage / UserMessage unions
[POS]:    Data layer - order-book channel message definitions
[UPDATE]: When the order-book feed adds event types or fields
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::UnknownMessage;
use super::enums::{OrderEventKind, Side, TradeStatus};
use super::serde_helpers;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub size: Decimal,
}

/// Full book snapshot for one asset, sent on subscribe and after trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookUpdate {
    pub asset_id: String,
    pub market: String,
    #[serde(default, alias = "buys")]
    pub bids: Vec<PriceLevel>,
    #[serde(default, alias = "sells")]
    pub asks: Vec<PriceLevel>,
    #[serde(with = "serde_helpers::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub hash: Option<String>,
}

impl BookUpdate {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.iter().max_by(|a, b| a.price.cmp(&b.price))
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.iter().min_by(|a, b| a.price.cmp(&b.price))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub asset_id: String,
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    /// New aggregate size at `price`; zero removes the level
    #[serde(with = "serde_helpers::decimal")]
    pub size: Decimal,
    pub side: Side,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default, with = "serde_helpers::option_decimal")]
    pub best_bid: Option<Decimal>,
    #[serde(default, with = "serde_helpers::option_decimal")]
    pub best_ask: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChangeBatch {
    pub market: String,
    #[serde(default)]
    pub price_changes: Vec<PriceChange>,
    #[serde(with = "serde_helpers::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickSizeChange {
    pub asset_id: String,
    pub market: String,
    #[serde(with = "serde_helpers::decimal")]
    pub old_tick_size: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub new_tick_size: Decimal,
    #[serde(with = "serde_helpers::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastTradePrice {
    pub asset_id: String,
    pub market: String,
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub size: Decimal,
    pub side: Side,
    #[serde(default, with = "serde_helpers::option_decimal")]
    pub fee_rate_bps: Option<Decimal>,
    #[serde(with = "serde_helpers::timestamp_ms")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarketMessage {
    Book(BookUpdate),
    PriceChange(PriceChangeBatch),
    TickSizeChange(TickSizeChange),
    LastTradePrice(LastTradePrice),
    Unknown(UnknownMessage),
}

impl MarketMessage {
    /// Wire `event_type` this message was decoded from.
    pub fn kind(&self) -> &str {
        match self {
            MarketMessage::Book(_) => "book",
            MarketMessage::PriceChange(_) => "price_change",
            MarketMessage::TickSizeChange(_) => "tick_size_change",
            MarketMessage::LastTradePrice(_) => "last_trade_price",
            MarketMessage::Unknown(unknown) => &unknown.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakerOrder {
    pub order_id: String,
    pub asset_id: String,
    #[serde(with = "serde_helpers::decimal")]
    pub matched_amount: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeUpdate {
    #[serde(with = "serde_helpers::id_string")]
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub size: Decimal,
    pub status: TradeStatus,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub taker_order_id: Option<String>,
    #[serde(default)]
    pub maker_orders: Vec<MakerOrder>,
    #[serde(default, with = "serde_helpers::option_timestamp_ms")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    #[serde(with = "serde_helpers::id_string")]
    pub id: String,
    pub market: String,
    pub asset_id: String,
    pub side: Side,
    #[serde(with = "serde_helpers::decimal")]
    pub price: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub original_size: Decimal,
    #[serde(with = "serde_helpers::decimal")]
    pub size_matched: Decimal,
    #[serde(rename = "type")]
    pub kind: OrderEventKind,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub associate_trades: Vec<String>,
    #[serde(default, with = "serde_helpers::option_timestamp_ms")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OrderUpdate {
    pub fn remaining_size(&self) -> Decimal {
        (self.original_size - self.size_matched).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum UserMessage {
    Trade(TradeUpdate),
    Order(OrderUpdate),
    Unknown(UnknownMessage),
}

impl UserMessage {
    pub fn kind(&self) -> &str {
        match self {
            UserMessage::Trade(_) => "trade",
            UserMessage::Order(_) => "order",
            UserMessage::Unknown(unknown) => &unknown.kind,
        }
    }
}
