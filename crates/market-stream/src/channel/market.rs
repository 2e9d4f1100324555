/*
[INPUT]:  Asset ids (order-book token ids)
[OUTPUT]: Book snapshots, price changes, tick size changes, last trade prices
[POS]:    Channel layer - public market channel of the order-book service
[UPDATE]: When the market channel payloads or event types change
*/

use std::collections::BTreeSet;

use serde_json::json;

use super::{Channel, ChannelClient, ParseError, SubscriptionAction, json_objects, str_field, unknown};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::types::MarketMessage;
use crate::ws::Connector;

pub type MarketClient = ChannelClient<MarketChannel>;

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketChannel;

impl Channel for MarketChannel {
    type Id = String;
    type Message = MarketMessage;

    const NAME: &'static str = "market";
    const ENDPOINT: &'static str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

    fn subscription_payload(&self, ids: &BTreeSet<String>) -> Result<Option<String>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let payload = json!({
            "assets_ids": ids,
            "type": "market",
        });
        Ok(Some(serde_json::to_string(&payload)?))
    }

    fn update_payload(&self, action: SubscriptionAction, ids: &[String]) -> Result<String> {
        let payload = json!({
            "assets_ids": ids,
            "operation": action.as_str(),
        });
        Ok(serde_json::to_string(&payload)?)
    }

    fn parse(raw: &str) -> std::result::Result<Vec<MarketMessage>, ParseError> {
        json_objects(raw)?
            .into_iter()
            .map(|object| -> std::result::Result<_, ParseError> {
                let kind = str_field(&object, "event_type")?.to_owned();
                let message = match kind.as_str() {
                    "book" => MarketMessage::Book(serde_json::from_value(object)?),
                    "price_change" => MarketMessage::PriceChange(serde_json::from_value(object)?),
                    "tick_size_change" => {
                        MarketMessage::TickSizeChange(serde_json::from_value(object)?)
                    }
                    "last_trade_price" => {
                        MarketMessage::LastTradePrice(serde_json::from_value(object)?)
                    }
                    _ => MarketMessage::Unknown(unknown(kind, &object)),
                };
                Ok(message)
            })
            .collect()
    }
}

/// Stream order-book events for `asset_ids` over one connection.
pub async fn connect_market<C: Connector>(
    connector: C,
    asset_ids: impl IntoIterator<Item = impl Into<String>>,
    config: StreamConfig,
) -> Result<MarketClient> {
    let ids = asset_ids.into_iter().map(Into::into);
    ChannelClient::connect(connector, MarketChannel, ids, config).await
}
