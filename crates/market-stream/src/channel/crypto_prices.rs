/*
[INPUT]:  Price source and symbols
[OUTPUT]: Crypto price ticks from the live-data service
[POS]:    Channel layer - crypto price topics of the live-data service
[UPDATE]: When the crypto price topics or filter formats change
*/

use std::collections::BTreeSet;

use serde_json::json;

use super::live_data::{self, LiveSubscription};
use super::{Channel, ChannelClient, ParseError, SubscriptionAction, json_objects, unknown};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::types::{CryptoPriceMessage, PriceSource};
use crate::ws::Connector;

pub type CryptoPricesClient = ChannelClient<CryptoPricesChannel>;

/// Symbols are `btcusdt` style for Binance and `btc/usd` style for Chainlink.
#[derive(Debug, Clone, Copy)]
pub struct CryptoPricesChannel {
    source: PriceSource,
}

impl CryptoPricesChannel {
    pub fn new(source: PriceSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> PriceSource {
        self.source
    }

    fn subscriptions(&self, ids: &[String]) -> Result<Vec<LiveSubscription>> {
        let topic = self.source.topic();
        match self.source {
            // One entry, symbols comma separated
            PriceSource::Binance => Ok(vec![LiveSubscription {
                topic,
                kind: "update",
                filters: Some(ids.join(",")),
            }]),
            // One entry per symbol, filter is a JSON document
            PriceSource::Chainlink => ids
                .iter()
                .map(|symbol| -> Result<LiveSubscription> {
                    Ok(LiveSubscription {
                        topic,
                        kind: "*",
                        filters: Some(serde_json::to_string(&json!({ "symbol": symbol }))?),
                    })
                })
                .collect(),
        }
    }
}

impl Channel for CryptoPricesChannel {
    type Id = String;
    type Message = CryptoPriceMessage;

    const NAME: &'static str = "crypto_prices";
    const ENDPOINT: &'static str = live_data::ENDPOINT;

    fn subscription_payload(&self, ids: &BTreeSet<String>) -> Result<Option<String>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let ids: Vec<String> = ids.iter().cloned().collect();
        let subscriptions = self.subscriptions(&ids)?;
        live_data::request(SubscriptionAction::Subscribe, &subscriptions).map(Some)
    }

    fn update_payload(&self, action: SubscriptionAction, ids: &[String]) -> Result<String> {
        live_data::request(action, &self.subscriptions(ids)?)
    }

    fn parse(raw: &str) -> std::result::Result<Vec<CryptoPriceMessage>, ParseError> {
        json_objects(raw)?
            .into_iter()
            .map(|object| -> std::result::Result<_, ParseError> {
                let envelope = live_data::envelope(&object)?;
                match PriceSource::from_topic(&envelope.topic) {
                    Some(source) if envelope.kind == "update" => Ok(CryptoPriceMessage::Price {
                        source,
                        price: serde_json::from_value(envelope.payload)?,
                    }),
                    _ => Ok(CryptoPriceMessage::Unknown(unknown(
                        format!("{}/{}", envelope.topic, envelope.kind),
                        &object,
                    ))),
                }
            })
            .collect()
    }
}

/// Stream `source` prices for `symbols` from the live-data service.
pub async fn connect_crypto_prices<C: Connector>(
    connector: C,
    source: PriceSource,
    symbols: impl IntoIterator<Item = impl Into<String>>,
    config: StreamConfig,
) -> Result<CryptoPricesClient> {
    let ids = symbols.into_iter().map(Into::into);
    ChannelClient::connect(connector, CryptoPricesChannel::new(source), ids, config).await
}
