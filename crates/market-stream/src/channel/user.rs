/*
[INPUT]:  Market (condition) ids and pre-serialized API credentials
[OUTPUT]: Trade and order events for the authenticated account
[POS]:    Channel layer - authenticated user channel of the order-book service
[UPDATE]: When the user channel payloads or event types change
*/

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{Value, json};

use super::{Channel, ChannelClient, ParseError, SubscriptionAction, json_objects, str_field, unknown};
use crate::config::StreamConfig;
use crate::error::{Result, StreamError};
use crate::types::UserMessage;
use crate::ws::Connector;

pub type UserClient = ChannelClient<UserChannel>;

/// User channel bound to one set of credentials.
///
/// The credentials are produced elsewhere and passed in as JSON text; they are
/// embedded verbatim under `auth` in every subscription payload.
#[derive(Clone)]
pub struct UserChannel {
    auth: Value,
}

impl UserChannel {
    pub fn new(auth_json: &str) -> Result<Self> {
        let auth: Value = serde_json::from_str(auth_json)?;
        if !auth.is_object() {
            return Err(StreamError::Config(
                "user channel credentials must be a JSON object".to_string(),
            ));
        }
        Ok(Self { auth })
    }
}

impl fmt::Debug for UserChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserChannel")
            .field("auth", &"<redacted>")
            .finish()
    }
}

impl Channel for UserChannel {
    type Id = String;
    type Message = UserMessage;

    const NAME: &'static str = "user";
    const ENDPOINT: &'static str = "wss://ws-subscriptions-clob.polymarket.com/ws/user";

    /// Always sent: authentication rides on the subscription even with no markets.
    fn subscription_payload(&self, ids: &BTreeSet<String>) -> Result<Option<String>> {
        let payload = json!({
            "auth": self.auth,
            "markets": ids,
            "type": "user",
        });
        Ok(Some(serde_json::to_string(&payload)?))
    }

    fn update_payload(&self, action: SubscriptionAction, ids: &[String]) -> Result<String> {
        let payload = json!({
            "markets": ids,
            "operation": action.as_str(),
        });
        Ok(serde_json::to_string(&payload)?)
    }

    fn parse(raw: &str) -> std::result::Result<Vec<UserMessage>, ParseError> {
        json_objects(raw)?
            .into_iter()
            .map(|object| -> std::result::Result<_, ParseError> {
                let kind = str_field(&object, "event_type")?.to_owned();
                let message = match kind.as_str() {
                    "trade" => UserMessage::Trade(serde_json::from_value(object)?),
                    "order" => UserMessage::Order(serde_json::from_value(object)?),
                    _ => UserMessage::Unknown(unknown(kind, &object)),
                };
                Ok(message)
            })
            .collect()
    }
}

/// Stream the account's trades and orders on `markets`.
pub async fn connect_user<C: Connector>(
    connector: C,
    auth_json: &str,
    markets: impl IntoIterator<Item = impl Into<String>>,
    config: StreamConfig,
) -> Result<UserClient> {
    let channel = UserChannel::new(auth_json)?;
    let ids = markets.into_iter().map(Into::into);
    ChannelClient::connect(connector, channel, ids, config).await
}
