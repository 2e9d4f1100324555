/*
[INPUT]:  Topic, event type and per-entry filters
[OUTPUT]: Live-data service subscribe/unsubscribe requests, decoded envelopes
[POS]:    Channel layer - shared wire format of the live-data service
[UPDATE]: When the live-data request or envelope format changes
*/

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ParseError, SubscriptionAction};
use crate::error::Result;
use crate::types::LiveDataEnvelope;

pub(crate) const ENDPOINT: &str = "wss://ws-live-data.polymarket.com/ws";

#[derive(Debug, Clone, Serialize)]
pub(crate) struct LiveSubscription {
    pub topic: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<String>,
}

#[derive(Debug, Serialize)]
struct LiveRequest<'a> {
    action: &'static str,
    subscriptions: &'a [LiveSubscription],
}

pub(crate) fn request(
    action: SubscriptionAction,
    subscriptions: &[LiveSubscription],
) -> Result<String> {
    Ok(serde_json::to_string(&LiveRequest {
        action: action.as_str(),
        subscriptions,
    })?)
}

/// Decode the envelope, leaving the payload for the caller.
pub(crate) fn envelope(object: &Value) -> std::result::Result<LiveDataEnvelope, ParseError> {
    Ok(LiveDataEnvelope::deserialize(object)?)
}
