/*
[INPUT]:  Parent entity type and entity ids
[OUTPUT]: Comment and reaction events from the live-data service
[POS]:    Channel layer - comments topic of the live-data service
[UPDATE]: When the comments topic, filters or event types change
*/

use std::collections::BTreeSet;

use serde_json::json;

use super::live_data::{self, LiveSubscription};
use super::{Channel, ChannelClient, ParseError, SubscriptionAction, json_objects, unknown};
use crate::config::StreamConfig;
use crate::error::Result;
use crate::types::{CommentEntityType, CommentMessage};
use crate::ws::Connector;

const TOPIC: &str = "comments";

pub type CommentsClient = ChannelClient<CommentsChannel>;

#[derive(Debug, Clone, Copy)]
pub struct CommentsChannel {
    entity_type: CommentEntityType,
}

impl CommentsChannel {
    pub fn new(entity_type: CommentEntityType) -> Self {
        Self { entity_type }
    }

    pub fn entity_type(&self) -> CommentEntityType {
        self.entity_type
    }

    fn subscriptions(&self, ids: &[i64]) -> Result<Vec<LiveSubscription>> {
        ids.iter()
            .map(|id| -> Result<LiveSubscription> {
                let filters = json!({
                    "parentEntityID": id,
                    "parentEntityType": self.entity_type.as_str(),
                });
                Ok(LiveSubscription {
                    topic: TOPIC,
                    kind: "*",
                    filters: Some(serde_json::to_string(&filters)?),
                })
            })
            .collect()
    }
}

impl Channel for CommentsChannel {
    type Id = i64;
    type Message = CommentMessage;

    const NAME: &'static str = "comments";
    const ENDPOINT: &'static str = live_data::ENDPOINT;

    fn subscription_payload(&self, ids: &BTreeSet<i64>) -> Result<Option<String>> {
        if ids.is_empty() {
            return Ok(None);
        }
        let ids: Vec<i64> = ids.iter().copied().collect();
        live_data::request(SubscriptionAction::Subscribe, &self.subscriptions(&ids)?).map(Some)
    }

    fn update_payload(&self, action: SubscriptionAction, ids: &[i64]) -> Result<String> {
        live_data::request(action, &self.subscriptions(ids)?)
    }

    fn parse(raw: &str) -> std::result::Result<Vec<CommentMessage>, ParseError> {
        json_objects(raw)?
            .into_iter()
            .map(|object| -> std::result::Result<_, ParseError> {
                let envelope = live_data::envelope(&object)?;
                if envelope.topic != TOPIC {
                    return Ok(CommentMessage::Unknown(unknown(
                        format!("{}/{}", envelope.topic, envelope.kind),
                        &object,
                    )));
                }
                let message = match envelope.kind.as_str() {
                    "comment_created" => {
                        CommentMessage::CommentCreated(serde_json::from_value(envelope.payload)?)
                    }
                    "comment_removed" => {
                        CommentMessage::CommentRemoved(serde_json::from_value(envelope.payload)?)
                    }
                    "reaction_created" => {
                        CommentMessage::ReactionCreated(serde_json::from_value(envelope.payload)?)
                    }
                    "reaction_removed" => {
                        CommentMessage::ReactionRemoved(serde_json::from_value(envelope.payload)?)
                    }
                    other => CommentMessage::Unknown(unknown(format!("{TOPIC}/{other}"), &object)),
                };
                Ok(message)
            })
            .collect()
    }
}

/// Stream comment activity under the given parent entities.
pub async fn connect_comments<C: Connector>(
    connector: C,
    entity_type: CommentEntityType,
    entity_ids: impl IntoIterator<Item = i64>,
    config: StreamConfig,
) -> Result<CommentsClient> {
    ChannelClient::connect(connector, CommentsChannel::new(entity_type), entity_ids, config).await
}
