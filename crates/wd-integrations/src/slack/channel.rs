use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};
use wd_harness::channel::{
    ChannelConnector, MessageChannel, PostReceipt, PromptPayload, Result,
};
use wd_harness::payload::RawBatch;

use super::SlackClient;

/// One approval cycle's view of a Slack channel.
#[derive(Debug, Clone)]
pub struct SlackChannel {
    client: SlackClient,
    bot_user_id: Option<String>,
}

impl SlackChannel {
    pub fn new(client: SlackClient, bot_user_id: Option<String>) -> Self {
        Self {
            client,
            bot_user_id,
        }
    }
}

#[async_trait]
impl MessageChannel for SlackChannel {
    async fn post(&self, payload: &PromptPayload) -> Result<PostReceipt> {
        let ts = match payload {
            PromptPayload::Blocks {
                blocks,
                fallback_text,
            } => {
                self.client
                    .post_message(json!({ "blocks": blocks, "text": fallback_text }))
                    .await?
            }
            PromptPayload::JsonText(text) => {
                self.client.post_message(json!({ "text": text })).await?
            }
            PromptPayload::PlainText(text) => self.client.post_form_text(text).await?,
        };
        Ok(PostReceipt::now(ts))
    }

    async fn fetch(&self, limit: usize) -> Result<RawBatch> {
        let body = self.client.history(limit).await?;
        Ok(RawBatch::from_json(body))
    }

    fn bot_identity(&self) -> Option<String> {
        self.bot_user_id.clone()
    }
}

/// Opens a [`SlackChannel`], looking up the bot's own user id first.
#[derive(Debug, Clone)]
pub struct SlackConnector {
    client: SlackClient,
    fallback_bot_id: Option<String>,
}

impl SlackConnector {
    pub fn new(client: SlackClient) -> Self {
        Self {
            client,
            fallback_bot_id: None,
        }
    }

    /// Bot id to use when `auth.test` cannot be reached.
    pub fn with_fallback_bot_id(mut self, bot_id: Option<String>) -> Self {
        self.fallback_bot_id = bot_id;
        self
    }
}

#[async_trait]
impl ChannelConnector for SlackConnector {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>> {
        let bot_user_id = match self.client.bot_user_id().await {
            Ok(id) => {
                info!(bot_user_id = %id, channel = self.client.channel(), "connected to Slack");
                Some(id)
            }
            Err(e) => {
                warn!(error = %e, "could not resolve Slack bot identity");
                self.fallback_bot_id.clone()
            }
        };
        Ok(Box::new(SlackChannel::new(self.client.clone(), bot_user_id)))
    }
}
