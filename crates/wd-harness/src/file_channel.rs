//! A local, file-backed message channel.
//!
//! Prompts are appended to an outbox file; replies are read from an inbox
//! file that a human (or a test) edits. The inbox may hold a CSV table, a
//! JSON message list, or plain text; it is classified the same way a remote
//! transport's payload would be.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::channel::{
    ChannelConnector, ChannelError, MessageChannel, PostReceipt, PromptPayload, Result,
};
use crate::payload::RawBatch;

#[derive(Debug, Clone)]
pub struct FileChannel {
    inbox: PathBuf,
    outbox: PathBuf,
    identity: Option<String>,
}

impl FileChannel {
    pub fn new(inbox: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            outbox: outbox.into(),
            identity: None,
        }
    }

    /// User id the prompts are attributed to in the outbox.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

#[async_trait]
impl MessageChannel for FileChannel {
    async fn post(&self, payload: &PromptPayload) -> Result<PostReceipt> {
        if let Some(parent) = self.outbox.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ChannelError::Transport(e.to_string()))?;
        }
        let body = match payload {
            PromptPayload::Blocks { blocks, fallback_text } => {
                format!("{fallback_text}\n{blocks}")
            }
            PromptPayload::JsonText(text) => serde_json::json!({ "text": text }).to_string(),
            PromptPayload::PlainText(text) => text.clone(),
        };
        let posted_at = Utc::now();
        let entry = format!(
            "--- {} [{}] {}\n{}\n",
            posted_at.to_rfc3339(),
            payload.encoding(),
            self.identity.as_deref().unwrap_or("warden"),
            body
        );

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.outbox)
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        file.write_all(entry.as_bytes())
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ChannelError::Transport(e.to_string()))?;

        debug!(outbox = %self.outbox.display(), encoding = payload.encoding(), "prompt written");
        Ok(PostReceipt {
            message_id: None,
            posted_at,
        })
    }

    /// The whole inbox is returned each time; `limit` does not apply.
    async fn fetch(&self, _limit: usize) -> Result<RawBatch> {
        match tokio::fs::read_to_string(&self.inbox).await {
            Ok(text) => Ok(RawBatch::from_text(&text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RawBatch::Records(Vec::new())),
            Err(e) => Err(ChannelError::Transport(e.to_string())),
        }
    }

    fn bot_identity(&self) -> Option<String> {
        self.identity.clone()
    }
}

/// Hands out [`FileChannel`]s over the same inbox/outbox pair.
#[derive(Debug, Clone)]
pub struct FileConnector {
    channel: FileChannel,
}

impl FileConnector {
    pub fn new(channel: FileChannel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl ChannelConnector for FileConnector {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>> {
        Ok(Box::new(self.channel.clone()))
    }
}
