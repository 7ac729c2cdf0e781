use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::payload::RawBatch;
use crate::retry::parse_retry_after;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a message channel transport.
///
/// Polling treats every variant as transient; only posting gives up, and only
/// after every prompt encoding has been rejected.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    /// The transport asked us to slow down.
    ///
    /// `retry_after` is set when the transport exposed a structured hint
    /// (e.g. an HTTP `Retry-After` header); otherwise the hint is parsed out
    /// of `message` by [`ChannelError::retry_after_hint`].
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    /// Network or process-level failure talking to the channel.
    #[error("transport error: {0}")]
    Transport(String),
    /// The channel understood the request and refused it (bad payload,
    /// unknown channel, missing scope).
    #[error("rejected by channel: {0}")]
    Rejected(String),
}

impl ChannelError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ChannelError::RateLimited { .. } => true,
            other => other.to_string().to_ascii_lowercase().contains("rate limit"),
        }
    }

    /// Retry hint: the structured one if present, else whatever can be
    /// parsed from the message text.
    pub fn retry_after_hint(&self) -> Option<Duration> {
        match self {
            ChannelError::RateLimited {
                retry_after: Some(d),
                ..
            } => Some(*d),
            other => parse_retry_after(&other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;

// ---------------------------------------------------------------------------
// PromptPayload
// ---------------------------------------------------------------------------

/// One encoding of an approval prompt.
///
/// Channels differ in what they accept, so the coordinator renders the same
/// prompt several ways and tries them from richest to plainest.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPayload {
    /// Rich layout blocks (with interactive buttons) plus a fallback line.
    Blocks { blocks: Value, fallback_text: String },
    /// The plain prompt wrapped as a JSON `{ "text": .. }` body.
    JsonText(String),
    /// The plain prompt as-is.
    PlainText(String),
}

impl PromptPayload {
    pub fn encoding(&self) -> &'static str {
        match self {
            PromptPayload::Blocks { .. } => "blocks",
            PromptPayload::JsonText(_) => "json_text",
            PromptPayload::PlainText(_) => "plain_text",
        }
    }

    /// Human-readable text of the payload.
    pub fn text(&self) -> &str {
        match self {
            PromptPayload::Blocks { fallback_text, .. } => fallback_text,
            PromptPayload::JsonText(text) | PromptPayload::PlainText(text) => text,
        }
    }
}

/// Acknowledgement of a successful post.
#[derive(Debug, Clone)]
pub struct PostReceipt {
    /// Transport id of the posted message, when the channel returns one.
    pub message_id: Option<String>,
    pub posted_at: DateTime<Utc>,
}

impl PostReceipt {
    pub fn now(message_id: Option<String>) -> Self {
        Self {
            message_id,
            posted_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// MessageChannel / ChannelConnector
// ---------------------------------------------------------------------------

/// A human-facing messaging surface: post a prompt, read recent messages.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    async fn post(&self, payload: &PromptPayload) -> Result<PostReceipt>;

    /// Fetch up to `limit` recent messages, in whatever shape the transport
    /// produces.
    async fn fetch(&self, limit: usize) -> Result<RawBatch>;

    /// User id the channel posts as, if the transport knows it.
    fn bot_identity(&self) -> Option<String> {
        None
    }

    /// Release the underlying connection.
    async fn close(&self) {}
}

/// Opens a fresh [`MessageChannel`] for the span of one approval.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn MessageChannel>>;
}
