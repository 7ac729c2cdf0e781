//! Slack Web API transport for approval prompts and replies.

pub mod channel;
pub mod client;

use std::time::Duration;

use thiserror::Error;
use wd_harness::channel::ChannelError;

pub use channel::{SlackChannel, SlackConnector};
pub use client::SlackClient;

pub const DEFAULT_API_BASE: &str = "https://slack.com/api";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SlackError {
    #[error("missing Slack bot token")]
    MissingToken,

    #[error("missing Slack channel id")]
    MissingChannel,

    /// HTTP 429, or `{"ok": false, "error": "ratelimited"}`.
    #[error("Slack rate limited{}", retry_hint(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    /// `{"ok": false, "error": ..}` for anything other than rate limiting.
    #[error("Slack API error: {0}")]
    Api(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, SlackError>;

fn retry_hint(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {}s", d.as_secs()))
        .unwrap_or_default()
}

impl From<SlackError> for ChannelError {
    fn from(err: SlackError) -> Self {
        let message = err.to_string();
        match err {
            SlackError::RateLimited { retry_after } => ChannelError::RateLimited {
                message,
                retry_after,
            },
            SlackError::Http(_) => ChannelError::Transport(message),
            _ => ChannelError::Rejected(message),
        }
    }
}
