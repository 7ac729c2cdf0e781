//! Approval coordination: post the prompt, then wait for a human answer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{info, warn};
use wd_core::config::{ApprovalConfig, MAX_TIMEOUT_MINUTES};
use wd_core::types::{ApprovalRequest, Operation};
use wd_harness::channel::{ChannelConnector, ChannelError, MessageChannel, PostReceipt, PromptPayload};
use wd_harness::retry::rate_limit_backoff;

use crate::ledger::{ApprovalLedger, LedgerError};
use crate::poller::{ChannelPoller, PollerConfig, SelfFilter};

/// Heading of every prompt; never appears in a human reply.
pub const PROMPT_HEADER: &str = "Agent Approval Request";
/// Lead-in of the reply instructions.
pub const REPLY_HINT: &str = "To approve, reply:";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The prompt could not be delivered in any encoding; nothing was polled.
    #[error("approval channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

// ---------------------------------------------------------------------------
// Approver
// ---------------------------------------------------------------------------

/// Obtains a human decision for an operation.
///
/// The returned request is always terminal: approved, denied or timed out.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn request_approval(&self, operation: &Operation, context: &str) -> Result<ApprovalRequest>;
}

// ---------------------------------------------------------------------------
// ApprovalPrompt
// ---------------------------------------------------------------------------

/// The message a reviewer sees, rendered in each supported encoding.
#[derive(Debug, Clone)]
pub struct ApprovalPrompt {
    pub request_id: String,
    pub operation: Operation,
    pub context: String,
    pub timeout: Duration,
}

impl ApprovalPrompt {
    pub fn new(request: &ApprovalRequest, timeout: Duration) -> Self {
        Self {
            request_id: request.id.clone(),
            operation: request.operation.clone(),
            context: request.context.clone(),
            timeout,
        }
    }

    fn timeout_minutes(&self) -> u64 {
        self.timeout.as_secs().div_ceil(60).max(1)
    }

    /// One-line fallback used by clients that cannot render blocks.
    pub fn summary(&self) -> String {
        format!(
            "{PROMPT_HEADER} {}: {} operation",
            self.request_id, self.operation.kind
        )
    }

    pub fn blocks(&self) -> Value {
        let id = &self.request_id;
        let mut fields = vec![
            json!({"type": "mrkdwn", "text": format!("*Operation:* `{}`", self.operation.kind)}),
            json!({"type": "mrkdwn", "text": format!("*Target:* `{}`", self.operation.path)}),
        ];
        if let Some(dest) = &self.operation.destination {
            fields.push(json!({"type": "mrkdwn", "text": format!("*Destination:* `{dest}`")}));
        }

        json!([
            {
                "type": "header",
                "text": {"type": "plain_text", "text": PROMPT_HEADER}
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Request ID:* `{id}`\n*Context:* {}", self.context)
                }
            },
            {
                "type": "section",
                "fields": fields
            },
            {
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!(
                        "*Timeout:* {} minutes\n\n{REPLY_HINT} `approve {id}`\nTo deny, reply: `deny {id}`",
                        self.timeout_minutes()
                    )
                }
            },
            {
                "type": "actions",
                "elements": [
                    {
                        "type": "button",
                        "text": {"type": "plain_text", "text": "Approve"},
                        "style": "primary",
                        "value": format!("approve_{id}")
                    },
                    {
                        "type": "button",
                        "text": {"type": "plain_text", "text": "Deny"},
                        "style": "danger",
                        "value": format!("deny_{id}")
                    }
                ]
            }
        ])
    }

    pub fn plain_text(&self) -> String {
        let id = &self.request_id;
        let mut text = format!(
            "{PROMPT_HEADER}\n\nRequest ID: {id}\nContext: {}\n\nOperation: {}\nTarget: {}\n",
            self.context, self.operation.kind, self.operation.path
        );
        if let Some(dest) = &self.operation.destination {
            text.push_str(&format!("Destination: {dest}\n"));
        }
        text.push_str(&format!(
            "Timeout: {} minutes\n\n{REPLY_HINT} approve {id}\nTo deny, reply: deny {id}",
            self.timeout_minutes()
        ));
        text
    }

    /// Encodings to try, richest first.
    pub fn payloads(&self) -> Vec<PromptPayload> {
        let text = self.plain_text();
        vec![
            PromptPayload::Blocks {
                blocks: self.blocks(),
                fallback_text: self.summary(),
            },
            PromptPayload::JsonText(text.clone()),
            PromptPayload::PlainText(text),
        ]
    }
}

// ===========================================================================
// ApprovalCoordinator
// ===========================================================================

/// Runs one approval cycle per call over a fresh channel connection.
pub struct ApprovalCoordinator {
    connector: Arc<dyn ChannelConnector>,
    ledger: Arc<ApprovalLedger>,
    timeout: Duration,
    poller: PollerConfig,
    bot_user_id: Option<String>,
    name_markers: Vec<String>,
}

impl ApprovalCoordinator {
    pub fn new(connector: Arc<dyn ChannelConnector>, ledger: Arc<ApprovalLedger>) -> Self {
        Self {
            connector,
            ledger,
            timeout: Duration::from_secs(5 * 60),
            poller: PollerConfig::default(),
            bot_user_id: None,
            name_markers: vec!["bot".into(), "app".into()],
        }
    }

    pub fn from_config(
        connector: Arc<dyn ChannelConnector>,
        ledger: Arc<ApprovalLedger>,
        cfg: &ApprovalConfig,
    ) -> Self {
        Self::new(connector, ledger)
            .with_timeout(Duration::from_secs(cfg.timeout_minutes.saturating_mul(60)))
            .with_poller_config(PollerConfig::from(cfg))
            .with_bot_user_id(cfg.bot_user_id.clone())
            .with_name_markers(cfg.bot_name_markers.clone())
    }

    /// Capped at [`MAX_TIMEOUT_MINUTES`].
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(Duration::from_secs(MAX_TIMEOUT_MINUTES * 60));
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn with_poller_config(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    /// Bot user id to use when the channel cannot report its own.
    pub fn with_bot_user_id(mut self, bot_user_id: Option<String>) -> Self {
        self.bot_user_id = bot_user_id;
        self
    }

    pub fn with_name_markers(mut self, markers: Vec<String>) -> Self {
        self.name_markers = markers;
        self
    }

    pub fn ledger(&self) -> &Arc<ApprovalLedger> {
        &self.ledger
    }

    /// Try each encoding in turn; the last error is kept for the report.
    async fn post_prompt(
        &self,
        channel: &dyn MessageChannel,
        prompt: &ApprovalPrompt,
    ) -> std::result::Result<PostReceipt, ChannelError> {
        let mut last_error = ChannelError::Rejected("no prompt encodings".into());
        for payload in prompt.payloads() {
            match channel.post(&payload).await {
                Ok(receipt) => {
                    info!(request_id = %prompt.request_id, encoding = payload.encoding(), "approval prompt posted");
                    return Ok(receipt);
                }
                Err(e) => {
                    warn!(
                        request_id = %prompt.request_id,
                        encoding = payload.encoding(),
                        error = %e,
                        "prompt encoding rejected, trying next"
                    );
                    if e.is_rate_limited() {
                        let backoff =
                            rate_limit_backoff(e.retry_after_hint(), self.poller.rate_limit_ceiling);
                        tokio::time::sleep(backoff).await;
                    }
                    last_error = e;
                }
            }
        }
        Err(last_error)
    }

    async fn run_cycle(
        &self,
        channel: &dyn MessageChannel,
        request: &ApprovalRequest,
        deadline: Instant,
    ) -> Result<ApprovalRequest> {
        let prompt = ApprovalPrompt::new(request, self.timeout);
        let receipt = match self.post_prompt(channel, &prompt).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.ledger.discard(&request.id);
                return Err(CoordinatorError::ChannelUnavailable(e.to_string()));
            }
        };

        let filter = SelfFilter::new()
            .with_bot_id(channel.bot_identity().or_else(|| self.bot_user_id.clone()))
            .with_name_markers(&self.name_markers)
            .with_prompt_markers([PROMPT_HEADER, REPLY_HINT])
            .with_echo_window(self.poller.echo_window)
            .with_posted_at(receipt.posted_at);

        let mut poller = ChannelPoller::new(request.id.clone(), filter, self.poller.clone());
        Ok(poller.wait_for_reply(channel, &self.ledger, deadline).await?)
    }
}

#[async_trait]
impl Approver for ApprovalCoordinator {
    async fn request_approval(&self, operation: &Operation, context: &str) -> Result<ApprovalRequest> {
        let request = self.ledger.create(operation.clone(), context);
        let deadline = Instant::now() + self.timeout;

        let channel = match self.connector.connect().await {
            Ok(channel) => channel,
            Err(e) => {
                self.ledger.discard(&request.id);
                return Err(CoordinatorError::ChannelUnavailable(e.to_string()));
            }
        };

        let outcome = self.run_cycle(channel.as_ref(), &request, deadline).await;
        channel.close().await;
        // The caller owns the resolved request from here on.
        self.ledger.discard(&request.id);

        if let Ok(resolved) = &outcome {
            info!(request_id = %resolved.id, status = %resolved.status, "approval cycle finished");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> ApprovalPrompt {
        let request = ApprovalRequest::new(
            "ab12cd34",
            Operation::relocate("a.txt", "b/a.txt"),
            "User requested: \"move a.txt to b/a.txt\"",
        );
        ApprovalPrompt::new(&request, Duration::from_secs(300))
    }

    #[test]
    fn payloads_go_from_rich_to_plain() {
        let encodings: Vec<_> = prompt().payloads().iter().map(|p| p.encoding()).collect();
        assert_eq!(encodings, ["blocks", "json_text", "plain_text"]);
    }

    #[test]
    fn blocks_carry_button_values() {
        let blocks = prompt().blocks();
        let actions = &blocks[4]["elements"];
        assert_eq!(actions[0]["value"], "approve_ab12cd34");
        assert_eq!(actions[1]["value"], "deny_ab12cd34");
        assert_eq!(blocks[0]["text"]["text"], PROMPT_HEADER);
    }

    #[test]
    fn plain_text_has_instructions_and_destination() {
        let text = prompt().plain_text();
        assert!(text.starts_with(PROMPT_HEADER));
        assert!(text.contains("approve ab12cd34"));
        assert!(text.contains("deny ab12cd34"));
        assert!(text.contains("Destination: b/a.txt"));
        assert!(text.contains("Timeout: 5 minutes"));
    }

    #[test]
    fn summary_is_recognisable_as_ours() {
        assert!(prompt().summary().contains(PROMPT_HEADER));
    }
}
