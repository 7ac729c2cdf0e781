//! Discovering a reviewer's reply in an unreliable channel.
//!
//! Every fetch is normalised first, then each message goes through the same
//! pipeline: seen before? skip. Ours? mark seen, skip. A reply to this request?
//! decide. Anything else is marked seen so it is never looked at again.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use wd_core::config::ApprovalConfig;
use wd_core::types::ApprovalRequest;
use wd_harness::channel::MessageChannel;
use wd_harness::payload::{ChannelMessage, RawBatch};
use wd_harness::retry::rate_limit_backoff;

use crate::ledger::{ApprovalLedger, Decision, Result};

// ---------------------------------------------------------------------------
// PollerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between fetches.
    pub check_interval: Duration,
    /// Messages requested per fetch.
    pub fetch_limit: usize,
    /// Messages stamped this close to the prompt are treated as its echo.
    /// `Duration::ZERO` turns the heuristic off.
    pub echo_window: Duration,
    /// Longest backoff taken after a rate-limit response.
    pub rate_limit_ceiling: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(3),
            fetch_limit: 10,
            echo_window: Duration::from_secs(5),
            rate_limit_ceiling: Duration::from_secs(5),
        }
    }
}

impl From<&ApprovalConfig> for PollerConfig {
    fn from(cfg: &ApprovalConfig) -> Self {
        Self {
            check_interval: Duration::from_secs(cfg.check_interval_secs),
            fetch_limit: cfg.fetch_limit,
            echo_window: Duration::from_secs(cfg.echo_window_secs),
            rate_limit_ceiling: Duration::from_secs(cfg.rate_limit_ceiling_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// SelfFilter
// ---------------------------------------------------------------------------

/// Recognises messages that came from us rather than from a reviewer.
#[derive(Debug, Clone, Default)]
pub struct SelfFilter {
    bot_id: Option<String>,
    name_markers: Vec<String>,
    prompt_markers: Vec<String>,
    echo_window: Duration,
    posted_at: Option<DateTime<Utc>>,
}

impl SelfFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bot_id(mut self, bot_id: Option<String>) -> Self {
        self.bot_id = bot_id.filter(|id| !id.is_empty());
        self
    }

    /// Display-name fragments (matched case-insensitively) that mark a bot.
    pub fn with_name_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.name_markers = markers
            .into_iter()
            .map(|m| m.as_ref().to_lowercase())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    /// Literal strings that only ever appear in our own prompt.
    pub fn with_prompt_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prompt_markers = markers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_echo_window(mut self, window: Duration) -> Self {
        self.echo_window = window;
        self
    }

    /// When the prompt went out; anchors the echo window.
    pub fn with_posted_at(mut self, posted_at: DateTime<Utc>) -> Self {
        self.posted_at = Some(posted_at);
        self
    }

    pub fn is_self(&self, msg: &ChannelMessage) -> bool {
        if let Some(bot) = &self.bot_id {
            if msg.author_id == *bot {
                return true;
            }
        }

        let name = msg.author_name.to_lowercase();
        if !name.is_empty() && self.name_markers.iter().any(|m| name.contains(m.as_str())) {
            return true;
        }

        if self.prompt_markers.iter().any(|m| msg.text.contains(m.as_str())) {
            return true;
        }

        self.is_echo(msg)
    }

    fn is_echo(&self, msg: &ChannelMessage) -> bool {
        if self.echo_window.is_zero() {
            return false;
        }
        let (Some(posted_at), Some(stamped)) = (self.posted_at, msg.timestamp()) else {
            return false;
        };
        let Ok(window) = chrono::Duration::from_std(self.echo_window) else {
            return false;
        };
        (stamped - posted_at).abs() <= window
    }
}

// ---------------------------------------------------------------------------
// Reply matching
// ---------------------------------------------------------------------------

/// A message that answers the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_id: String,
    pub author: String,
    pub decision: Decision,
}

/// What a single message means for the request being watched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Unrelated,
    Ambiguous,
    Decided(Decision),
}

fn verdict(msg: &ChannelMessage, request_id: &str) -> Verdict {
    let id = request_id.to_lowercase();

    // Button payloads carry the id and the decision together.
    if let Some(value) = msg.action_value.as_deref() {
        if value.to_lowercase().contains(&id) {
            return match decision_in(value).or_else(|| decision_in(&msg.text)) {
                Some(Some(decision)) => Verdict::Decided(decision),
                _ => Verdict::Ambiguous,
            };
        }
    }

    if !msg.text.to_lowercase().contains(&id) {
        return Verdict::Unrelated;
    }
    match decision_in(&msg.text) {
        None => Verdict::Unrelated,
        Some(None) => Verdict::Ambiguous,
        Some(Some(decision)) => Verdict::Decided(decision),
    }
}

/// `None`: no decision words at all. `Some(None)`: both approve and deny
/// words. `Some(Some(d))`: exactly one kind.
///
/// Words are matched by prefix, so "approved" counts while "disapprove" and
/// "approval" do not.
fn decision_in(text: &str) -> Option<Option<Decision>> {
    let lower = text.to_lowercase();
    let mut approve = false;
    let mut deny = false;
    for word in lower.split(|c: char| !c.is_alphanumeric()) {
        if word.starts_with("approve") {
            approve = true;
        } else if word.starts_with("deny") || word.starts_with("denied") || word.starts_with("reject") {
            deny = true;
        }
    }
    match (approve, deny) {
        (false, false) => None,
        (true, false) => Some(Some(Decision::Approve)),
        (false, true) => Some(Some(Decision::Deny)),
        (true, true) => Some(None),
    }
}

// ===========================================================================
// ChannelPoller
// ===========================================================================

/// Watches a channel for the reply to one request.
///
/// Message ids are remembered for the poller's lifetime; a message is
/// evaluated at most once no matter how many fetches return it.
#[derive(Debug)]
pub struct ChannelPoller {
    request_id: String,
    filter: SelfFilter,
    config: PollerConfig,
    seen: HashSet<String>,
}

impl ChannelPoller {
    pub fn new(request_id: impl Into<String>, filter: SelfFilter, config: PollerConfig) -> Self {
        Self {
            request_id: request_id.into(),
            filter,
            config,
            seen: HashSet::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Single pass over one fetch. Returns the first decisive reply.
    pub fn scan(&mut self, batch: &RawBatch) -> Option<Reply> {
        for msg in batch.normalize() {
            if !self.seen.insert(msg.id.clone()) {
                continue;
            }
            if self.filter.is_self(&msg) {
                debug!(request_id = %self.request_id, message_id = %msg.id, "skipping self-originated message");
                continue;
            }
            match verdict(&msg, &self.request_id) {
                Verdict::Unrelated => {
                    debug!(request_id = %self.request_id, message_id = %msg.id, "message does not answer request");
                }
                Verdict::Ambiguous => {
                    warn!(
                        request_id = %self.request_id,
                        message_id = %msg.id,
                        author = msg.author(),
                        "reply mentions both approval and denial, still pending"
                    );
                }
                Verdict::Decided(decision) => {
                    return Some(Reply {
                        message_id: msg.id.clone(),
                        author: msg.author().to_string(),
                        decision,
                    });
                }
            }
        }
        None
    }

    /// Poll until the request is terminal or `deadline` passes, in which case
    /// the request is expired. The returned request is always terminal.
    pub async fn wait_for_reply(
        &mut self,
        channel: &dyn MessageChannel,
        ledger: &ApprovalLedger,
        deadline: Instant,
    ) -> Result<ApprovalRequest> {
        match tokio::time::timeout_at(deadline, self.poll(channel, ledger)).await {
            Ok(result) => result,
            Err(_) => {
                info!(request_id = %self.request_id, "no reply before deadline");
                ledger.expire(&self.request_id)
            }
        }
    }

    async fn poll(
        &mut self,
        channel: &dyn MessageChannel,
        ledger: &ApprovalLedger,
    ) -> Result<ApprovalRequest> {
        loop {
            // Resolved elsewhere (another poller, an API call).
            if let Some(request) = ledger.get(&self.request_id) {
                if request.is_terminal() {
                    return Ok(request);
                }
            }

            let pause = match channel.fetch(self.config.fetch_limit).await {
                Ok(batch) => {
                    if let Some(reply) = self.scan(&batch) {
                        let request = ledger.resolve(&self.request_id, reply.decision, &reply.author)?;
                        if request.is_terminal() {
                            return Ok(request);
                        }
                    }
                    self.config.check_interval
                }
                Err(e) if e.is_rate_limited() => {
                    let backoff =
                        rate_limit_backoff(e.retry_after_hint(), self.config.rate_limit_ceiling);
                    warn!(request_id = %self.request_id, error = %e, backoff_ms = backoff.as_millis() as u64, "channel rate limited");
                    backoff
                }
                Err(e) => {
                    warn!(request_id = %self.request_id, error = %e, "channel fetch failed, will retry");
                    self.config.check_interval
                }
            };
            tokio::time::sleep(pause).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
