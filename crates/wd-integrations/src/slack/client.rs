use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value;
use tracing::debug;

use super::{Result, SlackError, DEFAULT_API_BASE};

/// Thin client over the handful of Slack Web API methods approvals need.
#[derive(Debug, Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    token: String,
    channel: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: &str, channel: &str) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(SlackError::MissingToken);
        }
        if channel.trim().is_empty() {
            return Err(SlackError::MissingChannel);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            token: token.to_string(),
            channel: channel.to_string(),
            base_url: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Point at a different API root (a proxy, or a mock server in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// `chat.postMessage` with a JSON body. `channel` is filled in.
    /// Returns the message `ts`.
    pub async fn post_message(&self, mut body: Value) -> Result<Option<String>> {
        body["channel"] = Value::String(self.channel.clone());
        let req = self.http.post(self.url("chat.postMessage")).json(&body);
        let resp = self.send("chat.postMessage", req).await?;
        Ok(resp.get("ts").and_then(Value::as_str).map(str::to_string))
    }

    /// `chat.postMessage` as a form post, for the plainest encoding.
    pub async fn post_form_text(&self, text: &str) -> Result<Option<String>> {
        let req = self
            .http
            .post(self.url("chat.postMessage"))
            .form(&[("channel", self.channel.as_str()), ("text", text)]);
        let resp = self.send("chat.postMessage", req).await?;
        Ok(resp.get("ts").and_then(Value::as_str).map(str::to_string))
    }

    /// `conversations.history`, newest first. The whole response body is
    /// returned; its `messages` array is what callers want.
    pub async fn history(&self, limit: usize) -> Result<Value> {
        let req = self.http.get(self.url("conversations.history")).query(&[
            ("channel", self.channel.clone()),
            ("limit", limit.to_string()),
        ]);
        self.send("conversations.history", req).await
    }

    /// `auth.test`: the user id this token posts as.
    pub async fn bot_user_id(&self) -> Result<String> {
        let req = self.http.post(self.url("auth.test"));
        let resp = self.send("auth.test", req).await?;
        resp.get("user_id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SlackError::Api("auth.test response has no user_id".into()))
    }

    async fn send(&self, method: &str, req: RequestBuilder) -> Result<Value> {
        let resp = req.bearer_auth(&self.token).send().await?;
        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        debug!(method, status = status.as_u16(), "slack response");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SlackError::RateLimited { retry_after });
        }

        let body: Value = resp.error_for_status()?.json().await?;
        if body.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(body);
        }
        match body.get("error").and_then(Value::as_str) {
            Some("ratelimited") | Some("rate_limited") => Err(SlackError::RateLimited { retry_after }),
            Some(error) => Err(SlackError::Api(error.to_string())),
            None => Err(SlackError::Api(format!("{method} returned ok=false"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_credentials_are_rejected() {
        assert!(matches!(SlackClient::new("", "C1"), Err(SlackError::MissingToken)));
        assert!(matches!(SlackClient::new("xoxb-1", " "), Err(SlackError::MissingChannel)));
    }

    #[test]
    fn base_url_is_normalised() {
        let client = SlackClient::new("xoxb-1", "C1")
            .unwrap()
            .with_base_url("http://127.0.0.1:9/api/");
        assert_eq!(client.url("auth.test"), "http://127.0.0.1:9/api/auth.test");
        assert_eq!(client.channel(), "C1");
    }
}
