//! Normalisation of whatever the approval channel hands back.
//!
//! Channel transports are inconsistent about message shape: some return a
//! CSV table with a header row, some a JSON list of message records, some a
//! single opaque text blob. [`RawBatch`] captures that as a tagged union at the
//! transport boundary, and [`RawBatch::normalize`] flattens it into
//! [`ChannelMessage`]s before any matching logic sees it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

// ---------------------------------------------------------------------------
// RawBatch
// ---------------------------------------------------------------------------

/// One fetch worth of messages, in the shape the transport produced.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBatch {
    /// Delimited text with a header row: `UserID,UserName,Text,Time,Channel`.
    Table(String),
    /// Structured records with `user`, `username`, `text`, `ts` fields.
    Records(Vec<Value>),
    /// Anything else, treated as a single message.
    Blob(String),
}

impl RawBatch {
    /// Classify an untyped string payload.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return RawBatch::Records(Vec::new());
        }
        if looks_like_table(trimmed) {
            return RawBatch::Table(trimmed.to_string());
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value @ (Value::Array(_) | Value::Object(_))) => Self::from_json(value),
            _ => RawBatch::Blob(trimmed.to_string()),
        }
    }

    /// Classify a JSON payload.
    ///
    /// Accepts a bare array of records, an object with a `messages` array, a
    /// tool-style result whose `content` is a list of `{ "text": .. }` parts,
    /// or a JSON string (re-classified as text).
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Array(items) => {
                if let Some(text) = text_parts(&items) {
                    return Self::from_text(&text);
                }
                RawBatch::Records(items)
            }
            Value::Object(mut map) => {
                if let Some(Value::Array(items)) = map.remove("messages") {
                    return RawBatch::Records(items);
                }
                if let Some(Value::Array(parts)) = map.get("content") {
                    if let Some(text) = text_parts(parts) {
                        return Self::from_text(&text);
                    }
                }
                // A single record on its own.
                RawBatch::Records(vec![Value::Object(map)])
            }
            Value::String(s) => Self::from_text(&s),
            other => RawBatch::Blob(other.to_string()),
        }
    }

    /// Flatten into uniform messages, preserving transport order.
    pub fn normalize(&self) -> Vec<ChannelMessage> {
        match self {
            RawBatch::Table(text) => parse_table(text),
            RawBatch::Records(records) => records.iter().filter_map(parse_record).collect(),
            RawBatch::Blob(text) => vec![ChannelMessage {
                id: digest_id(&["blob", text.as_str()]),
                author_id: String::new(),
                author_name: String::new(),
                text: text.clone(),
                raw_timestamp: String::new(),
                action_value: None,
            }],
        }
    }
}

fn looks_like_table(text: &str) -> bool {
    text.lines()
        .next()
        .map(|header| header.contains("UserID") && header.contains("UserName"))
        .unwrap_or(false)
}

/// Join `[{ "type": "text", "text": ".." }, ..]` parts, if that is what `items` is.
fn text_parts(items: &[Value]) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let parts: Option<Vec<&str>> = items
        .iter()
        .map(|item| match (item.get("type"), item.get("text")) {
            (Some(Value::String(kind)), Some(Value::String(text))) if kind == "text" => {
                Some(text.as_str())
            }
            _ => None,
        })
        .collect();
    parts.map(|p| p.join("\n"))
}

// ---------------------------------------------------------------------------
// ChannelMessage
// ---------------------------------------------------------------------------

/// A channel message after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Stable identifier used for de-duplication across polls.
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    /// Timestamp exactly as the transport reported it.
    pub raw_timestamp: String,
    /// Interactive payload (button value, callback id) if the message has one.
    pub action_value: Option<String>,
}

impl ChannelMessage {
    /// Best human-facing identity for the author.
    pub fn author(&self) -> &str {
        if !self.author_name.is_empty() {
            &self.author_name
        } else if !self.author_id.is_empty() {
            &self.author_id
        } else {
            "unknown"
        }
    }

    /// Parse `raw_timestamp` as epoch seconds (`"1712345678.000200"`),
    /// RFC 3339, or `YYYY-MM-DD HH:MM:SS` (UTC).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.raw_timestamp.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(epoch) = raw.parse::<f64>() {
            let secs = epoch.trunc() as i64;
            let nanos = ((epoch.fract()) * 1e9).round() as u32;
            return DateTime::from_timestamp(secs, nanos.min(999_999_999));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

// ---------------------------------------------------------------------------
// Table rows
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(rename = "MsgID", default)]
    msg_id: String,
    #[serde(rename = "UserID", default)]
    user_id: String,
    #[serde(rename = "UserName", default)]
    user_name: String,
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "Time", default)]
    time: String,
}

fn parse_table(text: &str) -> Vec<ChannelMessage> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(text.as_bytes());

    let mut messages = Vec::new();
    for (line, row) in reader.deserialize::<TableRow>().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!(line, error = %e, "skipping malformed table row");
                continue;
            }
        };
        let id = if !row.msg_id.is_empty() {
            row.msg_id.clone()
        } else if !row.time.is_empty() {
            row.time.clone()
        } else {
            digest_id(&["row", row.user_id.as_str(), row.text.as_str()])
        };
        messages.push(ChannelMessage {
            id,
            author_id: row.user_id,
            author_name: row.user_name,
            text: row.text,
            raw_timestamp: row.time,
            action_value: None,
        });
    }
    messages
}

// ---------------------------------------------------------------------------
// Structured records
// ---------------------------------------------------------------------------

fn parse_record(record: &Value) -> Option<ChannelMessage> {
    let map = match record {
        Value::Object(map) => map,
        Value::String(text) => {
            return Some(ChannelMessage {
                id: digest_id(&["text", text.as_str()]),
                author_id: String::new(),
                author_name: String::new(),
                text: text.clone(),
                raw_timestamp: String::new(),
                action_value: None,
            })
        }
        _ => return None,
    };

    let field = |key: &str| -> String {
        match map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    };

    let mut author_id = field("user");
    if author_id.is_empty() {
        author_id = field("bot_id");
    }
    let mut author_name = field("username");
    if author_name.is_empty() {
        author_name = map
            .get("user_profile")
            .and_then(|p| p.get("display_name").or_else(|| p.get("real_name")))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
    }
    let text = field("text");
    let raw_timestamp = field("ts");

    let id = ["client_msg_id", "ts", "id"]
        .iter()
        .map(|k| field(k))
        .find(|v| !v.is_empty())
        .unwrap_or_else(|| digest_id(&["record", author_id.as_str(), text.as_str()]));

    Some(ChannelMessage {
        id,
        author_id,
        author_name,
        text,
        raw_timestamp,
        action_value: action_value(map),
    })
}

fn action_value(map: &serde_json::Map<String, Value>) -> Option<String> {
    if let Some(Value::String(v)) = map.get("value") {
        return Some(v.clone());
    }
    let from_actions = map
        .get("actions")
        .and_then(Value::as_array)
        .and_then(|actions| {
            actions
                .iter()
                .find_map(|a| a.get("value").and_then(Value::as_str))
        });
    if let Some(v) = from_actions {
        return Some(v.to_string());
    }
    map.get("attachments")
        .and_then(Value::as_array)
        .and_then(|attachments| {
            attachments
                .iter()
                .find_map(|a| a.get("callback_id").and_then(Value::as_str))
        })
        .map(str::to_string)
}

fn digest_id(parts: &[&str]) -> String {
    let mut hasher = DefaultHasher::new();
    parts.hash(&mut hasher);
    format!("digest:{:016x}", hasher.finish())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
