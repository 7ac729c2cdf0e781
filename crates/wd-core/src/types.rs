use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// The fixed set of filesystem operations an agent may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    List,
    Read,
    Delete,
    Move,
    Write,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::List,
        OperationKind::Read,
        OperationKind::Delete,
        OperationKind::Move,
        OperationKind::Write,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::Read => "read",
            OperationKind::Delete => "delete",
            OperationKind::Move => "move",
            OperationKind::Write => "write",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation kind: {0}")]
pub struct UnknownOperationKind(pub String);

impl FromStr for OperationKind {
    type Err = UnknownOperationKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" | "ls" => Ok(OperationKind::List),
            "read" | "cat" | "show" => Ok(OperationKind::Read),
            "delete" | "rm" | "remove" => Ok(OperationKind::Delete),
            "move" | "mv" | "rename" => Ok(OperationKind::Move),
            "write" | "create" | "overwrite" => Ok(OperationKind::Write),
            other => Err(UnknownOperationKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A structured filesystem operation produced by the intent source.
///
/// Paths are relative to the agent's working directory; scoping is enforced
/// by the executor side, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type", alias = "kind")]
    pub kind: OperationKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl Operation {
    pub fn new(kind: OperationKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
            destination: None,
            content: None,
        }
    }

    pub fn list(path: impl Into<String>) -> Self {
        Self::new(OperationKind::List, path)
    }

    pub fn read(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Read, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(OperationKind::Delete, path)
    }

    pub fn relocate(path: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::new(OperationKind::Move, path)
        }
    }

    pub fn write(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::new(OperationKind::Write, path)
        }
    }

    /// One-line description used in logs and audit records.
    pub fn summary(&self) -> String {
        match &self.destination {
            Some(dest) => format!("{} {} -> {}", self.kind, self.path, dest),
            None => format!("{} {}", self.kind, self.path),
        }
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    High,
}

impl RiskLevel {
    pub fn requires_approval(&self) -> bool {
        matches!(self, RiskLevel::High)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => f.write_str("low"),
            RiskLevel::High => f.write_str("high"),
        }
    }
}

// ---------------------------------------------------------------------------
// ApprovalStatus
// ---------------------------------------------------------------------------

/// Lifecycle of an approval request.
///
/// `Pending` is the only non-terminal state. `Approved`, `Denied` and
/// `Timeout` are mutually exclusive and have no outgoing transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ApprovalRequest
// ---------------------------------------------------------------------------

/// A request for a human decision on one operation.
///
/// `responded_at` is set exactly when `status` is `Approved` or `Denied`;
/// a timed-out request carries neither a responder nor a response time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub operation: Operation,
    pub created_at: DateTime<Utc>,
    pub context: String,
    pub status: ApprovalStatus,
    pub responder: Option<String>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(id: impl Into<String>, operation: Operation, context: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            operation,
            created_at: Utc::now(),
            context: context.into(),
            status: ApprovalStatus::Pending,
            responder: None,
            responded_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
