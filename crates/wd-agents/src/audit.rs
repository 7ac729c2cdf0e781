//! Append-only audit trail of processed requests.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use wd_core::types::{ApprovalRequest, ApprovalStatus, Operation};

/// Error recorded for a request whose flow ended without committing.
pub const ABORTED: &str = "request aborted before completion";

// ---------------------------------------------------------------------------
// AuditOutcome / AuditEntry
// ---------------------------------------------------------------------------

/// How a request ended. A success carries the execution result, an error
/// carries the failure; never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AuditOutcome {
    Success(String),
    Denied,
    Timeout,
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    pub required_approval: bool,
    pub request_id: Option<String>,
    pub approval_status: Option<ApprovalStatus>,
    pub approved_by: Option<String>,
    pub outcome: AuditOutcome,
}

impl AuditEntry {
    pub fn record(&self) -> AuditRecord {
        let (result, error) = match &self.outcome {
            AuditOutcome::Success(result) => (Some(result.clone()), None),
            AuditOutcome::Denied => (Some("Denied".to_string()), None),
            AuditOutcome::Timeout => (Some("Timeout".to_string()), None),
            AuditOutcome::Error(e) => (None, Some(e.clone())),
        };
        AuditRecord {
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            operation: self.operation.kind.to_string(),
            path: self.operation.path.clone(),
            destination: self.operation.destination.clone(),
            required_approval: self.required_approval,
            approval_status: self.approval_status.map(|s| s.as_str().to_string()),
            approved_by: self.approved_by.clone(),
            result,
            error,
        }
    }
}

/// Flat, query-facing view of an [`AuditEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// ISO-8601, UTC.
    pub timestamp: String,
    pub operation: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    pub required_approval: bool,
    pub approval_status: Option<String>,
    pub approved_by: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

// ===========================================================================
// AuditLog
// ===========================================================================

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl AuditLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start an entry for `operation`. It lands in the log when the draft is
    /// committed, or when it is dropped.
    pub fn open(self: &Arc<Self>, operation: Operation, required_approval: bool) -> AuditDraft {
        AuditDraft {
            log: Arc::clone(self),
            entry: Some(AuditEntry {
                timestamp: Utc::now(),
                operation,
                required_approval,
                request_id: None,
                approval_status: None,
                approved_by: None,
                outcome: AuditOutcome::Error(ABORTED.to_string()),
            }),
        }
    }

    fn append(&self, entry: AuditEntry) {
        debug!(op = %entry.operation.summary(), outcome = ?entry.outcome, "audit entry appended");
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// Records in append order, restricted to `start..=end` when given.
    pub fn entries(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<AuditRecord> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| start.is_none_or(|s| e.timestamp >= s))
            .filter(|e| end.is_none_or(|t| e.timestamp <= t))
            .map(AuditEntry::record)
            .collect()
    }

    pub fn snapshot(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// AuditDraft
// ---------------------------------------------------------------------------

/// An audit entry under construction.
///
/// Committed exactly once. Dropping it uncommitted appends it with
/// [`ABORTED`] as the error.
#[derive(Debug)]
pub struct AuditDraft {
    log: Arc<AuditLog>,
    entry: Option<AuditEntry>,
}

impl AuditDraft {
    pub fn record_approval(&mut self, request: &ApprovalRequest) {
        if let Some(entry) = self.entry.as_mut() {
            entry.request_id = Some(request.id.clone());
            entry.approval_status = Some(request.status);
            entry.approved_by = request.responder.clone();
        }
    }

    /// Request id and status recorded so far, if an approval was sought.
    pub fn approval(&self) -> (Option<String>, Option<ApprovalStatus>) {
        self.entry
            .as_ref()
            .map(|e| (e.request_id.clone(), e.approval_status))
            .unwrap_or((None, None))
    }

    pub fn is_committed(&self) -> bool {
        self.entry.is_none()
    }

    pub fn commit(&mut self, outcome: AuditOutcome) {
        match self.entry.take() {
            Some(mut entry) => {
                entry.outcome = outcome;
                self.log.append(entry);
            }
            None => warn!(outcome = ?outcome, "audit entry already committed"),
        }
    }
}

impl Drop for AuditDraft {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            warn!(op = %entry.operation.summary(), "{ABORTED}");
            self.log.append(entry);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
