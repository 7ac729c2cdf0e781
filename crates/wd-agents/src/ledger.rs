use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wd_core::types::{ApprovalRequest, ApprovalStatus, Operation};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

/// A reviewer's answer to a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Deny,
}

impl Decision {
    pub fn status(self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Deny => ApprovalStatus::Denied,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Approve => f.write_str("approve"),
            Decision::Deny => f.write_str("deny"),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("approval request not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

// ---------------------------------------------------------------------------
// ApprovalLedger
// ---------------------------------------------------------------------------

type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// In-memory registry of approval requests, keyed by short request id.
///
/// The ledger owns every state transition. `Pending` may move to exactly one
/// of `Approved`, `Denied` or `Timeout`; once there, further resolutions are
/// logged and ignored. Each request id is its own map entry, so concurrent
/// requests never contend on each other's state.
pub struct ApprovalLedger {
    requests: DashMap<String, ApprovalRequest>,
    next_id: IdGenerator,
}

impl ApprovalLedger {
    pub fn new() -> Self {
        Self {
            requests: DashMap::new(),
            next_id: Arc::new(short_id),
        }
    }

    /// Ledger drawing ids from `generator` instead of random UUIDs.
    pub fn with_id_generator<F>(generator: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        Self {
            requests: DashMap::new(),
            next_id: Arc::new(generator),
        }
    }

    /// Register a new `Pending` request and return a snapshot of it.
    pub fn create(&self, operation: Operation, context: impl Into<String>) -> ApprovalRequest {
        let context = context.into();
        loop {
            let id = (self.next_id)();
            match self.requests.entry(id.clone()) {
                Entry::Occupied(_) => {
                    debug!(request_id = %id, "approval id collision, regenerating");
                }
                Entry::Vacant(slot) => {
                    let request = ApprovalRequest::new(id, operation, context);
                    info!(request_id = %request.id, op = %request.operation.summary(), "approval request created");
                    slot.insert(request.clone());
                    return request;
                }
            }
        }
    }

    /// Record a reviewer's decision.
    ///
    /// A request that is already terminal is returned unchanged.
    pub fn resolve(&self, id: &str, decision: Decision, responder: &str) -> Result<ApprovalRequest> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let request = entry.value_mut();

        if request.is_terminal() {
            warn!(
                request_id = %id,
                status = %request.status,
                attempted = %decision,
                "ignoring resolution of a terminal request"
            );
            return Ok(request.clone());
        }

        request.status = decision.status();
        request.responder = Some(responder.to_string());
        request.responded_at = Some(Utc::now());
        info!(request_id = %id, status = %request.status, responder, "approval resolved");
        Ok(request.clone())
    }

    /// Time the request out. No responder or response time is recorded.
    pub fn expire(&self, id: &str) -> Result<ApprovalRequest> {
        let mut entry = self
            .requests
            .get_mut(id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        let request = entry.value_mut();

        if request.is_terminal() {
            warn!(request_id = %id, status = %request.status, "ignoring timeout of a terminal request");
            return Ok(request.clone());
        }

        request.status = ApprovalStatus::Timeout;
        info!(request_id = %id, "approval timed out");
        Ok(request.clone())
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.requests.get(id).map(|r| r.value().clone())
    }

    /// Snapshot of every request still awaiting a decision.
    pub fn pending(&self) -> Vec<ApprovalRequest> {
        self.requests
            .iter()
            .filter(|r| !r.is_terminal())
            .map(|r| r.value().clone())
            .collect()
    }

    /// Drop a request that was never shown to a reviewer.
    pub fn discard(&self, id: &str) -> Option<ApprovalRequest> {
        self.requests.remove(id).map(|(_, request)| request)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl Default for ApprovalLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ApprovalLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovalLedger")
            .field("requests", &self.requests.len())
            .finish()
    }
}

/// Eight lowercase hex characters: short enough to type in a reply.
fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn create_is_pending_with_short_id() {
        let ledger = ApprovalLedger::new();
        let req = ledger.create(Operation::delete("a.txt"), "ctx");
        assert_eq!(req.status, ApprovalStatus::Pending);
        assert_eq!(req.id.len(), 8);
        assert!(req.id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ledger.pending().len(), 1);
    }

    #[test]
    fn approve_sets_responder_and_time() {
        let ledger = ApprovalLedger::new();
        let id = ledger.create(Operation::delete("a.txt"), "ctx").id;

        let req = ledger.resolve(&id, Decision::Approve, "alice").unwrap();
        assert_eq!(req.status, ApprovalStatus::Approved);
        assert_eq!(req.responder.as_deref(), Some("alice"));
        assert!(req.responded_at.is_some());
        assert!(ledger.pending().is_empty());
    }

    #[test]
    fn terminal_status_is_sticky() {
        let ledger = ApprovalLedger::new();
        let id = ledger.create(Operation::delete("a.txt"), "ctx").id;

        let denied = ledger.resolve(&id, Decision::Deny, "bob").unwrap();
        let again = ledger.resolve(&id, Decision::Approve, "mallory").unwrap();
        assert_eq!(again.status, ApprovalStatus::Denied);
        assert_eq!(again.responder.as_deref(), Some("bob"));
        assert_eq!(again.responded_at, denied.responded_at);

        let expired = ledger.expire(&id).unwrap();
        assert_eq!(expired.status, ApprovalStatus::Denied);
    }

    #[test]
    fn timeout_has_no_responder_or_response_time() {
        let ledger = ApprovalLedger::new();
        let id = ledger.create(Operation::write("a.txt", "x"), "ctx").id;

        let req = ledger.expire(&id).unwrap();
        assert_eq!(req.status, ApprovalStatus::Timeout);
        assert!(req.responder.is_none());
        assert!(req.responded_at.is_none());

        let late = ledger.resolve(&id, Decision::Approve, "alice").unwrap();
        assert_eq!(late.status, ApprovalStatus::Timeout);
    }

    #[test]
    fn colliding_ids_are_regenerated() {
        let calls = AtomicUsize::new(0);
        let ledger = ApprovalLedger::with_id_generator(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { "ab12cd34".into() } else { "ef56ab78".into() }
        });
        let first = ledger.create(Operation::delete("a"), "ctx");
        let second = ledger.create(Operation::delete("b"), "ctx");
        assert_eq!(first.id, "ab12cd34");
        assert_eq!(second.id, "ef56ab78");
    }

    #[test]
    fn unknown_id_is_an_error() {
        let ledger = ApprovalLedger::new();
        assert_eq!(
            ledger.resolve("nope", Decision::Approve, "x").unwrap_err(),
            LedgerError::NotFound("nope".into())
        );
        assert!(ledger.expire("nope").is_err());
    }

    #[test]
    fn discard_removes_the_entry() {
        let ledger = ApprovalLedger::new();
        let id = ledger.create(Operation::delete("a"), "ctx").id;
        assert!(ledger.discard(&id).is_some());
        assert!(ledger.get(&id).is_none());
        assert!(ledger.is_empty());
    }
}
