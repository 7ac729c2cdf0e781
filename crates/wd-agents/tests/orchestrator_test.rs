//! End-to-end flows through the orchestrator: classification, approval,
//! execution with quarantine fallback, and the audit trail.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use wd_agents::coordinator::{ApprovalCoordinator, Approver, CoordinatorError};
use wd_agents::ledger::ApprovalLedger;
use wd_agents::orchestrator::{Orchestrator, DENIED_REASON, TIMEOUT_REASON};
use wd_core::types::{ApprovalRequest, ApprovalStatus, Operation, OperationKind};
use wd_harness::channel::{
    ChannelConnector, MessageChannel, PostReceipt, PromptPayload, Result as ChannelResult,
};
use wd_harness::executor::{ExecutionError, ExecutionOutput, Executor, FsExecutor};
use wd_harness::payload::RawBatch;
use wd_harness::security::PathGuard;

// ===========================================================================
// Test doubles
// ===========================================================================

/// Answers every request with a fixed status.
struct StubApprover {
    status: ApprovalStatus,
    calls: AtomicUsize,
    contexts: Mutex<Vec<String>>,
}

impl StubApprover {
    fn new(status: ApprovalStatus) -> Arc<Self> {
        Arc::new(Self {
            status,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Approver for StubApprover {
    async fn request_approval(
        &self,
        operation: &Operation,
        context: &str,
    ) -> Result<ApprovalRequest, CoordinatorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.to_string());
        if self.status == ApprovalStatus::Pending {
            return Err(CoordinatorError::ChannelUnavailable("no route to channel".into()));
        }
        let mut request = ApprovalRequest::new("ab12cd34", operation.clone(), context);
        request.status = self.status;
        if matches!(self.status, ApprovalStatus::Approved | ApprovalStatus::Denied) {
            request.responder = Some("alice".into());
            request.responded_at = Some(Utc::now());
        }
        Ok(request)
    }
}

/// Filesystem executor whose plain deletes always fail.
struct StuckDeletes {
    inner: FsExecutor,
    fail_moves: bool,
}

#[async_trait]
impl Executor for StuckDeletes {
    async fn execute(&self, operation: &Operation) -> Result<ExecutionOutput, ExecutionError> {
        match operation.kind {
            OperationKind::Delete => Err(ExecutionError::Failed("resource busy".into())),
            OperationKind::Move if self.fail_moves => {
                Err(ExecutionError::Failed("quarantine unavailable".into()))
            }
            _ => self.inner.execute(operation).await,
        }
    }
}

struct PanickingExecutor;

#[async_trait]
impl Executor for PanickingExecutor {
    async fn execute(&self, _operation: &Operation) -> Result<ExecutionOutput, ExecutionError> {
        panic!("executor exploded");
    }
}

/// Channel whose only reply is a denial of `ab12cd34`.
struct DenyingChannel;

#[async_trait]
impl MessageChannel for DenyingChannel {
    async fn post(&self, _payload: &PromptPayload) -> ChannelResult<PostReceipt> {
        Ok(PostReceipt::now(None))
    }

    async fn fetch(&self, _limit: usize) -> ChannelResult<RawBatch> {
        Ok(RawBatch::Records(vec![json!({
            "client_msg_id": "r1",
            "user": "U01",
            "username": "carol",
            "text": "deny ab12cd34"
        })]))
    }
}

struct DenyingConnector;

#[async_trait]
impl ChannelConnector for DenyingConnector {
    async fn connect(&self) -> ChannelResult<Box<dyn MessageChannel>> {
        Ok(Box::new(DenyingChannel))
    }
}

fn workspace() -> (tempfile::TempDir, PathGuard) {
    let dir = tempfile::tempdir().unwrap();
    let guard = PathGuard::new(dir.path());
    (dir, guard)
}

fn orchestrator(guard: &PathGuard, approver: Arc<dyn Approver>) -> Orchestrator {
    Orchestrator::builder()
        .approver(approver)
        .executor(Arc::new(FsExecutor::new(guard.clone())))
        .workspace(guard.clone())
        .build()
        .unwrap()
}

// ===========================================================================
// Low-risk
// ===========================================================================

#[tokio::test]
async fn list_runs_without_approval() {
    let (dir, guard) = workspace();
    std::fs::write(dir.path().join("report.txt"), "q1").unwrap();
    let approver = StubApprover::new(ApprovalStatus::Approved);
    let orch = orchestrator(&guard, approver.clone());

    let outcome = orch.process_operation(Operation::list(".")).await;

    assert!(outcome.success, "{outcome:?}");
    assert!(outcome.result.unwrap().contains("report.txt"));
    assert!(!outcome.required_approval);
    assert_eq!(approver.calls(), 0);

    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(!log[0].required_approval);
    assert_eq!(log[0].operation, "list");
    assert!(log[0].approval_status.is_none());
}

#[tokio::test]
async fn read_returns_file_contents() {
    let (dir, guard) = workspace();
    std::fs::write(dir.path().join("notes.txt"), "secret payload").unwrap();
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Approved));

    let outcome = orch.process_request("read notes.txt").await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.result.as_deref(), Some("read notes.txt (14 bytes)"));
    assert_eq!(
        outcome.output,
        Some(ExecutionOutput::Contents {
            path: "notes.txt".into(),
            text: "secret payload".into(),
        })
    );
}

#[tokio::test]
async fn failed_read_is_recorded_as_error() {
    let (_dir, guard) = workspace();
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Approved));

    let outcome = orch.process_operation(Operation::read("missing.txt")).await;

    assert!(!outcome.success);
    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(log[0].result.is_none());
    assert!(log[0].error.as_deref().unwrap().contains("missing.txt"));
}

// ===========================================================================
// High-risk
// ===========================================================================

#[tokio::test(start_paused = true)]
async fn delete_denied_in_channel_is_not_executed() {
    let (dir, guard) = workspace();
    std::fs::write(dir.path().join("old-backup.zip"), "zip").unwrap();
    let ledger = Arc::new(ApprovalLedger::with_id_generator(|| "ab12cd34".to_string()));
    let coordinator = ApprovalCoordinator::new(Arc::new(DenyingConnector), ledger)
        .with_timeout(Duration::from_secs(60));
    let orch = orchestrator(&guard, Arc::new(coordinator));

    let outcome = orch.process_request("delete old-backup.zip").await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some(DENIED_REASON));
    assert_eq!(outcome.approval_status, Some(ApprovalStatus::Denied));
    assert_eq!(outcome.request_id.as_deref(), Some("ab12cd34"));
    assert!(dir.path().join("old-backup.zip").exists());

    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(log[0].required_approval);
    assert_eq!(log[0].approval_status.as_deref(), Some("denied"));
    assert_eq!(log[0].approved_by.as_deref(), Some("carol"));
    assert_eq!(log[0].result.as_deref(), Some("Denied"));
}

#[tokio::test]
async fn approved_write_executes_and_names_approver() {
    let (dir, guard) = workspace();
    let approver = StubApprover::new(ApprovalStatus::Approved);
    let orch = orchestrator(&guard, approver.clone());

    let outcome = orch.process_request("write notes/today.txt: ship it").await;

    assert!(outcome.success, "{outcome:?}");
    assert_eq!(
        std::fs::read_to_string(dir.path().join("notes/today.txt")).unwrap(),
        "ship it"
    );
    let context = approver.contexts.lock().unwrap()[0].clone();
    assert!(context.contains("User requested: \"write notes/today.txt: ship it\""));
    assert!(context.contains("overwrite any existing content"));

    let log = orch.get_audit_log(None, None);
    assert_eq!(log[0].approval_status.as_deref(), Some("approved"));
    assert_eq!(log[0].approved_by.as_deref(), Some("alice"));
}

#[tokio::test]
async fn timeout_is_a_failure() {
    let (dir, guard) = workspace();
    std::fs::write(dir.path().join("a.txt"), "a").unwrap();
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Timeout));

    let outcome = orch
        .process_operation(Operation::relocate("a.txt", "b.txt"))
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some(TIMEOUT_REASON));
    assert!(dir.path().join("a.txt").exists());
    let log = orch.get_audit_log(None, None);
    assert_eq!(log[0].approval_status.as_deref(), Some("timeout"));
    assert_eq!(log[0].result.as_deref(), Some("Timeout"));
    assert!(log[0].approved_by.is_none());
}

#[tokio::test]
async fn unavailable_channel_is_recorded() {
    let (_dir, guard) = workspace();
    // A `Pending` stub stands in for a coordinator that could not post.
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Pending));

    let outcome = orch.process_operation(Operation::delete("a.txt")).await;

    assert!(!outcome.success);
    assert!(outcome.required_approval);
    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(log[0].required_approval);
    assert!(log[0]
        .error
        .as_deref()
        .unwrap()
        .contains("approval channel unavailable"));
}

// ===========================================================================
// Quarantine fallback
// ===========================================================================

#[tokio::test]
async fn failed_delete_is_quarantined() {
    let (dir, guard) = workspace();
    std::fs::create_dir(dir.path().join("backups")).unwrap();
    std::fs::write(dir.path().join("backups/old.zip"), "zip").unwrap();
    let executor = StuckDeletes {
        inner: FsExecutor::new(guard.clone()),
        fail_moves: false,
    };
    let orch = Orchestrator::builder()
        .approver(StubApprover::new(ApprovalStatus::Approved))
        .executor(Arc::new(executor))
        .workspace(guard.clone())
        .quarantine_dir("trash")
        .build()
        .unwrap();

    let outcome = orch.process_operation(Operation::delete("backups/old.zip")).await;

    assert!(outcome.success, "{outcome:?}");
    let result = outcome.result.unwrap();
    assert!(result.contains("moved to quarantine: trash/"), "{result}");
    assert!(result.ends_with("_backups_old.zip"), "{result}");
    assert!(!dir.path().join("backups/old.zip").exists());

    let quarantined: Vec<_> = std::fs::read_dir(dir.path().join("trash"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(quarantined.len(), 1);
    assert!(quarantined[0].ends_with("_backups_old.zip"));
}

#[tokio::test]
async fn failed_quarantine_reports_the_delete_error() {
    let (dir, guard) = workspace();
    std::fs::write(dir.path().join("old.zip"), "zip").unwrap();
    let executor = StuckDeletes {
        inner: FsExecutor::new(guard.clone()),
        fail_moves: true,
    };
    let orch = Orchestrator::builder()
        .approver(StubApprover::new(ApprovalStatus::Approved))
        .executor(Arc::new(executor))
        .workspace(guard)
        .build()
        .unwrap();

    let outcome = orch.process_operation(Operation::delete("old.zip")).await;

    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(error.contains("resource busy"), "{error}");
    assert!(!error.contains("quarantine unavailable"));
}

// ===========================================================================
// Refusals and failures
// ===========================================================================

#[tokio::test]
async fn escaping_path_is_refused_before_approval() {
    let (_dir, guard) = workspace();
    let approver = StubApprover::new(ApprovalStatus::Approved);
    let orch = orchestrator(&guard, approver.clone());

    let outcome = orch.process_operation(Operation::delete("../etc/passwd")).await;

    assert!(!outcome.success);
    assert_eq!(approver.calls(), 0);
    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(log[0].required_approval);
    assert!(log[0].error.as_deref().unwrap().contains("outside the workspace"));
}

#[tokio::test]
async fn unparseable_request_leaves_no_audit_entry() {
    let (_dir, guard) = workspace();
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Approved));

    let outcome = orch.process_request("make me a sandwich").await;

    assert!(!outcome.success);
    assert!(!outcome.required_approval);
    assert!(orch.get_audit_log(None, None).is_empty());
}

#[tokio::test]
async fn panic_in_executor_becomes_a_failed_outcome() {
    let (_dir, guard) = workspace();
    let orch = Orchestrator::builder()
        .approver(StubApprover::new(ApprovalStatus::Approved))
        .executor(Arc::new(PanickingExecutor))
        .workspace(guard)
        .build()
        .unwrap();

    let outcome = orch.process_operation(Operation::list(".")).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().contains("executor exploded"));
    let log = orch.get_audit_log(None, None);
    assert_eq!(log.len(), 1);
    assert!(log[0].error.as_deref().unwrap().contains("executor exploded"));
}

#[tokio::test]
async fn audit_log_filters_by_time() {
    let (_dir, guard) = workspace();
    let orch = orchestrator(&guard, StubApprover::new(ApprovalStatus::Denied));

    let before = Utc::now();
    orch.process_operation(Operation::list(".")).await;
    orch.process_operation(Operation::delete("x")).await;
    let after = Utc::now();

    assert_eq!(orch.get_audit_log(Some(before), Some(after)).len(), 2);
    assert!(orch.get_audit_log(Some(after + chrono::Duration::seconds(1)), None).is_empty());
    assert!(orch.get_audit_log(None, Some(before - chrono::Duration::seconds(1))).is_empty());
}
