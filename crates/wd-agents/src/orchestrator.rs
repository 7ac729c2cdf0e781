//! Orchestrator: classify, get approval when needed, execute, record.
//!
//! Every request that parses into an operation leaves exactly one audit
//! entry and yields exactly one [`RequestOutcome`]; errors and panics inside
//! the flow are turned into a failed outcome rather than propagated.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use wd_core::types::{ApprovalStatus, Operation};
use wd_harness::executor::{ExecutionError, ExecutionOutput, Executor};
use wd_harness::security::{PathGuard, PathViolation};

use crate::audit::{AuditDraft, AuditLog, AuditOutcome, AuditRecord};
use crate::coordinator::{Approver, CoordinatorError};
use crate::gateway::ExecutionGateway;
use crate::intent::{CommandIntentParser, IntentError, IntentSource};
use crate::risk;

pub const DENIED_REASON: &str = "denied by reviewer";
pub const TIMEOUT_REASON: &str = "timed out";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Intent(#[from] IntentError),
    #[error(transparent)]
    PathViolation(#[from] PathViolation),
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("orchestrator is missing its {0}")]
    Incomplete(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// RequestOutcome
// ---------------------------------------------------------------------------

/// What the caller gets back for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    pub success: bool,
    /// One-line summary of what the executor did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// Everything the executor returned, including file contents for reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ExecutionOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub required_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_status: Option<ApprovalStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl RequestOutcome {
    fn succeeded(output: ExecutionOutput, required_approval: bool) -> Self {
        Self {
            success: true,
            result: Some(output.to_string()),
            output: Some(output),
            error: None,
            required_approval,
            approval_status: None,
            request_id: None,
        }
    }

    fn failed(error: impl Into<String>, required_approval: bool) -> Self {
        Self {
            success: false,
            result: None,
            output: None,
            error: Some(error.into()),
            required_approval,
            approval_status: None,
            request_id: None,
        }
    }
}

/// How the flow ended when nothing went wrong.
enum Flow {
    Executed(ExecutionOutput),
    Denied,
    TimedOut,
}

// ===========================================================================
// Orchestrator
// ===========================================================================

pub struct Orchestrator {
    intents: Arc<dyn IntentSource>,
    approver: Arc<dyn Approver>,
    gateway: ExecutionGateway,
    guard: PathGuard,
    audit: Arc<AuditLog>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Parse `input` and run it. A request that cannot be parsed fails
    /// without an audit entry.
    pub async fn process_request(&self, input: &str) -> RequestOutcome {
        info!(request = input, "request received");
        match self.intents.parse(input).await {
            Ok(operation) => self.handle(operation, Some(input)).await,
            Err(e) => {
                warn!(request = input, error = %e, "could not parse request");
                RequestOutcome::failed(OrchestratorError::from(e).to_string(), false)
            }
        }
    }

    pub async fn process_operation(&self, operation: Operation) -> RequestOutcome {
        self.handle(operation, None).await
    }

    /// Audit records in append order, optionally bounded (inclusive).
    pub fn get_audit_log(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<AuditRecord> {
        self.audit.entries(start, end)
    }

    async fn handle(&self, operation: Operation, user_input: Option<&str>) -> RequestOutcome {
        let required_approval = risk::is_high_risk(&operation);
        let mut draft = self.audit.open(operation.clone(), required_approval);

        let flow = AssertUnwindSafe(self.run(&operation, user_input, &mut draft))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(OrchestratorError::Internal(panic_message(&*panic))));

        let (request_id, approval_status) = draft.approval();
        let mut outcome = match flow {
            Ok(Flow::Executed(output)) => {
                draft.commit(AuditOutcome::Success(output.to_string()));
                RequestOutcome::succeeded(output, required_approval)
            }
            Ok(Flow::Denied) => {
                draft.commit(AuditOutcome::Denied);
                RequestOutcome::failed(DENIED_REASON, required_approval)
            }
            Ok(Flow::TimedOut) => {
                draft.commit(AuditOutcome::Timeout);
                RequestOutcome::failed(TIMEOUT_REASON, required_approval)
            }
            Err(e) => {
                error!(op = %operation.summary(), error = %e, "request failed");
                draft.commit(AuditOutcome::Error(e.to_string()));
                RequestOutcome::failed(e.to_string(), required_approval)
            }
        };

        outcome.approval_status = approval_status;
        outcome.request_id = request_id;
        outcome
    }

    async fn run(
        &self,
        operation: &Operation,
        user_input: Option<&str>,
        draft: &mut AuditDraft,
    ) -> Result<Flow, OrchestratorError> {
        self.guard.check(&operation.path)?;
        if let Some(dest) = &operation.destination {
            self.guard.check(dest)?;
        }

        if !risk::is_high_risk(operation) {
            info!(op = %operation.summary(), "executing low-risk operation");
            return Ok(Flow::Executed(self.gateway.execute(operation).await?));
        }

        info!(op = %operation.summary(), "high-risk operation, requesting approval");
        let context = approval_context(operation, user_input);
        let request = self.approver.request_approval(operation, &context).await?;
        draft.record_approval(&request);

        match request.status {
            ApprovalStatus::Approved => {
                info!(
                    request_id = %request.id,
                    approver = request.responder.as_deref().unwrap_or("unknown"),
                    "operation approved"
                );
                Ok(Flow::Executed(self.gateway.execute(operation).await?))
            }
            ApprovalStatus::Denied => {
                info!(request_id = %request.id, "operation denied");
                Ok(Flow::Denied)
            }
            ApprovalStatus::Timeout => {
                warn!(request_id = %request.id, "approval timed out");
                Ok(Flow::TimedOut)
            }
            ApprovalStatus::Pending => Err(OrchestratorError::Internal(format!(
                "approval {} returned while still pending",
                request.id
            ))),
        }
    }
}

/// Text shown to the reviewer alongside the prompt.
pub fn approval_context(operation: &Operation, user_input: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(input) = user_input {
        parts.push(format!("User requested: \"{input}\""));
    }
    parts.push(format!("This translates to: {} operation", operation.kind));
    parts.push(format!("Target path: {}", operation.path));
    if let Some(dest) = &operation.destination {
        parts.push(format!("Destination: {dest}"));
    }
    let mut context = parts.join("\n");
    if let Some(warning) = risk::warning_for(operation.kind) {
        context.push_str(&format!("\n\nWarning: {warning}"));
    }
    context
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// OrchestratorBuilder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct OrchestratorBuilder {
    intents: Option<Arc<dyn IntentSource>>,
    approver: Option<Arc<dyn Approver>>,
    executor: Option<Arc<dyn Executor>>,
    guard: Option<PathGuard>,
    audit: Option<Arc<AuditLog>>,
    quarantine_dir: Option<String>,
}

impl OrchestratorBuilder {
    /// Defaults to [`CommandIntentParser`].
    pub fn intents(mut self, intents: Arc<dyn IntentSource>) -> Self {
        self.intents = Some(intents);
        self
    }

    pub fn approver(mut self, approver: Arc<dyn Approver>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn workspace(mut self, guard: PathGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Share an existing log; a fresh one is created otherwise.
    pub fn audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Defaults to `trash`.
    pub fn quarantine_dir(mut self, dir: impl Into<String>) -> Self {
        self.quarantine_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<Orchestrator, OrchestratorError> {
        let approver = self.approver.ok_or(OrchestratorError::Incomplete("approver"))?;
        let executor = self.executor.ok_or(OrchestratorError::Incomplete("executor"))?;
        let guard = self.guard.ok_or(OrchestratorError::Incomplete("workspace"))?;
        Ok(Orchestrator {
            intents: self
                .intents
                .unwrap_or_else(|| Arc::new(CommandIntentParser)),
            approver,
            gateway: ExecutionGateway::new(
                executor,
                self.quarantine_dir.unwrap_or_else(|| "trash".to_string()),
            ),
            guard,
            audit: self.audit.unwrap_or_else(AuditLog::new),
        })
    }
}
