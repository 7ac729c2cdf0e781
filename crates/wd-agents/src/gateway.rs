use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use wd_core::types::{Operation, OperationKind};
use wd_harness::executor::{ExecutionError, ExecutionOutput, Executor, Result};

/// Front door to the executor.
///
/// A failed delete gets one second chance: the target is moved into the
/// quarantine directory instead. If that also fails the delete's own error
/// is reported.
#[derive(Clone)]
pub struct ExecutionGateway {
    executor: Arc<dyn Executor>,
    quarantine_dir: String,
}

impl ExecutionGateway {
    pub fn new(executor: Arc<dyn Executor>, quarantine_dir: impl Into<String>) -> Self {
        Self {
            executor,
            quarantine_dir: quarantine_dir.into(),
        }
    }

    pub fn quarantine_dir(&self) -> &str {
        &self.quarantine_dir
    }

    pub async fn execute(&self, operation: &Operation) -> Result<ExecutionOutput> {
        let err = match self.executor.execute(operation).await {
            Ok(output) => return Ok(output),
            Err(e) => e,
        };
        error!(op = %operation.summary(), error = %err, "execution failed");

        if operation.kind != OperationKind::Delete || matches!(err, ExecutionError::PathViolation(_)) {
            return Err(err);
        }

        let quarantine = quarantine_path(&self.quarantine_dir, &operation.path, Utc::now());
        warn!(path = %operation.path, quarantine = %quarantine, "falling back to quarantine move");
        match self
            .executor
            .execute(&Operation::relocate(operation.path.clone(), quarantine.clone()))
            .await
        {
            Ok(_) => {
                info!(path = %operation.path, quarantine = %quarantine, "target quarantined");
                Ok(ExecutionOutput::Quarantined {
                    path: operation.path.clone(),
                    quarantine,
                })
            }
            Err(fallback) => {
                warn!(path = %operation.path, error = %fallback, "quarantine move failed");
                Err(err)
            }
        }
    }
}

/// `<dir>/<UTC timestamp>_<path with separators flattened>`.
pub fn quarantine_path(dir: &str, path: &str, at: DateTime<Utc>) -> String {
    let flat: String = path
        .trim_start_matches("./")
        .trim_start_matches(['/', '\\'])
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!(
        "{}/{}_{}",
        dir.trim_end_matches(['/', '\\']),
        at.format("%Y%m%dT%H%M%S%.3fZ"),
        flat
    )
}
