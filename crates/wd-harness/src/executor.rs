use std::fmt;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use wd_core::types::{Operation, OperationKind};

use crate::security::{PathGuard, PathViolation};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    PathViolation(#[from] PathViolation),
    #[error("{0} operation requires a destination")]
    MissingDestination(OperationKind),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{kind} {path} failed: {source}")]
    Io {
        kind: OperationKind,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("execution failed: {0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

// ---------------------------------------------------------------------------
// ExecutionOutput
// ---------------------------------------------------------------------------

/// What an operation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionOutput {
    Listing { path: String, entries: Vec<String> },
    Contents { path: String, text: String },
    Deleted { path: String },
    Moved { from: String, to: String },
    Written { path: String, bytes: usize },
    /// A delete that fell back to moving the target aside.
    Quarantined { path: String, quarantine: String },
}

impl fmt::Display for ExecutionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOutput::Listing { path, entries } => {
                write!(f, "{} entries in {}: {}", entries.len(), path, entries.join(", "))
            }
            ExecutionOutput::Contents { path, text } => {
                write!(f, "read {} ({} bytes)", path, text.len())
            }
            ExecutionOutput::Deleted { path } => write!(f, "deleted {path}"),
            ExecutionOutput::Moved { from, to } => write!(f, "moved {from} to {to}"),
            ExecutionOutput::Written { path, bytes } => write!(f, "wrote {bytes} bytes to {path}"),
            ExecutionOutput::Quarantined { path, quarantine } => {
                write!(f, "{path} moved to quarantine: {quarantine}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Executor trait
// ---------------------------------------------------------------------------

/// Carries out a single [`Operation`].
///
/// Implementations dispatch on [`OperationKind`] to a fixed handler per kind;
/// nothing is evaluated dynamically.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, operation: &Operation) -> Result<ExecutionOutput>;
}

// ---------------------------------------------------------------------------
// FsExecutor
// ---------------------------------------------------------------------------

/// Executes operations against the local filesystem, confined by a [`PathGuard`].
#[derive(Debug, Clone)]
pub struct FsExecutor {
    guard: PathGuard,
}

impl FsExecutor {
    pub fn new(guard: PathGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &PathGuard {
        &self.guard
    }

    async fn list(&self, op: &Operation) -> Result<ExecutionOutput> {
        let dir = self.guard.resolve(&op.path)?;
        let mut reader = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?
        {
            let mut name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                name.push('/');
            }
            entries.push(name);
        }
        entries.sort();
        Ok(ExecutionOutput::Listing {
            path: op.path.clone(),
            entries,
        })
    }

    async fn read(&self, op: &Operation) -> Result<ExecutionOutput> {
        let file = self.guard.resolve(&op.path)?;
        let text = tokio::fs::read_to_string(&file)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;
        Ok(ExecutionOutput::Contents {
            path: op.path.clone(),
            text,
        })
    }

    async fn delete(&self, op: &Operation) -> Result<ExecutionOutput> {
        let target = self.guard.resolve(&op.path)?;
        if target == self.guard.root() {
            return Err(ExecutionError::Failed(
                "refusing to delete the workspace root".into(),
            ));
        }
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;
        let removed = if meta.is_dir() {
            tokio::fs::remove_dir_all(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        removed.map_err(|e| io_error(op.kind, &op.path, e))?;
        info!(path = %op.path, "deleted");
        Ok(ExecutionOutput::Deleted {
            path: op.path.clone(),
        })
    }

    async fn relocate(&self, op: &Operation) -> Result<ExecutionOutput> {
        let destination = op
            .destination
            .as_deref()
            .ok_or(ExecutionError::MissingDestination(op.kind))?;
        let from = self.guard.resolve(&op.path)?;
        let to = self.guard.resolve(destination)?;

        if tokio::fs::metadata(&from).await.is_err() {
            return Err(ExecutionError::NotFound(op.path.clone()));
        }
        ensure_parent(&to)
            .await
            .map_err(|e| io_error(op.kind, destination, e))?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;
        info!(from = %op.path, to = destination, "moved");
        Ok(ExecutionOutput::Moved {
            from: op.path.clone(),
            to: destination.to_string(),
        })
    }

    async fn write(&self, op: &Operation) -> Result<ExecutionOutput> {
        let file = self.guard.resolve(&op.path)?;
        let content = op.content.as_deref().unwrap_or_default();
        ensure_parent(&file)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;
        tokio::fs::write(&file, content)
            .await
            .map_err(|e| io_error(op.kind, &op.path, e))?;
        info!(path = %op.path, bytes = content.len(), "written");
        Ok(ExecutionOutput::Written {
            path: op.path.clone(),
            bytes: content.len(),
        })
    }
}

#[async_trait]
impl Executor for FsExecutor {
    async fn execute(&self, operation: &Operation) -> Result<ExecutionOutput> {
        debug!(op = %operation.summary(), "executing");
        match operation.kind {
            OperationKind::List => self.list(operation).await,
            OperationKind::Read => self.read(operation).await,
            OperationKind::Delete => self.delete(operation).await,
            OperationKind::Move => self.relocate(operation).await,
            OperationKind::Write => self.write(operation).await,
        }
    }
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

fn io_error(kind: OperationKind, path: &str, source: io::Error) -> ExecutionError {
    if source.kind() == io::ErrorKind::NotFound {
        ExecutionError::NotFound(path.to_string())
    } else {
        ExecutionError::Io {
            kind,
            path: path.to_string(),
            source,
        }
    }
}
