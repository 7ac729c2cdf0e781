use std::path::{Component, Path, PathBuf};

use tracing::warn;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A target path that resolves outside the permitted working scope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("path {path:?} is outside the workspace {root}")]
pub struct PathViolation {
    pub path: String,
    pub root: String,
}

// ===========================================================================
// PathGuard
// ===========================================================================

/// Confines operation paths to a single workspace directory.
///
/// Resolution is lexical: `.` and `..` are folded without touching the
/// filesystem, so targets that do not exist yet (write / move destinations)
/// are checked the same way as existing ones. Symlinks inside the workspace
/// are not followed.
#[derive(Debug, Clone)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Guard `root`. Relative roots are anchored at the current directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let absolute = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self {
            root: normalize(&absolute),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` (relative to the root, or absolute) and make sure it
    /// stays inside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, PathViolation> {
        if path.trim().is_empty() {
            return Err(self.violation(path));
        }
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let resolved = normalize(&joined);
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            warn!(path, root = %self.root.display(), "path escapes workspace");
            Err(self.violation(path))
        }
    }

    /// Check without keeping the resolved path.
    pub fn check(&self, path: &str) -> Result<(), PathViolation> {
        self.resolve(path).map(|_| ())
    }

    fn violation(&self, path: &str) -> PathViolation {
        PathViolation {
            path: path.to_string(),
            root: self.root.display().to_string(),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
