//! Storage layout under the configured base path.
//!
//! ```text
//! <base>/
//! └── workspace/
//!     ├── cas/                      # content-addressed blobs, shared across runs
//!     └── bisect/
//!         └── <run_id>/
//!             ├── <revision>/       # one materialized tree per probed revision
//!             └── logs/<revision>.log
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Resolved directory layout for one base path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    base: PathBuf,
    workspace: PathBuf,
    cas: PathBuf,
    bisect: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let workspace = base.join("workspace");
        let cas = workspace.join("cas");
        let bisect = workspace.join("bisect");
        Self {
            base,
            workspace,
            cas,
            bisect,
        }
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> Result<()> {
        for dir in [&self.base, &self.workspace, &self.cas, &self.bisect] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn cas_dir(&self) -> &Path {
        &self.cas
    }

    pub fn bisect_dir(&self) -> &Path {
        &self.bisect
    }

    /// Directory holding every workspace of one run.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.bisect.join(run_id)
    }

    /// Directory receiving captured command output for one run.
    pub fn logs_dir(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join("logs")
    }
}

/// Stable identifier for a search over `good..bad` in `repo`.
///
/// Re-running the same search yields the same id, so workspaces left by an
/// interrupted run are picked up again.
pub fn compute_run_id(repo: impl AsRef<Path>, good: &str, bad: &str) -> String {
    let path = repo.as_ref();
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = blake3::Hasher::new();
    hasher.update(canon.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    hasher.update(good.as_bytes());
    hasher.update(b"\0");
    hasher.update(bad.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Expand a leading `~/` to the home directory.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
