//! Revision workspaces built from CAS blobs.
//!
//! Each revision gets its own directory under the run directory. Tracked
//! directories are created eagerly; file content is materialized into the
//! shared [`CasStore`] on first use and linked into the workspace, so
//! neighbouring revisions only fetch the blobs they changed.
//!
//! Building is idempotent: anything already present at a destination is
//! left alone, which lets a cancelled build resume where it stopped.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pbisect_cas::link_strategy::make_symlink;
use pbisect_cas::{get_strategy, BlobKey, BlobMode, CasStore, LinkMode};
use pbisect_config::{log_workspace_debug, log_workspace_info};
use pbisect_history::{EntryKind, History, TreeEntry};
use tokio_util::sync::CancellationToken;

use crate::{PoolError, Result, RuntimeError, WorkerPool};

/// What happened at one workspace path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placed {
    Created,
    Existing,
}

/// Builds revision workspaces under a run directory.
#[derive(Clone)]
pub struct Materializer {
    cas: Arc<CasStore>,
    history: Arc<dyn History>,
    root: PathBuf,
    pool: WorkerPool,
    link: LinkMode,
}

impl Materializer {
    /// `pool` bounds how many entries are placed concurrently; it is
    /// shared by every build this materializer runs.
    pub fn new(
        cas: Arc<CasStore>,
        history: Arc<dyn History>,
        root: impl Into<PathBuf>,
        pool: WorkerPool,
        link: LinkMode,
    ) -> Self {
        Self {
            cas,
            history,
            root: root.into(),
            pool,
            link,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cas(&self) -> &CasStore {
        &self.cas
    }

    /// Directory holding the workspace of `revision`.
    pub fn workspace_path(&self, revision: &str) -> PathBuf {
        self.root.join(dir_name(revision))
    }

    /// Populate the workspace of `revision` and return its path.
    pub async fn build_workspace(
        &self,
        revision: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let workspace = self.workspace_path(revision);
        tokio::fs::create_dir_all(&workspace).await?;

        let entries = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PoolError::Cancelled.into()),
            entries = self.history.list_tree(revision) => entries?,
        };
        let total = entries.len();

        let results = self
            .pool
            .for_each(cancel, entries, |entry| {
                let this = self.clone();
                let workspace = workspace.clone();
                async move { this.place(&workspace, entry).await }
            })
            .await?;

        let mut created = 0;
        for result in results {
            if result? == Placed::Created {
                created += 1;
            }
        }

        log_workspace_info!(
            "Workspace ready",
            revision = revision,
            entries = total,
            created = created,
        );
        Ok(workspace)
    }

    async fn place(&self, workspace: &Path, entry: TreeEntry) -> Result<Placed> {
        let dest = workspace.join(&entry.path);
        if tokio::fs::symlink_metadata(&dest).await.is_ok() {
            return Ok(Placed::Existing);
        }

        match entry.kind {
            kind if kind.is_dir() => {
                tokio::fs::create_dir_all(&dest).await?;
            }
            EntryKind::Symlink => {
                ensure_parent(&dest).await?;
                let target = path_from_bytes(&self.history.read_blob(&entry).await?);
                blocking(move || tolerate_existing(make_symlink(&target, &dest))).await?;
            }
            _ => {
                ensure_parent(&dest).await?;
                let mode = match entry.kind {
                    EntryKind::Executable => BlobMode::Executable,
                    _ => BlobMode::Regular,
                };
                let key = BlobKey::new(entry.hash.clone(), mode)?;
                let history = self.history.clone();
                let blob = self
                    .cas
                    .ensure_materialized(&key, move || async move {
                        history.read_blob(&entry).await
                    })
                    .await?;

                let strategy = get_strategy(self.link);
                log_workspace_debug!(
                    "Linking blob",
                    hash = key.hash(),
                    strategy = strategy.name(),
                );
                blocking(move || strategy.link_file(&blob, &dest)).await?;
            }
        }
        Ok(Placed::Created)
    }
}

async fn ensure_parent(dest: &Path) -> io::Result<()> {
    match dest.parent() {
        Some(parent) => tokio::fs::create_dir_all(parent).await,
        None => Ok(()),
    }
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> io::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
        .map_err(RuntimeError::from)
}

fn tolerate_existing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// File name used for `revision` in per-run directories; always a
/// single path component.
pub fn dir_name(revision: &str) -> String {
    let name: String = revision
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    match name.as_str() {
        "" | "." | ".." => format!("_{name}"),
        _ => name,
    }
}

#[cfg(unix)]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
