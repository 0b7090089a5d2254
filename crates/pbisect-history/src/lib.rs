//! # pbisect-history
//!
//! Narrow interface to the version-control history a search runs over:
//! listing the revisions between two endpoints, listing a revision's tree,
//! and reading blob content.
//!
//! [`GitHistory`] drives the `git` executable; [`MemoryHistory`] keeps
//! everything in memory.

pub mod git;
pub mod memory;

pub use git::GitHistory;
pub use memory::{MemoryHistory, Snapshot};

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("git {args} failed ({status}): {stderr}")]
    Git {
        args: String,
        status: String,
        stderr: String,
    },

    #[error("Malformed tree entry {record:?}: {reason}")]
    Parse { record: String, reason: String },

    #[error("No revisions between {good} and {bad}")]
    EmptyRange { good: String, bad: String },

    #[error("Unknown revision: {0}")]
    UnknownRevision(String),

    #[error("No blob at {path} in {revision}")]
    NotFound { revision: String, path: String },
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// What a tracked entry is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Directory,
    File,
    Executable,
    Symlink,
    /// Nested repository; checked out as an empty directory
    Submodule,
}

impl EntryKind {
    /// Map a git tree mode (`100644`, `040000`, ...) to a kind.
    pub fn from_git_mode(mode: &str) -> Option<Self> {
        match mode {
            "040000" | "40000" => Some(EntryKind::Directory),
            "100644" | "100664" => Some(EntryKind::File),
            "100755" => Some(EntryKind::Executable),
            "120000" => Some(EntryKind::Symlink),
            "160000" => Some(EntryKind::Submodule),
            _ => None,
        }
    }

    /// Entries materialized as directories.
    pub fn is_dir(self) -> bool {
        matches!(self, EntryKind::Directory | EntryKind::Submodule)
    }
}

/// One tracked path of one revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the repository root
    pub path: PathBuf,
    /// Object hash of the content
    pub hash: String,
    pub kind: EntryKind,
    /// Revision the entry was listed from
    pub revision: String,
}

impl TreeEntry {
    /// Build an entry, rejecting paths that would escape the workspace root.
    pub fn new(
        path: impl Into<PathBuf>,
        hash: impl Into<String>,
        kind: EntryKind,
        revision: impl Into<String>,
    ) -> Result<Self> {
        let path = path.into();
        if !is_contained(&path) {
            return Err(HistoryError::Parse {
                record: path.display().to_string(),
                reason: "path is not a plain relative path".to_string(),
            });
        }
        Ok(Self {
            path,
            hash: hash.into(),
            kind,
            revision: revision.into(),
        })
    }
}

fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

/// Source of revisions, trees and blobs.
#[async_trait]
pub trait History: Send + Sync {
    /// Revisions on the ancestry path from `good` to `bad`, oldest first,
    /// both endpoints included.
    async fn revisions(&self, good: &str, bad: &str) -> Result<Vec<String>>;

    /// Every tracked entry of `revision`, directories included.
    async fn list_tree(&self, revision: &str) -> Result<Vec<TreeEntry>>;

    /// Raw content of `entry`.
    async fn read_blob(&self, entry: &TreeEntry) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_git_mode() {
        assert_eq!(EntryKind::from_git_mode("040000"), Some(EntryKind::Directory));
        assert_eq!(EntryKind::from_git_mode("100644"), Some(EntryKind::File));
        assert_eq!(EntryKind::from_git_mode("100755"), Some(EntryKind::Executable));
        assert_eq!(EntryKind::from_git_mode("120000"), Some(EntryKind::Symlink));
        assert_eq!(EntryKind::from_git_mode("160000"), Some(EntryKind::Submodule));
        assert_eq!(EntryKind::from_git_mode("100600"), None);
        assert!(EntryKind::Submodule.is_dir());
        assert!(!EntryKind::Symlink.is_dir());
    }

    #[test]
    fn test_entry_rejects_escaping_paths() {
        assert!(TreeEntry::new("src/lib.rs", "abcd", EntryKind::File, "r1").is_ok());
        assert!(TreeEntry::new("../outside", "abcd", EntryKind::File, "r1").is_err());
        assert!(TreeEntry::new("/etc/passwd", "abcd", EntryKind::File, "r1").is_err());
        assert!(TreeEntry::new("a/./b", "abcd", EntryKind::File, "r1").is_ok());
        assert!(TreeEntry::new("", "abcd", EntryKind::File, "r1").is_err());
    }
}
