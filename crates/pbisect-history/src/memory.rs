//! In-memory history.
//!
//! Revisions are pushed in order as [`Snapshot`]s; directories are derived
//! from file paths and content hashes are BLAKE3 digests, so identical
//! content shares a hash across revisions the way git objects do.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::{EntryKind, History, HistoryError, Result, TreeEntry};

/// File tree of one revision.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, (EntryKind, Vec<u8>)>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file(self, path: impl Into<PathBuf>, content: impl AsRef<[u8]>) -> Self {
        self.with(path, EntryKind::File, content)
    }

    pub fn executable(self, path: impl Into<PathBuf>, content: impl AsRef<[u8]>) -> Self {
        self.with(path, EntryKind::Executable, content)
    }

    /// A symlink whose target is `target`.
    pub fn symlink(self, path: impl Into<PathBuf>, target: impl AsRef<[u8]>) -> Self {
        self.with(path, EntryKind::Symlink, target)
    }

    fn with(mut self, path: impl Into<PathBuf>, kind: EntryKind, content: impl AsRef<[u8]>) -> Self {
        self.files
            .insert(path.into(), (kind, content.as_ref().to_vec()));
        self
    }
}

/// History held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryHistory {
    order: Vec<String>,
    trees: HashMap<String, Vec<TreeEntry>>,
    blobs: HashMap<String, Vec<u8>>,
    failing: HashSet<PathBuf>,
    reads: AtomicUsize,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `revision` as the newest revision.
    pub fn push(&mut self, revision: impl Into<String>, snapshot: Snapshot) -> Result<()> {
        let revision = revision.into();
        let mut dirs = BTreeSet::new();
        let mut entries = Vec::new();

        for (path, (kind, content)) in snapshot.files {
            for ancestor in path.ancestors().skip(1) {
                if ancestor != Path::new("") {
                    dirs.insert(ancestor.to_path_buf());
                }
            }
            let hash = blake3::hash(&content).to_hex()[..40].to_string();
            self.blobs.insert(hash.clone(), content);
            entries.push(TreeEntry::new(path, hash, kind, revision.clone())?);
        }

        // Directories first, parents before children, like `ls-tree -t`
        let mut tree = dirs
            .into_iter()
            .map(|dir| TreeEntry::new(dir, "0".repeat(40), EntryKind::Directory, revision.clone()))
            .collect::<Result<Vec<_>>>()?;
        tree.extend(entries);

        self.trees.insert(revision.clone(), tree);
        self.order.push(revision);
        Ok(())
    }

    /// Make every blob read for `path` fail.
    pub fn fail_reads_for(&mut self, path: impl Into<PathBuf>) {
        self.failing.insert(path.into());
    }

    /// Number of `read_blob` calls served so far.
    pub fn blob_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn position(&self, revision: &str) -> Result<usize> {
        self.order
            .iter()
            .position(|r| r == revision)
            .ok_or_else(|| HistoryError::UnknownRevision(revision.to_string()))
    }
}

#[async_trait]
impl History for MemoryHistory {
    async fn revisions(&self, good: &str, bad: &str) -> Result<Vec<String>> {
        let start = self.position(good)?;
        let end = self.position(bad)?;
        if end <= start {
            return Err(HistoryError::EmptyRange {
                good: good.to_string(),
                bad: bad.to_string(),
            });
        }
        Ok(self.order[start..=end].to_vec())
    }

    async fn list_tree(&self, revision: &str) -> Result<Vec<TreeEntry>> {
        self.trees
            .get(revision)
            .cloned()
            .ok_or_else(|| HistoryError::UnknownRevision(revision.to_string()))
    }

    async fn read_blob(&self, entry: &TreeEntry) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&entry.path) {
            return Err(HistoryError::Io(io::Error::other(format!(
                "injected read failure for {}",
                entry.path.display()
            ))));
        }
        self.blobs
            .get(&entry.hash)
            .cloned()
            .ok_or_else(|| HistoryError::NotFound {
                revision: entry.revision.clone(),
                path: entry.path.display().to_string(),
            })
    }
}
