//! # pbisect-cas
//!
//! Content-addressed store for file content checked out by pbisect.
//!
//! Blobs are keyed by the object hash the history reports plus the execute
//! bit, and laid out with a 2-level fan-out:
//!
//! ```text
//! <cas>/
//! └── ab/
//!     └── cd/
//!         ├── abcd1234...      # regular file content, mode 0444
//!         └── abcd1234....x    # same content checked out executable, mode 0555
//! ```
//!
//! The store is shared by every concurrent workspace build of a run and
//! survives across runs; a blob is fetched at most once per key.

pub mod link_strategy;

pub use link_strategy::{get_strategy, LinkMode, LinkStrategy};

use std::error::Error as StdError;
use std::fs::{self, File};
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use pbisect_config::log_cas_debug;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

/// Errors that can occur during CAS operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid object hash: {hash:?}")]
    InvalidHash { hash: String },

    #[error("Failed to fetch blob {hash}: {source}")]
    Fetch {
        hash: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Permission class a blob is stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobMode {
    Regular,
    Executable,
}

impl BlobMode {
    /// Blobs are never writable: a probe writing through a link must not
    /// change content other workspaces share.
    pub fn permissions(self) -> u32 {
        match self {
            BlobMode::Regular => 0o444,
            BlobMode::Executable => 0o555,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            BlobMode::Regular => "",
            BlobMode::Executable => ".x",
        }
    }
}

/// Identity of one CAS entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobKey {
    hash: String,
    mode: BlobMode,
}

impl BlobKey {
    /// Build a key from a hex object hash (4 to 64 digits, any case).
    pub fn new(hash: impl Into<String>, mode: BlobMode) -> Result<Self> {
        let hash = hash.into();
        let valid = (4..=64).contains(&hash.len()) && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !valid {
            return Err(CasError::InvalidHash { hash });
        }
        Ok(Self {
            hash: hash.to_ascii_lowercase(),
            mode,
        })
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn mode(&self) -> BlobMode {
        self.mode
    }

    fn file_name(&self) -> String {
        format!("{}{}", self.hash, self.mode.suffix())
    }
}

/// Content-addressed store
///
/// Existence is tracked in memory so repeated lookups stay off the
/// filesystem; a per-key lock serializes fetches of the same key while
/// different keys materialize concurrently.
#[derive(Debug)]
pub struct CasStore {
    root: PathBuf,
    present: DashSet<BlobKey>,
    locks: DashMap<BlobKey, Arc<Mutex<()>>>,
    fetches: AtomicU64,
}

impl CasStore {
    /// Create a new CAS store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist. A relative root is
    /// resolved against the working directory, since blob paths become
    /// symlink targets inside workspaces elsewhere in the tree.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = std::path::absolute(root.as_ref())?;
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            present: DashSet::new(),
            locks: DashMap::new(),
            fetches: AtomicU64::new(0),
        })
    }

    /// Get the root path of the CAS.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path where a blob with the given key is stored.
    pub fn blob_path(&self, key: &BlobKey) -> PathBuf {
        let hex = key.hash();
        self.root
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(key.file_name())
    }

    /// Whether the key is known to be materialized by this process.
    pub fn contains(&self, key: &BlobKey) -> bool {
        self.present.contains(key)
    }

    /// Number of fetches actually performed (cache misses) by this instance.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Return the on-disk path of `key`, invoking `fetch` only when neither
    /// this process nor a previous run has materialized it.
    ///
    /// Safe under any number of concurrent callers: `fetch` runs at most once
    /// per key per instance.
    #[instrument(skip(self, fetch), fields(hash = %key.hash()), level = "trace")]
    pub async fn ensure_materialized<F, Fut, E>(&self, key: &BlobKey, fetch: F) -> Result<PathBuf>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Vec<u8>, E>>,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let path = self.blob_path(key);
        if self.present.contains(key) {
            return Ok(path);
        }

        let lock = self.locks.entry(key.clone()).or_default().clone();
        let _guard = lock.lock().await;
        let _release = LockRelease {
            locks: &self.locks,
            key,
        };

        // Another caller may have finished while we waited.
        if self.present.contains(key) {
            return Ok(path);
        }

        if tokio::fs::symlink_metadata(&path).await.is_ok() {
            log_cas_debug!("Reusing blob left by an earlier run", hash = key.hash());
            self.mark_present(key);
            return Ok(path);
        }

        let data = fetch().await.map_err(|e| CasError::Fetch {
            hash: key.hash().to_string(),
            source: e.into(),
        })?;
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let target = path.clone();
        let mode = key.mode();
        let size = data.len();
        tokio::task::spawn_blocking(move || write_blob(&target, &data, mode))
            .await
            .map_err(io::Error::other)??;

        log_cas_debug!("Blob materialized", hash = key.hash(), size = size);
        self.mark_present(key);
        Ok(path)
    }

    /// Per-key locks currently held or awaited.
    pub fn pending_locks(&self) -> usize {
        self.locks.len()
    }

    fn mark_present(&self, key: &BlobKey) {
        self.present.insert(key.clone());
    }

    /// Get statistics about the CAS.
    pub fn stats(&self) -> Result<CasStats> {
        let mut stats = CasStats::default();
        for entry in walkdir::WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            // Skip temp files
            if entry.path().extension().is_some_and(|ext| ext == "tmp") {
                continue;
            }
            stats.blob_count += 1;
            stats.total_bytes += entry.metadata().map_err(io::Error::from)?.len();
            if entry.path().extension().is_some_and(|ext| ext == "x") {
                stats.executable_blobs += 1;
            }
        }
        Ok(stats)
    }
}

/// Drops a key's lock entry when its holder leaves, failed or aborted
/// fetches included, unless other callers are still queued on it.
struct LockRelease<'a> {
    locks: &'a DashMap<BlobKey, Arc<Mutex<()>>>,
    key: &'a BlobKey,
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        // One reference in the map plus the holder's own clone.
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Write `data` to `path` atomically with the blob's permissions.
fn write_blob(path: &Path, data: &[u8], mode: BlobMode) -> Result<()> {
    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Unique temp name: concurrent processes may share the store.
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        "{}.{}.{:?}.tmp",
        file_name,
        std::process::id(),
        std::thread::current().id()
    ));

    let mut file = File::create(&temp_path)?;
    file.write_all(data)?;
    drop(file);

    #[cfg(unix)]
    fs::set_permissions(&temp_path, fs::Permissions::from_mode(mode.permissions()))?;
    #[cfg(not(unix))]
    let _ = mode;

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        // Lost a race against another process writing the same content
        if path.exists() {
            return Ok(());
        }
        return Err(CasError::Io(e));
    }
    Ok(())
}

/// Statistics about the CAS store
#[derive(Debug, Clone, Default)]
pub struct CasStats {
    /// Number of blobs stored
    pub blob_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
    /// Blobs stored with the execute bit
    pub executable_blobs: u64,
}

impl CasStats {
    /// Calculate average blob size
    pub fn avg_blob_size(&self) -> u64 {
        if self.blob_count == 0 {
            0
        } else {
            self.total_bytes / self.blob_count
        }
    }
}
