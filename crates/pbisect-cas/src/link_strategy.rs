//! How workspace files point at CAS blobs.
//!
//! - **Symlink** (default): the workspace path is a symlink to the blob.
//!   Cheapest, works across devices, but tools that resolve symlinks see
//!   the CAS path.
//! - **Hardlink**: the workspace path shares the blob's inode. Falls back to
//!   reflink and then copy when the workspace and CAS live on different
//!   devices.
//!
//! # Usage
//!
//! ```ignore
//! use pbisect_cas::link_strategy::{get_strategy, LinkMode};
//!
//! let strategy = get_strategy(LinkMode::Symlink);
//! strategy.link_file(&blob, &target)?;
//! ```

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// Strategy for projecting a CAS blob into a workspace
pub trait LinkStrategy: Send + Sync {
    /// Make `target` resolve to the content of `blob`.
    ///
    /// An existing `target` is left untouched and reported as success.
    fn link_file(&self, blob: &Path, target: &Path) -> io::Result<()>;

    /// Name of this strategy (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Link mode selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    #[default]
    Symlink,
    Hardlink,
}

impl FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "symlink" => Ok(LinkMode::Symlink),
            "hardlink" => Ok(LinkMode::Hardlink),
            other => Err(format!(
                "unknown link mode '{other}' (expected 'symlink' or 'hardlink')"
            )),
        }
    }
}

impl fmt::Display for LinkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkMode::Symlink => write!(f, "symlink"),
            LinkMode::Hardlink => write!(f, "hardlink"),
        }
    }
}

/// Symlink from the workspace path to the blob.
pub struct SymlinkStrategy;

impl LinkStrategy for SymlinkStrategy {
    fn link_file(&self, blob: &Path, target: &Path) -> io::Result<()> {
        match make_symlink(blob, target) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            other => other,
        }
    }

    fn name(&self) -> &'static str {
        "symlink"
    }
}

/// hard_link → reflink → copy
pub struct HardlinkStrategy;

impl LinkStrategy for HardlinkStrategy {
    fn link_file(&self, blob: &Path, target: &Path) -> io::Result<()> {
        // Tier 1: hard_link
        match fs::hard_link(blob, target) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                // EXDEV: CAS on another filesystem
            }
            Err(e) => return Err(e),
        }

        // Tier 2: reflink (btrfs, xfs, APFS)
        if let Ok(()) = reflink_copy::reflink(blob, target) {
            return Ok(());
        }

        // Tier 3: copy
        fs::copy(blob, target)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hardlink"
    }
}

/// Create a symlink at `link` pointing to `original`.
#[cfg(unix)]
pub fn make_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
pub fn make_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

/// Get the strategy for a mode
pub fn get_strategy(mode: LinkMode) -> &'static dyn LinkStrategy {
    static SYMLINK: SymlinkStrategy = SymlinkStrategy;
    static HARDLINK: HardlinkStrategy = HardlinkStrategy;
    match mode {
        LinkMode::Symlink => &SYMLINK,
        LinkMode::Hardlink => &HARDLINK,
    }
}
