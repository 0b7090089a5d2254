//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated base path with the storage layout created
//! - A scratch directory for fixtures (repositories, scripts)
//!
//! # Usage
//!
//! ```ignore
//! use pbisect_config::testing::TestEnvironment;
//!
//! let env = TestEnvironment::new().unwrap();
//! let cas = CasStore::new(env.layout.cas_dir()).unwrap();
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

use crate::{Config, Layout};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Storage base path
    pub base_path: PathBuf,
    /// Layout under `base_path`, already created
    pub layout: Layout,
    /// Scratch directory for fixtures
    pub scratch: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let base_path = root.join("base");
        let scratch = root.join("scratch");
        let layout = Layout::new(&base_path);
        layout.ensure()?;
        std::fs::create_dir_all(&scratch)?;

        Ok(Self {
            _temp_dir: temp_dir,
            base_path,
            layout,
            scratch,
            test_id,
        })
    }

    /// Config pointing at this environment's base path.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.storage.base_path = self.base_path.clone();
        cfg
    }

    /// Create a file under the scratch directory
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.scratch.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Environment variables that point a spawned `pbisect` at this environment.
    pub fn cli_env(&self) -> Vec<(String, String)> {
        vec![
            (
                "PBISECT_BASE_PATH".to_string(),
                self.base_path.to_string_lossy().into_owned(),
            ),
            ("PBISECT_LOG".to_string(), "warn".to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.layout.cas_dir().exists());
        assert!(env.layout.bisect_dir().exists());
        assert!(env.scratch.exists());
    }

    #[test]
    fn test_environment_ids_are_unique() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.test_id, env2.test_id);
        assert_ne!(env1.base_path, env2.base_path);
    }

    #[test]
    fn test_create_file() {
        let env = TestEnvironment::new().unwrap();
        let path = env.create_file("bin/check.sh", b"exit 0").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"exit 0");
    }

    #[test]
    fn test_config_points_at_environment() {
        let env = TestEnvironment::new().unwrap();
        assert_eq!(env.config().layout(), env.layout);
        assert!(env
            .cli_env()
            .iter()
            .any(|(k, v)| k == "PBISECT_BASE_PATH" && v.ends_with("base")));
    }
}
