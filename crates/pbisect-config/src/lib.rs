//! # pbisect-config
//!
//! Configuration management for pbisect.
//!
//! Loads configuration from:
//! 1. `~/.pbisect/config.toml` (global)
//! 2. `.pbisect/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)
//!
//! Command-line flags are applied on top by the binary.

pub mod logging;
pub mod path;
pub mod testing;

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use path::Layout;

/// Default storage root: `<system temp>/pbisect`
pub static DEFAULT_BASE_PATH: Lazy<PathBuf> = Lazy::new(|| std::env::temp_dir().join("pbisect"));

/// Seed used for the probe order when nothing overrides it.
pub const DEFAULT_SEED: u64 = 1;

/// Progress tick period, roughly 24 updates per second.
pub const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 42;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub bisect: BisectConfig,
}

impl Config {
    /// Load config from standard locations plus environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let project = Self::project_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(&project))?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load and merge the given config files. Missing files are skipped.
    ///
    /// Keys present in `project` override the same keys in `global`; keys it
    /// leaves out keep their global (or default) value.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)?;
            let table: toml::Table = toml::from_str(&contents)?;
            merge_tables(&mut merged, table);
        }

        Ok(toml::Value::Table(merged).try_into()?)
    }

    /// Global config path: ~/.pbisect/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".pbisect/config.toml"))
    }

    /// Project config path: .pbisect/config.toml, relative to the working directory
    pub fn project_config_path() -> PathBuf {
        PathBuf::from(".pbisect/config.toml")
    }

    /// Apply environment variable overrides.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PBISECT_BASE_PATH") {
            self.storage.base_path = PathBuf::from(path);
        }
        if let Some(jobs) = lookup("PBISECT_JOBS") {
            let n = jobs
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidEnv {
                    key: "PBISECT_JOBS",
                    value: jobs,
                })?;
            self.bisect.jobs = Some(n);
        }
        if let Some(seed) = lookup("PBISECT_SEED") {
            self.bisect.seed = seed.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "PBISECT_SEED",
                value: seed,
            })?;
        }
        Ok(())
    }

    /// Storage layout rooted at the configured base path, made absolute
    /// against the working directory.
    pub fn layout(&self) -> Layout {
        let base = path::expand_tilde(&self.storage.base_path);
        Layout::new(std::path::absolute(&base).unwrap_or(base))
    }

    /// Generate default config TOML string
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Config::default()).unwrap_or_default()
    }
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for the CAS and per-run workspaces
    pub base_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.clone(),
        }
    }
}

/// Search configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BisectConfig {
    /// Concurrent probes (None = host parallelism)
    pub jobs: Option<usize>,
    /// Width of the workspace provisioning pool (None = 2x host parallelism)
    pub provisioning_jobs: Option<usize>,
    /// Probe order shuffle seed
    pub seed: u64,
    /// Progress refresh period in milliseconds
    pub progress_interval_ms: u64,
    /// How workspace files reach the CAS: "symlink" or "hardlink"
    pub link_mode: String,
    /// Abort the whole run on an exit status outside the documented ranges
    pub abort_on_unexpected: bool,
    /// Keep each probe's stdout/stderr under the run's logs directory
    pub capture_output: bool,
}

impl Default for BisectConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            provisioning_jobs: None,
            seed: DEFAULT_SEED,
            progress_interval_ms: DEFAULT_PROGRESS_INTERVAL_MS,
            link_mode: "symlink".to_string(),
            abort_on_unexpected: true,
            capture_output: true,
        }
    }
}

impl BisectConfig {
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn provisioning_jobs(&self) -> usize {
        self.provisioning_jobs
            .unwrap_or_else(|| num_cpus::get() * 2)
            .max(1)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }
}
