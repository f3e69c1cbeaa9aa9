use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::graph::DEFAULT_MAX_CHAIN_DEPTH;

/// Directory under the project root holding the store, config and locks.
pub const STATE_DIR: &str = ".runsheet";

/// Environment variable overriding `locking.timeout_ms`.
pub const LOCK_TIMEOUT_ENV: &str = "RUNSHEET_LOCK_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub ordering: OrderingConfig,
    #[serde(default)]
    pub locking: LockingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingConfig {
    /// Longest allowed predecessor chain, in links.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            max_chain_depth: default_max_chain_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockingConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Relative paths are resolved against the project root on load.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: PathBuf,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            lock_dir: default_lock_dir(),
        }
    }
}

impl EngineConfig {
    /// Maximum time a reorder waits for its scope lock.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locking.timeout_ms)
    }

    /// Replace the lock directory.
    #[must_use]
    pub fn with_lock_dir(mut self, lock_dir: impl Into<PathBuf>) -> Self {
        self.locking.lock_dir = lock_dir.into();
        self
    }

    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.locking.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub const fn with_max_chain_depth(mut self, max_chain_depth: usize) -> Self {
        self.ordering.max_chain_depth = max_chain_depth;
        self
    }

    /// Resolve a relative `lock_dir` against `project_root`.
    ///
    /// Writers that open one store from different working directories
    /// only serialize when they agree on the lock directory.
    #[must_use]
    pub fn anchored_at(mut self, project_root: &Path) -> Self {
        if self.locking.lock_dir.is_relative() {
            self.locking.lock_dir = project_root.join(&self.locking.lock_dir);
        }
        self
    }

    /// Reject values the engine cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns an error if `max_chain_depth` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.ordering.max_chain_depth == 0 {
            bail!("ordering.max_chain_depth must be at least 1");
        }
        Ok(())
    }
}

/// Path of the config file for a project root.
#[must_use]
pub fn config_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("config.toml")
}

/// Path of the store database for a project root.
#[must_use]
pub fn store_path(project_root: &Path) -> PathBuf {
    project_root.join(STATE_DIR).join("runsheet.db")
}

/// Load `<root>/.runsheet/config.toml`, falling back to defaults when absent.
///
/// A relative `lock_dir` is resolved against `project_root`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or holds invalid
/// values.
pub fn load_engine_config(project_root: &Path) -> Result<EngineConfig> {
    let path = config_path(project_root);
    let config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str::<EngineConfig>(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?
    } else {
        EngineConfig::default()
    };

    let config = config.anchored_at(project_root);
    config
        .validate()
        .with_context(|| format!("Invalid config in {}", path.display()))?;
    Ok(config)
}

/// Apply a `RUNSHEET_LOCK_TIMEOUT_MS` value, if one was provided.
///
/// # Errors
///
/// Returns an error if the value is not a non-negative integer.
pub fn apply_env_overrides(mut config: EngineConfig, lock_timeout_ms: Option<String>) -> Result<EngineConfig> {
    if let Some(raw) = lock_timeout_ms {
        config.locking.timeout_ms = raw
            .trim()
            .parse()
            .with_context(|| format!("{LOCK_TIMEOUT_ENV} must be an integer, got '{raw}'"))?;
    }
    Ok(config)
}

const fn default_max_chain_depth() -> usize {
    DEFAULT_MAX_CHAIN_DEPTH
}

const fn default_timeout_ms() -> u64 {
    5_000
}

fn default_lock_dir() -> PathBuf {
    PathBuf::from(STATE_DIR).join("locks")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(root: &Path, content: &str) {
        let dir = root.join(STATE_DIR);
        std::fs::create_dir_all(&dir).expect("create state dir");
        std::fs::write(dir.join("config.toml"), content).expect("write config");
    }

    #[test]
    fn missing_config_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = load_engine_config(dir.path()).expect("load");
        assert_eq!(config.ordering.max_chain_depth, 50);
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.locking.lock_dir, dir.path().join(".runsheet/locks"));
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "[ordering]\nmax_chain_depth = 8\n");
        let config = load_engine_config(dir.path()).expect("load");
        assert_eq!(config.ordering.max_chain_depth, 8);
        assert_eq!(config.locking.timeout_ms, 5_000);
    }

    #[test]
    fn absolute_lock_dir_is_kept() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locks = tempfile::tempdir().expect("lock tempdir");
        write_config(
            dir.path(),
            &format!(
                "[locking]\ntimeout_ms = 250\nlock_dir = {:?}\n",
                locks.path().display().to_string()
            ),
        );
        let config = load_engine_config(dir.path()).expect("load");
        assert_eq!(config.locking.lock_dir, locks.path());
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn zero_depth_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "[ordering]\nmax_chain_depth = 0\n");
        let err = load_engine_config(dir.path()).expect_err("zero depth");
        assert!(format!("{err:#}").contains("max_chain_depth"));
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_config(dir.path(), "[ordering\n");
        let err = load_engine_config(dir.path()).expect_err("parse error");
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn env_override_replaces_timeout() {
        let config = apply_env_overrides(EngineConfig::default(), Some("120".into()))
            .expect("override");
        assert_eq!(config.lock_timeout(), Duration::from_millis(120));

        let unchanged = apply_env_overrides(EngineConfig::default(), None).expect("no override");
        assert_eq!(unchanged, EngineConfig::default());

        assert!(apply_env_overrides(EngineConfig::default(), Some("soon".into())).is_err());
    }

    #[test]
    fn builders_set_fields() {
        let config = EngineConfig::default()
            .with_lock_dir("/tmp/locks")
            .with_lock_timeout(Duration::from_millis(30))
            .with_max_chain_depth(3);
        assert_eq!(config.locking.lock_dir, PathBuf::from("/tmp/locks"));
        assert_eq!(config.locking.timeout_ms, 30);
        assert_eq!(config.ordering.max_chain_depth, 3);
    }
}
