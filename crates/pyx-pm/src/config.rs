//! Runtime configuration
//!
//! Values come from three layers, later ones winning: built-in defaults,
//! `PYX_*` environment variables, and the Pipfile's `[pipenv]` table.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;

use crate::pipfile::Settings;

/// Python version assumed when neither the Pipfile nor the environment names one
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";

/// Where a configuration value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Environment,
    Pipfile,
}

impl ConfigSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigSource::Default => "default",
            ConfigSource::Environment => "environment",
            ConfigSource::Pipfile => "Pipfile",
        }
    }
}

/// What to do when another process holds the lock file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockWait {
    Block,
    FailFast,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Metadata and artifact cache; `None` disables caching
    pub cache_dir: Option<PathBuf>,
    /// Concurrent metadata fetches
    pub max_workers: usize,
    /// Per-request metadata timeout
    pub fetch_timeout: Duration,
    pub allow_prereleases: bool,
    pub lock_wait: LockWait,
    /// Interpreter version targeted when the Pipfile has no `[requires]`
    pub python_version: String,
    /// Directory installed artifacts are placed in, relative to the project
    pub target_dir: PathBuf,
    sources: HashMap<&'static str, ConfigSource>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_dir: ConfigLoader::default_cache_dir(),
            max_workers: 8,
            fetch_timeout: Duration::from_secs(30),
            allow_prereleases: false,
            lock_wait: LockWait::Block,
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            target_dir: PathBuf::from(".pyx/site-packages"),
            sources: HashMap::new(),
        }
    }
}

impl Config {
    /// Defaults overridden by the environment
    pub fn from_env() -> Self {
        let mut config = Config::default();
        ConfigLoader::new().apply(&mut config);
        config
    }

    /// Layer the Pipfile's own settings on top
    pub fn merge_settings(&mut self, settings: &Settings) {
        if let Some(allow) = settings.allow_prereleases {
            self.allow_prereleases = allow;
            self.sources.insert("allow-prereleases", ConfigSource::Pipfile);
        }
    }

    /// Where a value came from, `Default` unless something overrode it
    pub fn get_source(&self, key: &str) -> ConfigSource {
        self.sources.get(key).copied().unwrap_or(ConfigSource::Default)
    }

    pub fn get_target_dir(&self, project_root: &Path) -> PathBuf {
        if self.target_dir.is_absolute() {
            self.target_dir.clone()
        } else {
            project_root.join(&self.target_dir)
        }
    }
}

/// Reads `PYX_*` environment variables
pub struct ConfigLoader {
    prefix: &'static str,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        ConfigLoader { prefix: "PYX_" }
    }

    pub fn default_cache_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pyx").map(|dirs| dirs.cache_dir().to_path_buf())
    }

    fn env_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase().replace('-', "_"))
    }

    pub fn get_env(&self, key: &str) -> Option<String> {
        env::var(self.env_name(key)).ok().filter(|v| !v.trim().is_empty())
    }

    pub fn get_env_u64(&self, key: &str) -> Option<u64> {
        let raw = self.get_env(key)?;
        match raw.trim().parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring {}={}: not a number", self.env_name(key), raw);
                None
            }
        }
    }

    pub fn get_env_bool(&self, key: &str) -> Option<bool> {
        let raw = self.get_env(key)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                log::warn!("Ignoring {}={}: not a boolean", self.env_name(key), raw);
                None
            }
        }
    }

    pub fn get_env_path(&self, key: &str) -> Option<PathBuf> {
        self.get_env(key).map(PathBuf::from)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(dir) = self.get_env_path("cache-dir") {
            config.cache_dir = Some(dir);
            config.sources.insert("cache-dir", ConfigSource::Environment);
        }
        if self.get_env_bool("no-cache") == Some(true) {
            config.cache_dir = None;
            config.sources.insert("cache-dir", ConfigSource::Environment);
        }
        if let Some(workers) = self.get_env_u64("max-workers") {
            config.max_workers = workers.max(1) as usize;
            config.sources.insert("max-workers", ConfigSource::Environment);
        }
        if let Some(seconds) = self.get_env_u64("timeout") {
            config.fetch_timeout = Duration::from_secs(seconds.max(1));
            config.sources.insert("timeout", ConfigSource::Environment);
        }
        if let Some(allow) = self.get_env_bool("allow-prereleases") {
            config.allow_prereleases = allow;
            config.sources.insert("allow-prereleases", ConfigSource::Environment);
        }
        if let Some(nowait) = self.get_env_bool("lock-nowait") {
            config.lock_wait = if nowait { LockWait::FailFast } else { LockWait::Block };
            config.sources.insert("lock-nowait", ConfigSource::Environment);
        }
        if let Some(python) = self.get_env("python-version") {
            config.python_version = python.trim().to_string();
            config.sources.insert("python-version", ConfigSource::Environment);
        }
        if let Some(dir) = self.get_env_path("target-dir") {
            config.target_dir = dir;
            config.sources.insert("target-dir", ConfigSource::Environment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert!(!config.allow_prereleases);
        assert_eq!(config.lock_wait, LockWait::Block);
        assert_eq!(config.get_source("max-workers"), ConfigSource::Default);
    }

    #[test]
    fn test_environment_overrides() {
        // Unique variable names keep this independent of other tests.
        env::set_var("PYXTEST_MAX_WORKERS", "3");
        env::set_var("PYXTEST_LOCK_NOWAIT", "yes");
        env::set_var("PYXTEST_TIMEOUT", "abc");

        let loader = ConfigLoader { prefix: "PYXTEST_" };
        let mut config = Config::default();
        loader.apply(&mut config);

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.lock_wait, LockWait::FailFast);
        assert_eq!(config.fetch_timeout, Duration::from_secs(30));
        assert_eq!(config.get_source("max-workers"), ConfigSource::Environment);

        env::remove_var("PYXTEST_MAX_WORKERS");
        env::remove_var("PYXTEST_LOCK_NOWAIT");
        env::remove_var("PYXTEST_TIMEOUT");
    }

    #[test]
    fn test_pipfile_settings_win() {
        let mut config = Config::default();
        config.merge_settings(&Settings {
            allow_prereleases: Some(true),
        });
        assert!(config.allow_prereleases);
        assert_eq!(config.get_source("allow-prereleases"), ConfigSource::Pipfile);
    }

    #[test]
    fn test_relative_target_dir() {
        let config = Config::default();
        assert_eq!(
            config.get_target_dir(Path::new("/project")),
            PathBuf::from("/project/.pyx/site-packages")
        );
    }
}
