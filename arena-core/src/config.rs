//! Configuration management.

use crate::error::{ArenaError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directive keywords flagged by the instruction guard unless configured otherwise.
pub const DEFAULT_FORBIDDEN_INSTRUCTIONS: &[&str] = &["ADD", "EXPOSE", "VOLUME"];

/// Maximum directory nesting registered by the watcher.
pub const DEFAULT_WATCH_MAX_DEPTH: usize = 100;

/// What the instruction guard does when it finds a forbidden directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardPolicy {
    /// Print a warning per occurrence and keep building.
    #[default]
    Warn,
    /// Fail the build cycle.
    Deny,
}

/// Persistent configuration for arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub build_file: String,
    pub manifest_file: String,
    pub manifest_label_key: String,
    pub forbidden_instructions: Vec<String>,
    pub guard_policy: GuardPolicy,
    pub watch_max_depth: usize,
    pub watch_ignore_dirs: Vec<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            build_file: "Dockerfile".to_string(),
            manifest_file: "agent.json".to_string(),
            manifest_label_key: "io.arena.agent.manifest".to_string(),
            forbidden_instructions: DEFAULT_FORBIDDEN_INSTRUCTIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            guard_policy: GuardPolicy::Warn,
            watch_max_depth: DEFAULT_WATCH_MAX_DEPTH,
            watch_ignore_dirs: vec![".git".to_string()],
            log_level: "warn".to_string(),
        }
    }
}

impl Config {
    /// Get the path to the default configuration file.
    pub fn config_path() -> PathBuf {
        paths::config_file()
    }

    /// Load configuration from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ArenaError::InvalidConfig {
            reason: format!("Failed to read config {}: {}", path.display(), e),
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| ArenaError::InvalidConfig {
            reason: format!("Failed to parse config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.build_file.trim().is_empty() {
            return Err(ArenaError::InvalidConfig { reason: "build_file must not be empty".into() });
        }
        if self.manifest_file.trim().is_empty() {
            return Err(ArenaError::InvalidConfig {
                reason: "manifest_file must not be empty".into(),
            });
        }
        if self.watch_max_depth == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "watch_max_depth must be at least 1".into(),
            });
        }
        Ok(())
    }
}
