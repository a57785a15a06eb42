//! Centralized path configuration for arena.
//!
//! All user-level paths should go through this module so the CLI and tests
//! resolve the same locations.

use std::path::PathBuf;

/// Get the arena configuration directory.
///
/// Resolution order:
/// 1. `ARENA_CONFIG_DIR` environment variable
/// 2. `<platform config dir>/arena` (e.g. `~/.config/arena`)
/// 3. `./.arena` when no home directory can be determined
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ARENA_CONFIG_DIR") {
        return PathBuf::from(dir);
    }

    dirs::config_dir().map(|d| d.join("arena")).unwrap_or_else(|| PathBuf::from(".arena"))
}

/// Get the configuration file path.
pub fn config_file() -> PathBuf {
    config_dir().join("config.json")
}
