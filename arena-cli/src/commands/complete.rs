//! Shell completion helpers.

use anyhow::{Context, Result};
use arena_core::Config;
use std::fs;
use std::path::Path;

/// Names of the subdirectories of `dir` that contain `build_file`, sorted.
pub fn buildable_subdirectories(dir: &Path, build_file: &str) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join(build_file).is_file())
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .collect();
    names.sort();
    Ok(names)
}

/// Prints completion candidates for `arena build`.
pub fn build(dir: Option<&Path>) -> Result<()> {
    // Completion must stay quiet, so a broken config falls back to defaults
    let config = Config::load().unwrap_or_default();
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let dir = dir.unwrap_or(&cwd);

    for name in buildable_subdirectories(dir, &config.build_file)? {
        println!("{}", name);
    }
    Ok(())
}
