//! Build command implementation for the arena CLI.
//!
//! Builds an agent image once, or keeps rebuilding it in watch mode.

use anyhow::{Context, Result};
use arena_core::builder::output_stream::Console;
use arena_core::{ArenaError, BuildOptions, BuildPipeline, Config, DockerEngine, GuardPolicy};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

const USAGE: &str = "Usage: arena build [DIR] [--watch] [--deny-forbidden]

DIR is the source directory of an agent: it must contain a Dockerfile and an
agent.json manifest. Without DIR, the current directory is used.";

/// Arguments of `arena build`.
#[derive(Debug, Clone, Default)]
pub struct BuildArgs {
    pub dir: Option<PathBuf>,
    pub watch: bool,
    pub deny_forbidden: bool,
    pub config: Option<PathBuf>,
    pub verbose: bool,
}

/// Load the configuration and apply command line overrides.
fn load_config(args: &BuildArgs) -> Result<Config> {
    let path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    if args.deny_forbidden {
        config.guard_policy = GuardPolicy::Deny;
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }
    Ok(config)
}

/// Print a pipeline error and return the exit code.
fn report(err: &ArenaError) -> i32 {
    if err.show_usage() {
        eprintln!("{}\n", USAGE);
    }
    eprintln!("{} {}", "error:".red().bold(), err);
    1
}

/// Runs `arena build`. Returns the process exit code.
pub async fn build(args: BuildArgs) -> Result<i32> {
    let config = load_config(&args)?;
    arena_core::init_observability(&config.log_level)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
    debug!(?args, "Starting build");

    let engine = match DockerEngine::connect() {
        Ok(engine) => engine,
        Err(err) => return Ok(report(&err)),
    };

    // An empty argument means the current directory
    let dir = args.dir.filter(|dir| !dir.as_os_str().is_empty());
    let start_time = Instant::now();

    let mut pipeline = BuildPipeline::new(
        config,
        Arc::new(engine),
        BuildOptions { watch: args.watch },
        Console::stdout(),
    );

    let result = tokio::select! {
        result = pipeline.run(dir.as_deref()) => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Interrupted, stopping".yellow());
            return Ok(130);
        }
    };

    match result {
        Ok(()) => {
            println!(
                "{} in {}",
                "Finished".green().bold(),
                format_duration(start_time.elapsed().as_secs_f64())
            );
            Ok(0)
        }
        Err(err) => Ok(report(&err)),
    }
}

/// Formats duration in a human-readable way.
fn format_duration(secs: f64) -> String {
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs - (mins * 60.0);
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"log_level": "info", "watch_max_depth": 7}"#).unwrap();

        let args = BuildArgs {
            config: Some(path),
            deny_forbidden: true,
            verbose: true,
            ..BuildArgs::default()
        };
        let config = load_config(&args).unwrap();
        assert_eq!(config.guard_policy, GuardPolicy::Deny);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.watch_max_depth, 7);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"watch_max_depth": "deep"}"#).unwrap();

        let args = BuildArgs { config: Some(path), ..BuildArgs::default() };
        let err = load_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_report_exit_code() {
        let err = ArenaError::BuildFailed { reason: "boom".into() };
        assert_eq!(report(&err), 1);
    }

    #[test]
    fn test_format_duration_milliseconds() {
        assert_eq!(format_duration(0.123), "123ms");
    }

    #[test]
    fn test_format_duration_seconds() {
        assert_eq!(format_duration(5.7), "5.7s");
    }

    #[test]
    fn test_format_duration_minutes() {
        assert_eq!(format_duration(125.0), "2m5s");
    }
}
