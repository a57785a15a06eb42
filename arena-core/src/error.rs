//! Error types for arena.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for arena operations.
pub type Result<T> = std::result::Result<T, ArenaError>;

/// Main error type for the build pipeline.
#[derive(Error, Debug)]
pub enum ArenaError {
    // Source tree validation errors
    #[error("Directory does not exist: {path:?}")]
    DirectoryNotFound { path: PathBuf },

    #[error("Not a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    #[error(
        "Build file {file} not found in {directory:?}; is it really the source code of an agent?"
    )]
    BuildFileNotFound { directory: PathBuf, file: String },

    #[error("Agent manifest {file} not found in {directory:?}")]
    ManifestNotFound { directory: PathBuf, file: String },

    // Manifest content errors
    #[error("Invalid agent manifest at {path:?}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    // Policy errors
    #[error("Forbidden instructions in build file: {}", names.join(", "))]
    ForbiddenInstructions { names: Vec<String> },

    // Packaging errors
    #[error("Failed to archive {path:?}: {source}")]
    ArchiveFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Container engine errors
    #[error("Container engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    #[error("Build failed: {reason}")]
    BuildFailed { reason: String },

    // Watch errors
    #[error("Watch failed: {reason}")]
    WatchFailed { reason: String },

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArenaError {
    /// Whether the caller should print usage help alongside the error.
    ///
    /// Only errors caused by pointing the tool at the wrong place qualify;
    /// a directory with bad contents or a broken environment does not.
    pub fn show_usage(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound { .. }
                | Self::NotADirectory { .. }
                | Self::BuildFileNotFound { .. }
                | Self::ManifestNotFound { .. }
        )
    }

    /// Whether this error terminates watch mode instead of waiting for the next change.
    pub fn ends_watch(&self) -> bool {
        match self {
            Self::DirectoryNotFound { .. }
            | Self::NotADirectory { .. }
            | Self::BuildFileNotFound { .. }
            | Self::ManifestNotFound { .. }
            | Self::InvalidManifest { .. }
            | Self::WatchFailed { .. }
            | Self::InvalidConfig { .. } => true,
            Self::ForbiddenInstructions { .. }
            | Self::ArchiveFailed { .. }
            | Self::EngineUnavailable { .. }
            | Self::BuildFailed { .. }
            | Self::Io { .. } => false,
        }
    }

    /// Create a watch error from any error type.
    pub fn watch(err: impl std::fmt::Display) -> Self {
        Self::WatchFailed { reason: err.to_string() }
    }
}
