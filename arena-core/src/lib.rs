//! Arena Core Library
//!
//! The build-and-watch pipeline behind `arena build`: manifest validation,
//! build-instruction policy, deterministic context packaging, container
//! engine builds and recursive change watching.

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod manifest;
pub mod observability;
pub mod paths;
pub mod pipeline;
pub mod watcher;

// Re-export commonly used items
pub use config::{Config, GuardPolicy};
pub use engine::{ContainerEngine, DockerEngine, ProgressMessage, ScriptedEngine};
pub use error::{ArenaError, Result};
pub use gate::RebuildGate;
pub use manifest::AgentManifest;
pub use observability::init as init_observability;
pub use pipeline::{BuildOptions, BuildPipeline, BuildState};
pub use watcher::{RecursiveWatcher, WatchHandle, WatchOptions};
