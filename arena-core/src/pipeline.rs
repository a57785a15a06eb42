//! Build loop controller.
//!
//! Runs one validate, package and build cycle for a source tree and, in watch
//! mode, keeps rebuilding whenever the tree changes:
//!
//! ```text
//! Idle → Validating → Packaging → Building → Succeeded → Terminal
//!                                                  ↓
//!            Validating ← AwaitingChange ←─────────┘
//! ```
//!
//! Any step can fail into `Failed`, and so can a watcher error while
//! awaiting changes. Outside watch mode every failure is
//! terminal. In watch mode, validation and watcher failures are terminal
//! while packaging, guard and engine failures are reported and the loop
//! waits for the next change.

use crate::builder::archive::pack_blocking;
use crate::builder::guard::InstructionGuard;
use crate::builder::output_stream::Console;
use crate::config::{Config, GuardPolicy};
use crate::engine::{invoke_build, BuildRequest, BuildSummary, ContainerEngine};
use crate::error::{ArenaError, Result};
use crate::gate::RebuildGate;
use crate::manifest::{self, check_source_tree};
use crate::watcher::{RecursiveWatcher, WatchOptions};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Where the pipeline is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    Validating,
    Packaging,
    Building,
    Succeeded,
    AwaitingChange,
    Failed,
    Terminal,
}

impl BuildState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: BuildState) -> bool {
        use BuildState::*;

        matches!(
            (self, next),
            (Idle, Validating)
                | (Idle, Failed)
                | (Validating, Packaging)
                | (Validating, Failed)
                | (Packaging, Building)
                | (Packaging, Failed)
                | (Building, Succeeded)
                | (Building, Failed)
                | (Succeeded, AwaitingChange)
                | (Succeeded, Terminal)
                | (AwaitingChange, Validating)
                | (AwaitingChange, Failed)
                | (AwaitingChange, Terminal)
                | (Failed, AwaitingChange)
                | (Failed, Terminal)
        )
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::Idle => "idle",
            BuildState::Validating => "validating",
            BuildState::Packaging => "packaging",
            BuildState::Building => "building",
            BuildState::Succeeded => "succeeded",
            BuildState::AwaitingChange => "awaiting-change",
            BuildState::Failed => "failed",
            BuildState::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Per-invocation options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Keep rebuilding on changes instead of building once.
    pub watch: bool,
}

/// Resolve the source directory, defaulting to the current directory.
///
/// The current directory is only accepted when it holds the build file, so
/// running the tool from the wrong place fails with a usage error.
pub fn resolve_source_dir(dir: Option<&Path>, build_file: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| ArenaError::Io { path: PathBuf::from("."), source: e })?;

    match dir {
        Some(dir) if dir.is_absolute() => Ok(dir.to_path_buf()),
        Some(dir) => Ok(cwd.join(dir)),
        None => {
            check_source_tree(&cwd, build_file)?;
            Ok(cwd)
        }
    }
}

/// Drives build cycles for one source tree.
pub struct BuildPipeline {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    guard: InstructionGuard,
    options: BuildOptions,
    console: Console,
    state: BuildState,
    transitions: Vec<(BuildState, BuildState)>,
}

impl BuildPipeline {
    pub fn new(
        config: Config,
        engine: Arc<dyn ContainerEngine>,
        options: BuildOptions,
        console: Console,
    ) -> Self {
        let guard = InstructionGuard::new(&config.forbidden_instructions, config.guard_policy);
        Self {
            config,
            engine,
            guard,
            options,
            console,
            state: BuildState::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Every transition taken so far, in order.
    pub fn transitions(&self) -> &[(BuildState, BuildState)] {
        &self.transitions
    }

    pub fn guard_policy(&self) -> GuardPolicy {
        self.guard.policy()
    }

    fn transition(&mut self, next: BuildState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal build state transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Build state transition");
        self.transitions.push((self.state, next));
        self.state = next;
    }

    /// Move to `Terminal` through `Failed` where allowed and return `err`.
    fn terminate(&mut self, err: ArenaError) -> Result<()> {
        if self.state != BuildState::Failed && self.state.can_transition_to(BuildState::Failed) {
            self.transition(BuildState::Failed);
        }
        self.transition(BuildState::Terminal);
        Err(err)
    }

    /// Build the agent in `source_dir` (or the current directory).
    ///
    /// Returns once the build finished, or in watch mode once a terminal
    /// condition is reached. Use [`ArenaError::show_usage`] on the error to
    /// decide whether usage help applies.
    #[instrument(skip(self), fields(watch = self.options.watch))]
    pub async fn run(&mut self, source_dir: Option<&Path>) -> Result<()> {
        let dir = match self.prepare(source_dir).await {
            Ok(dir) => dir,
            Err(err) => return self.terminate(err),
        };

        if !self.options.watch {
            return match self.run_cycle(&dir).await {
                Ok(()) => {
                    self.transition(BuildState::Terminal);
                    Ok(())
                }
                Err(err) => self.terminate(err),
            };
        }

        let gate = Arc::new(RebuildGate::new());
        let options = WatchOptions::from_config(&self.config);
        let _watch = match RecursiveWatcher::register(&dir, &options, gate.clone()) {
            Ok(handle) => handle,
            Err(err) => return self.terminate(err),
        };

        self.watch_loop(&dir, &gate).await
    }

    /// Resolve and check the source tree, then make sure the engine answers.
    async fn prepare(&mut self, source_dir: Option<&Path>) -> Result<PathBuf> {
        let dir = resolve_source_dir(source_dir, &self.config.build_file)?;
        check_source_tree(&dir, &self.config.build_file)?;
        self.console.welcome(&dir, self.options.watch);
        self.engine.ping().await?;
        info!(engine = self.engine.name(), "Using container engine");
        Ok(dir)
    }

    /// Build `dir`, then rebuild after every signal from `gate` until a terminal error.
    ///
    /// The caller owns whatever feeds the gate.
    pub async fn watch_loop(&mut self, dir: &Path, gate: &RebuildGate) -> Result<()> {
        loop {
            match self.run_cycle(dir).await {
                Ok(()) => {}
                Err(err) if err.ends_watch() => return self.terminate(err),
                Err(err) => {
                    error!("Build cycle failed: {}", err);
                    self.console.cycle_failed(&err);
                }
            }

            self.transition(BuildState::AwaitingChange);
            self.console.awaiting_changes(dir);

            if let Err(err) = gate.wait().await {
                return self.terminate(err);
            }
            info!("Change detected, rebuilding");
        }
    }

    /// One full cycle. Leaves the state at `Succeeded` or `Failed`.
    async fn run_cycle(&mut self, dir: &Path) -> Result<()> {
        match self.cycle_steps(dir).await {
            Ok((id, summary)) => {
                self.transition(BuildState::Succeeded);
                self.console.success(&id, summary.image_id.as_deref());
                Ok(())
            }
            Err(err) => {
                self.transition(BuildState::Failed);
                Err(err)
            }
        }
    }

    async fn cycle_steps(&mut self, dir: &Path) -> Result<(String, BuildSummary)> {
        self.transition(BuildState::Validating);
        let manifest = manifest::load(dir, &self.config)?;
        let labels = manifest.labels(&self.config.manifest_label_key)?;

        self.transition(BuildState::Packaging);
        let build_file = dir.join(&self.config.build_file);
        let content = tokio::fs::read(&build_file)
            .await
            .map_err(|e| ArenaError::Io { path: build_file.clone(), source: e })?;

        let report = self.guard.scan(&content);
        for (instruction, line) in report.iter() {
            self.console.forbidden_instruction(instruction, line);
        }
        self.guard.enforce(&report)?;

        self.console.building(&manifest.id, &manifest.name);
        let context = pack_blocking(dir.to_path_buf()).await?;
        debug!(
            "Build context has {} entries ({} bytes)",
            context.records().len(),
            context.as_bytes().len()
        );

        self.transition(BuildState::Building);
        let request = BuildRequest {
            context: context.into_bytes(),
            build_file: self.config.build_file.clone(),
            tag: manifest.image_tag().to_string(),
            labels,
        };
        let summary = invoke_build(self.engine.as_ref(), request, &mut self.console).await?;

        Ok((manifest.id, summary))
    }
}
