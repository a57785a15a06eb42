//! In-memory container engine.
//!
//! Records every build request and replays scripted progress. Used by the
//! test suites and handy for dry runs.

use super::{BuildRequest, ContainerEngine, ProgressMessage, ProgressStream};
use crate::error::{ArenaError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

type BuildHook = Box<dyn Fn(usize) + Send + Sync>;

/// A build request as the fake engine received it.
#[derive(Debug, Clone)]
pub struct RecordedBuild {
    pub tag: String,
    pub build_file: String,
    pub labels: BTreeMap<String, String>,
    pub context: Vec<u8>,
}

impl RecordedBuild {
    /// Entry paths of the recorded build context, in archive order.
    pub fn paths(&self) -> Vec<String> {
        let mut archive = tar::Archive::new(self.context.as_slice());
        let Ok(entries) = archive.entries() else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                entry
                    .path()
                    .ok()
                    .map(|p| p.to_string_lossy().trim_end_matches('/').to_string())
            })
            .collect()
    }
}

/// Scripted [`ContainerEngine`].
///
/// Each build consumes the next scripted response; once the script runs out
/// every build succeeds with a generated image id.
pub struct ScriptedEngine {
    reachable: bool,
    responses: Mutex<VecDeque<Vec<ProgressMessage>>>,
    builds: Mutex<Vec<RecordedBuild>>,
    pings: AtomicUsize,
    hook: Option<BuildHook>,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            reachable: true,
            responses: Mutex::new(VecDeque::new()),
            builds: Mutex::new(Vec::new()),
            pings: AtomicUsize::new(0),
            hook: None,
        }
    }

    /// An engine that refuses every call with `EngineUnavailable`.
    pub fn unreachable() -> Self {
        Self { reachable: false, ..Self::new() }
    }

    /// Queue responses for the next builds, in order.
    pub fn with_responses(self, responses: Vec<Vec<ProgressMessage>>) -> Self {
        self.responses.lock().unwrap_or_else(|e| e.into_inner()).extend(responses);
        self
    }

    /// Run `hook` with the zero-based build index whenever a build starts.
    pub fn with_build_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Default response for a successful build of `tag`.
    pub fn success(tag: &str, index: usize) -> Vec<ProgressMessage> {
        let image_id = format!("sha256:{:064x}", index + 1);
        vec![
            ProgressMessage::Stream("Step 1/1 : FROM scratch\n".to_string()),
            ProgressMessage::Aux { image_id: image_id.clone() },
            ProgressMessage::Stream(format!("Successfully built {}\n", &image_id[7..19])),
            ProgressMessage::Stream(format!("Successfully tagged {}:latest\n", tag)),
        ]
    }

    /// All builds received so far.
    pub fn builds(&self) -> Vec<RecordedBuild> {
        self.builds.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    fn unavailable() -> ArenaError {
        ArenaError::EngineUnavailable { reason: "scripted engine is unreachable".to_string() }
    }
}

#[async_trait]
impl ContainerEngine for ScriptedEngine {
    async fn ping(&self) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(Self::unavailable())
        }
    }

    async fn build_image(&self, request: BuildRequest) -> Result<ProgressStream> {
        if !self.reachable {
            return Err(Self::unavailable());
        }

        let index = {
            let mut builds = self.builds.lock().unwrap_or_else(|e| e.into_inner());
            builds.push(RecordedBuild {
                tag: request.tag.clone(),
                build_file: request.build_file,
                labels: request.labels,
                context: request.context,
            });
            builds.len() - 1
        };

        if let Some(hook) = &self.hook {
            hook(index);
        }

        let messages = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Self::success(&request.tag, index));

        Ok(futures::stream::iter(messages.into_iter().map(Ok)).boxed())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
