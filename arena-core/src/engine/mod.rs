//! Container engine abstraction.
//!
//! The pipeline hands a packed build context to a [`ContainerEngine`] and
//! consumes the progress messages it streams back:
//! - [`DockerEngine`]: the Docker Engine API (production)
//! - [`ScriptedEngine`]: an in-memory engine replaying scripted responses

pub mod docker;
pub mod fake;

pub use docker::DockerEngine;
pub use fake::{RecordedBuild, ScriptedEngine};

use crate::builder::output_stream::Console;
use crate::error::{ArenaError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// Everything the engine needs for one image build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Tar archive of the source tree.
    pub context: Vec<u8>,
    /// Build file name inside the context.
    pub build_file: String,
    /// Tag applied to the resulting image.
    pub tag: String,
    pub labels: BTreeMap<String, String>,
}

/// One decoded progress message from an image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// Build output text (`RUN` output, step headers).
    Stream(String),
    /// Layer or pull status, optionally with a progress bar.
    Status { id: Option<String>, status: String, progress: Option<String> },
    /// Final image identifier.
    Aux { image_id: String },
    /// The build failed on the engine side.
    Error { message: String },
}

/// Progress messages of a running build, in arrival order.
pub type ProgressStream = BoxStream<'static, Result<ProgressMessage>>;

/// Container engine trait.
///
/// Implementations classify failures: an unreachable engine is
/// `EngineUnavailable`, a build the engine rejected is `BuildFailed`.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Start an image build and stream its progress.
    async fn build_image(&self, request: BuildRequest) -> Result<ProgressStream>;

    /// Engine name (for logging).
    fn name(&self) -> &str;
}

/// Result of a completed build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Image id reported by the engine, if it sent one.
    pub image_id: Option<String>,
    pub messages: usize,
}

/// Submit a build and render its progress until the stream ends.
///
/// An `Error` message fails the build even though the transport succeeded.
#[instrument(skip_all, fields(engine = engine.name(), tag = %request.tag))]
pub async fn invoke_build(
    engine: &dyn ContainerEngine,
    request: BuildRequest,
    console: &mut Console,
) -> Result<BuildSummary> {
    debug!("Submitting {} byte build context", request.context.len());
    let mut stream = engine.build_image(request).await?;
    let mut summary = BuildSummary::default();

    while let Some(message) = stream.next().await {
        let message = message?;
        summary.messages += 1;
        console.progress(&message);

        match message {
            ProgressMessage::Error { message } => {
                return Err(ArenaError::BuildFailed { reason: message });
            }
            ProgressMessage::Aux { image_id } => summary.image_id = Some(image_id),
            ProgressMessage::Stream(_) | ProgressMessage::Status { .. } => {}
        }
    }

    info!(image_id = ?summary.image_id, "Build finished after {} messages", summary.messages);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tag: &str) -> BuildRequest {
        BuildRequest {
            context: Vec::new(),
            build_file: "Dockerfile".into(),
            tag: tag.into(),
            labels: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_invoke_build_collects_image_id() {
        let engine = ScriptedEngine::new();
        let (mut console, buffer) = Console::buffer();

        let summary = invoke_build(&engine, request("fox-42"), &mut console).await.unwrap();
        assert!(summary.image_id.is_some());
        assert!(summary.messages >= 2);
        assert_eq!(engine.builds()[0].tag, "fox-42");

        let output = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Successfully built"));
    }

    #[tokio::test]
    async fn test_error_message_fails_build() {
        let engine = ScriptedEngine::new().with_responses(vec![vec![
            ProgressMessage::Stream("Step 1/2 : FROM scratch\n".into()),
            ProgressMessage::Error { message: "The command '/bin/sh -c false' returned 1".into() },
            ProgressMessage::Aux { image_id: "sha256:never".into() },
        ]]);
        let (mut console, _) = Console::buffer();

        match invoke_build(&engine, request("fox"), &mut console).await {
            Err(ArenaError::BuildFailed { reason }) => assert!(reason.contains("returned 1")),
            other => panic!("expected BuildFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_engine() {
        let engine = ScriptedEngine::unreachable();
        let (mut console, _) = Console::buffer();

        assert!(matches!(engine.ping().await, Err(ArenaError::EngineUnavailable { .. })));
        assert!(matches!(
            invoke_build(&engine, request("fox"), &mut console).await,
            Err(ArenaError::EngineUnavailable { .. })
        ));
    }
}
