//! Docker Engine API backend.

use super::{BuildRequest, ContainerEngine, ProgressMessage, ProgressStream};
use crate::error::{ArenaError, Result};
use async_trait::async_trait;
use bollard::errors::Error as DockerError;
use bollard::image::BuildImageOptions;
use bollard::models::BuildInfo;
use bollard::Docker;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, instrument};

/// Buffered progress messages between the engine connection and the consumer.
const PROGRESS_BUFFER: usize = 64;

/// Builds images through the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ArenaError::EngineUnavailable { reason: e.to_string() })?;
        Ok(Self { docker })
    }

    pub fn with_client(docker: Docker) -> Self {
        Self { docker }
    }
}

/// Split engine errors into "could not talk to the engine" and "the build failed".
fn classify(err: DockerError) -> ArenaError {
    match err {
        DockerError::DockerStreamError { error } => ArenaError::BuildFailed { reason: error },
        DockerError::DockerResponseServerError { status_code, message } => {
            ArenaError::BuildFailed {
                reason: format!("engine returned {}: {}", status_code, message),
            }
        }
        other => ArenaError::EngineUnavailable { reason: other.to_string() },
    }
}

/// Map one build progress record onto a [`ProgressMessage`].
///
/// Errors win over everything else in the record. Records carrying nothing
/// displayable yield `None`.
fn from_build_info(info: BuildInfo) -> Option<ProgressMessage> {
    if let Some(message) = info.error.or(info.error_detail.and_then(|detail| detail.message)) {
        return Some(ProgressMessage::Error { message });
    }
    if let Some(image_id) = info.aux.and_then(|aux| aux.id) {
        return Some(ProgressMessage::Aux { image_id });
    }
    if let Some(text) = info.stream {
        return Some(ProgressMessage::Stream(text));
    }
    info.status.map(|status| ProgressMessage::Status {
        id: info.id,
        status,
        progress: info.progress,
    })
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| ArenaError::EngineUnavailable {
            reason: format!("cannot reach Docker daemon: {}", e),
        })?;
        debug!("Docker daemon is reachable");
        Ok(())
    }

    #[instrument(skip_all, fields(tag = %request.tag))]
    async fn build_image(&self, request: BuildRequest) -> Result<ProgressStream> {
        let options = BuildImageOptions {
            dockerfile: request.build_file,
            t: request.tag,
            labels: request.labels.into_iter().collect::<HashMap<_, _>>(),
            rm: true,
            ..Default::default()
        };

        let docker = self.docker.clone();
        let context = request.context;
        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);

        tokio::spawn(async move {
            let mut progress = Box::pin(docker.build_image(options, None, Some(context.into())));

            while let Some(item) = progress.next().await {
                let message = match item {
                    Ok(info) => match from_build_info(info) {
                        Some(message) => Ok(message),
                        None => continue,
                    },
                    Err(e) => Err(classify(e)),
                };

                let failed = message.is_err();
                if tx.send(message).await.is_err() {
                    debug!("Progress consumer went away, abandoning build stream");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    fn name(&self) -> &str {
        "docker"
    }
}
