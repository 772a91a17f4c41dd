//! Image queries and the producers behind pulls and builds.
//!
//! Pulls and builds stream progress from the daemon. A [`DockerManager`]
//! starts the operation on a background task and pushes that progress into
//! a [`ResultCallback`] sink, so callers can wait on the sink with a bounded
//! timeout and inspect what accumulated.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bollard::models::{BuildInfo, CreateImageInfo};
use bollard::Docker;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::callback::{feed, ResultCallback};
use crate::error::DockerError;

/// Sink receiving pull progress.
pub type PullSink = Arc<dyn ResultCallback<CreateImageInfo, DockerError>>;

/// Sink receiving build progress.
pub type BuildSink = Arc<dyn ResultCallback<BuildInfo, DockerError>>;

/// Everything needed to build an image from a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Directory sent to the daemon as the build context.
    pub context_dir: PathBuf,
    /// Dockerfile name relative to the context directory.
    pub dockerfile: String,
    /// Tag applied to the built image.
    pub tag: String,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl BuildRequest {
    pub fn new(context_dir: impl Into<PathBuf>, tag: impl Into<String>) -> Self {
        Self {
            context_dir: context_dir.into(),
            dockerfile: "Dockerfile".to_string(),
            tag: tag.into(),
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    pub fn with_build_args(mut self, build_args: BTreeMap<String, String>) -> Self {
        self.build_args = build_args;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Docker operations used by the require-image flow.
///
/// `pull_image` and `build_image` return as soon as the operation has been
/// started; progress arrives on the sink from a spawned task, whose handle
/// is returned so the caller can abort it. They must be called from within
/// a tokio runtime.
#[async_trait]
pub trait DockerManager: Send + Sync {
    async fn image_exists_locally(&self, name: &str) -> Result<bool, DockerError>;

    fn pull_image(&self, image: &str, sink: PullSink) -> JoinHandle<()>;

    fn build_image(
        &self,
        request: BuildRequest,
        sink: BuildSink,
    ) -> Result<JoinHandle<()>, DockerError>;

    /// Tags `source` as `repo:tag`.
    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<(), DockerError>;
}

/// Connects to the local Docker daemon using the environment's defaults.
pub fn connect_local() -> Result<Docker, DockerError> {
    Docker::connect_with_local_defaults()
        .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))
}

/// [`DockerManager`] talking to a daemon through bollard.
#[derive(Debug, Clone)]
pub struct BollardDockerManager {
    docker: Docker,
}

impl BollardDockerManager {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the daemon is not accessible.
    pub fn connect() -> Result<Self, DockerError> {
        Ok(Self {
            docker: connect_local()?,
        })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }
}

#[async_trait]
impl DockerManager for BollardDockerManager {
    async fn image_exists_locally(&self, name: &str) -> Result<bool, DockerError> {
        match self.docker.inspect_image(name).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(DockerError::Api(e)),
        }
    }

    fn pull_image(&self, image: &str, sink: PullSink) -> JoinHandle<()> {
        let docker = self.docker.clone();
        let image = image.to_string();
        tokio::spawn(async move {
            let options = CreateImageOptions {
                from_image: image.clone(),
                ..Default::default()
            };
            let progress = docker
                .create_image(Some(options), None, None)
                .map(|event| match event {
                    Ok(CreateImageInfo {
                        error: Some(message),
                        ..
                    }) => Err(DockerError::PullFailed(message)),
                    Ok(info) => Ok(info),
                    Err(e) => Err(DockerError::Api(e)),
                });
            tracing::debug!(image = %image, "Pull started");
            feed(progress, sink.as_ref()).await;
        })
    }

    fn build_image(
        &self,
        request: BuildRequest,
        sink: BuildSink,
    ) -> Result<JoinHandle<()>, DockerError> {
        let context = pack_build_context(&request.context_dir)?;
        let docker = self.docker.clone();
        Ok(tokio::spawn(async move {
            let options = BuildImageOptions {
                dockerfile: request.dockerfile.clone(),
                t: request.tag.clone(),
                buildargs: to_hash_map(&request.build_args),
                labels: to_hash_map(&request.labels),
                rm: true,
                ..Default::default()
            };
            let progress = docker
                .build_image(options, None, Some(context.into()))
                .map(|event| match event {
                    Ok(BuildInfo {
                        error: Some(message),
                        ..
                    }) => Err(DockerError::BuildFailed(message)),
                    Ok(info) => Ok(info),
                    Err(e) => Err(DockerError::Api(e)),
                });
            tracing::debug!(tag = %request.tag, "Build started");
            feed(progress, sink.as_ref()).await;
        }))
    }

    async fn tag_image(&self, source: &str, repo: &str, tag: &str) -> Result<(), DockerError> {
        let options = TagImageOptions {
            repo: repo.to_string(),
            tag: tag.to_string(),
        };
        self.docker
            .tag_image(source, Some(options))
            .await
            .map_err(|e| DockerError::TagFailed(format!("{source} -> {repo}:{tag}: {e}")))
    }
}

fn to_hash_map(map: &BTreeMap<String, String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

/// Packs `dir` into a gzip-compressed tarball rooted at the directory.
pub fn pack_build_context(dir: &Path) -> Result<Vec<u8>, DockerError> {
    let context_error = |e: std::io::Error| DockerError::BuildContext {
        path: dir.display().to_string(),
        reason: e.to_string(),
    };
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(true);
    archive.append_dir_all(".", dir).map_err(context_error)?;
    let encoder = archive.into_inner().map_err(context_error)?;
    encoder.finish().map_err(context_error)
}
