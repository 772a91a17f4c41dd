//! Ensuring a required image is present locally.
//!
//! [`require_image`] checks whether the configured image exists and, if it
//! doesn't, hands off to the [`AbsentImageActor`] chosen by the configured
//! directive. Pulls and builds are waited on through a
//! [`BlockableCallback`] bounded by the configured timeout; the producer is
//! aborted if the wait times out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::models::{BuildInfo, CreateImageInfo};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::callback::BlockableCallback;
use crate::config::RequireImageConfig;
use crate::docker::{
    build_success_indicated, pull_success_indicated, BuildRequest, BuildSink, DockerManager,
    PullSink,
};
use crate::error::{ContainmentError, DockerError};
use crate::image::{AbsentImageAction, ImageSpecifier};

const DEFAULT_TAG: &str = "latest";

/// Handles an image that is absent locally.
#[async_trait]
pub trait AbsentImageActor: Send + Sync {
    /// Acts on the absent image. `parameter` is the directive parameter, if
    /// one was given.
    async fn perform(
        &self,
        config: &RequireImageConfig,
        parameter: Option<&str>,
    ) -> Result<(), ContainmentError>;
}

/// Logs and moves on.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreImageActor;

#[async_trait]
impl AbsentImageActor for IgnoreImageActor {
    async fn perform(
        &self,
        config: &RequireImageConfig,
        _parameter: Option<&str>,
    ) -> Result<(), ContainmentError> {
        info!(image = %config.name, "Image absent; ignoring as directed");
        Ok(())
    }
}

/// Fails with [`ContainmentError::RequiredImageAbsent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FailBuildActor;

#[async_trait]
impl AbsentImageActor for FailBuildActor {
    async fn perform(
        &self,
        config: &RequireImageConfig,
        _parameter: Option<&str>,
    ) -> Result<(), ContainmentError> {
        Err(ContainmentError::RequiredImageAbsent(config.name.clone()))
    }
}

/// Pulls the image from a remote repository.
///
/// The directive parameter names the remote image; without one the
/// configured name is pulled. A remote image under a different name is
/// tagged with the configured name afterwards.
pub struct PullImageActor<'a, M: ?Sized> {
    manager: &'a M,
}

impl<'a, M: DockerManager + ?Sized> PullImageActor<'a, M> {
    pub fn new(manager: &'a M) -> Self {
        Self { manager }
    }

    /// Remote image to pull.
    pub fn resolve_remote_name(
        config: &RequireImageConfig,
        parameter: Option<&str>,
    ) -> Result<String, ContainmentError> {
        match parameter {
            Some(remote) if remote.trim().is_empty() => Err(
                ContainmentError::InvalidDirectiveParameter(
                    "pull parameter must name a remote image".to_string(),
                ),
            ),
            Some(remote) => Ok(remote.trim().to_string()),
            None => {
                config.validate()?;
                Ok(config.name.clone())
            }
        }
    }
}

#[async_trait]
impl<'a, M: DockerManager + ?Sized> AbsentImageActor for PullImageActor<'a, M> {
    async fn perform(
        &self,
        config: &RequireImageConfig,
        parameter: Option<&str>,
    ) -> Result<(), ContainmentError> {
        let remote_name = Self::resolve_remote_name(config, parameter)?;
        let remote: ImageSpecifier = remote_name.parse()?;
        let remote_ref = remote.with_default_tag(DEFAULT_TAG).to_string();

        let callback = Arc::new(BlockableCallback::<CreateImageInfo, DockerError>::new());
        let sink: PullSink = callback.clone();
        info!(image = %remote_ref, timeout = ?config.pull_timeout, "Pulling image");
        let producer = self.manager.pull_image(&remote_ref, sink);
        await_producer(&callback, producer, config.pull_timeout, "pull").await?;

        let succeeded = callback.check_succeeded(pull_success_indicated);
        info!(image = %remote_ref, succeeded, "Pull finished");
        if !succeeded {
            return Err(ContainmentError::OperationFailed {
                operation: "pull",
                summary: callback.summarize(),
            });
        }

        if remote_name != config.name {
            let local: ImageSpecifier = config.name.parse()?;
            let tag = local.tag.as_deref().unwrap_or(DEFAULT_TAG);
            self.manager
                .tag_image(&remote_ref, &local.untagged(), tag)
                .await?;
            debug!(source = %remote_ref, target = %config.name, "Tagged pulled image");
        }
        Ok(())
    }
}

/// Builds the image from a directory containing a Dockerfile.
///
/// The directive parameter names the directory; without one the default
/// directory under the configured base directory is used.
pub struct BuildImageActor<'a, M: ?Sized> {
    manager: &'a M,
}

impl<'a, M: DockerManager + ?Sized> BuildImageActor<'a, M> {
    pub fn new(manager: &'a M) -> Self {
        Self { manager }
    }

    pub fn resolve_dockerfile_dir(
        config: &RequireImageConfig,
        parameter: Option<&str>,
    ) -> Result<PathBuf, ContainmentError> {
        match parameter {
            Some(dir) if dir.trim().is_empty() => Err(
                ContainmentError::InvalidDirectiveParameter(
                    "build parameter must name a directory".to_string(),
                ),
            ),
            Some(dir) => Ok(PathBuf::from(dir.trim())),
            None => Ok(config.default_dockerfile_dir()),
        }
    }
}

#[async_trait]
impl<'a, M: DockerManager + ?Sized> AbsentImageActor for BuildImageActor<'a, M> {
    async fn perform(
        &self,
        config: &RequireImageConfig,
        parameter: Option<&str>,
    ) -> Result<(), ContainmentError> {
        config.validate()?;
        let dir = Self::resolve_dockerfile_dir(config, parameter)?;
        let dockerfile = find_dockerfile(&dir)?;
        let dockerfile_name = dockerfile
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "Dockerfile".to_string());

        let request = BuildRequest::new(&dir, config.name.clone())
            .with_dockerfile(dockerfile_name)
            .with_build_args(config.build_args.clone())
            .with_labels(config.labels.clone());

        let callback = Arc::new(BlockableCallback::<BuildInfo, DockerError>::new());
        let sink: BuildSink = callback.clone();
        info!(
            image = %config.name,
            dir = %dir.display(),
            timeout = ?config.build_timeout,
            "Building image"
        );
        let producer = self.manager.build_image(request, sink)?;
        await_producer(&callback, producer, config.build_timeout, "build").await?;

        let succeeded = callback.check_succeeded(build_success_indicated);
        info!(image = %config.name, succeeded, "Build finished");
        if !succeeded {
            return Err(ContainmentError::OperationFailed {
                operation: "build",
                summary: callback.summarize(),
            });
        }
        Ok(())
    }
}

/// Waits for the producer to signal completion, aborting it on timeout.
async fn await_producer<T, E>(
    callback: &BlockableCallback<T, E>,
    producer: JoinHandle<()>,
    timeout: Duration,
    operation: &'static str,
) -> Result<(), ContainmentError> {
    let waited = callback
        .complete_or_else(timeout, || ContainmentError::Timeout { operation, timeout })
        .await;
    if waited.is_err() {
        debug!(operation, "Aborting producer after timeout");
        producer.abort();
    }
    waited
}

/// Finds the Dockerfile in `dir`, matching the file name case-insensitively
/// and preferring an exact `Dockerfile`.
pub fn find_dockerfile(dir: &Path) -> Result<PathBuf, ContainmentError> {
    if !dir.is_dir() {
        return Err(ContainmentError::InvalidDockerfileDir(format!(
            "not a directory: {}",
            dir.display()
        )));
    }
    let exact = dir.join("Dockerfile");
    let dockerfile = if exact.is_file() {
        exact
    } else {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            ContainmentError::InvalidDockerfileDir(format!("{}: {e}", dir.display()))
        })?;
        entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .find(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .is_some_and(|name| name.eq_ignore_ascii_case("dockerfile"))
            })
            .ok_or_else(|| {
                ContainmentError::InvalidDockerfileDir(format!(
                    "no Dockerfile in {}",
                    dir.display()
                ))
            })?
    };
    std::fs::File::open(&dockerfile).map_err(|e| {
        ContainmentError::InvalidDockerfileDir(format!(
            "Dockerfile not readable: {}: {e}",
            dockerfile.display()
        ))
    })?;
    Ok(dockerfile)
}

/// Actor handling `action`.
pub fn determine_actor<'a, M>(manager: &'a M, action: AbsentImageAction) -> Box<dyn AbsentImageActor + 'a>
where
    M: DockerManager + ?Sized,
{
    match action {
        AbsentImageAction::Pull => Box::new(PullImageActor::new(manager)),
        AbsentImageAction::Build => Box::new(BuildImageActor::new(manager)),
        AbsentImageAction::Fail => Box::new(FailBuildActor),
        AbsentImageAction::Ignore => Box::new(IgnoreImageActor),
    }
}

/// Makes sure the configured image is present locally, acting on its
/// absence as the configured directive says.
pub async fn require_image<M>(manager: &M, config: &RequireImageConfig) -> Result<(), ContainmentError>
where
    M: DockerManager + ?Sized,
{
    config.validate()?;
    let directive = config.absent_image_action.as_ref().ok_or_else(|| {
        ContainmentError::InvalidDirectiveParameter(
            "an absent-image action must be specified".to_string(),
        )
    })?;

    let present = manager.image_exists_locally(&config.name).await?;
    debug!(image = %config.name, present, "Checked local image");
    if present {
        return Ok(());
    }

    info!(image = %config.name, directive = %directive, "Image absent locally");
    determine_actor(manager, directive.action)
        .perform(config, directive.parameter.as_deref())
        .await
}
