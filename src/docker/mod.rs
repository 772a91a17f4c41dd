//! Docker daemon collaborators.
//!
//! - [`manager`]: image existence, pull, build and tag
//! - [`container`]: running containers, their ports and file copies
//! - [`exec`]: command execution inside running containers

pub mod container;
pub mod exec;
pub mod manager;

use bollard::models::{BuildInfo, CreateImageInfo};

pub use container::{ContainerRunner, ContainerSpec, HostAddress, PortMapping, RunningContainer};
pub use exec::{
    await_exit_code, AttachedExecutor, DetachedExecutor, DockerExecutor, ExecCompletionCheck,
    ExecInspector, ExecResult, ExecState,
};
pub use manager::{
    connect_local, pack_build_context, BollardDockerManager, BuildRequest, BuildSink,
    DockerManager, PullSink,
};

/// Pull status messages that mean the image is now present locally.
const PULL_SUCCESS_STATUSES: &[&str] = &[
    "Download complete",
    "Image is up to date",
    "Downloaded newer image",
    "this image was pulled from a legacy registry",
    ": downloaded",
];

const BUILD_SUCCESS_PREFIXES: &[&str] = &["Successfully built", "Successfully tagged"];

/// Whether a pull progress item reports that the image was obtained.
pub fn pull_success_indicated(info: &CreateImageInfo) -> bool {
    if info.error.is_some() {
        return false;
    }
    info.status
        .as_deref()
        .is_some_and(|status| PULL_SUCCESS_STATUSES.iter().any(|s| status.contains(s)))
}

/// Whether a build progress item reports a finished image.
///
/// The classic builder prints a `Successfully built` line; BuildKit reports
/// the image id in the `aux` field instead.
pub fn build_success_indicated(info: &BuildInfo) -> bool {
    if info.error.is_some() {
        return false;
    }
    if info.aux.as_ref().is_some_and(|aux| aux.id.is_some()) {
        return true;
    }
    info.stream.as_deref().is_some_and(|stream| {
        let line = stream.trim_start();
        BUILD_SUCCESS_PREFIXES.iter().any(|p| line.starts_with(p))
    })
}
