//! Container lifecycle for test fixtures.
//!
//! A [`ContainerRunner`] creates and starts a container from a
//! [`ContainerSpec`] and hands back a [`RunningContainer`]. The running
//! container can report its published ports, copy files in and out, and run
//! commands through the executors in [`super::exec`].
//!
//! Call [`RunningContainer::close`] when done. Dropping an unclosed container
//! inside a tokio runtime schedules a best-effort stop and removal.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, DownloadFromContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions,
};
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures::TryStreamExt;
use tracing::{debug, warn};

use super::exec::{AttachedExecutor, DetachedExecutor};
use super::manager::connect_local;
use crate::config::ExecConfig;
use crate::error::{ConfigError, ContainmentError, DockerError};
use crate::settings::{LayeredSettingSet, StandardTimeout, TimeoutSetting};

/// Seconds the daemon waits after SIGTERM before killing on stop.
const STOP_GRACE_SECS: i64 = 1;

const DEFAULT_PROTOCOL: &str = "tcp";

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// Overrides the image's default command.
    pub command: Option<Vec<String>>,
    /// Container TCP ports published to ephemeral host ports.
    pub exposed_ports: BTreeSet<u16>,
    pub env: BTreeMap<String, String>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: None,
            exposed_ports: BTreeSet::new(),
            env: BTreeMap::new(),
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(command.into_iter().map(Into::into).collect());
        self
    }

    /// Publishes `port` to an ephemeral host port.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::InvalidPort` for port 0.
    pub fn expose(mut self, port: u16) -> Result<Self, DockerError> {
        if port == 0 {
            return Err(DockerError::InvalidPort(port));
        }
        self.exposed_ports.insert(port);
        Ok(self)
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

fn port_key(port: u16) -> String {
    format!("{port}/{DEFAULT_PROTOCOL}")
}

/// Create options for `spec`: removed by the daemon once stopped, with each
/// exposed port bound to a host port the daemon picks.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect();
    let port_bindings: PortMap = spec
        .exposed_ports
        .iter()
        .map(|port| {
            let binding = PortBinding {
                host_ip: None,
                host_port: None,
            };
            (port_key(*port), Some(vec![binding]))
        })
        .collect();
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    let host_config = HostConfig {
        auto_remove: Some(true),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: spec.command.clone(),
        env: (!env.is_empty()).then_some(env),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        attach_stdout: Some(true),
        ..Default::default()
    }
}

/// Host side of a published port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostAddress {
    pub ip: String,
    pub port: u16,
}

/// A container port and, if published, the host address it is bound to.
///
/// Rendered the way `docker ps` does: `0.0.0.0:32768->80/tcp` when bound,
/// `443/tcp` when not.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortMapping {
    pub container_port: u16,
    pub protocol: String,
    pub host: Option<HostAddress>,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "{}:{}->", host.ip, host.port)?;
        }
        write!(f, "{}/{}", self.container_port, self.protocol)
    }
}

fn parse_container_port(text: &str) -> Option<(u16, String)> {
    let (port, protocol) = match text.split_once('/') {
        Some((port, protocol)) => (port, protocol),
        None => (text, DEFAULT_PROTOCOL),
    };
    let port = port.trim().parse().ok()?;
    let protocol = protocol.trim();
    if protocol.is_empty() {
        return None;
    }
    Some((port, protocol.to_ascii_lowercase()))
}

impl FromStr for PortMapping {
    type Err = DockerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DockerError::InvalidPortMapping(s.to_string());
        let trimmed = s.trim();
        let (host, container) = match trimmed.split_once("->") {
            Some((host, container)) => (Some(host), container),
            None => (None, trimmed),
        };
        let (container_port, protocol) = parse_container_port(container).ok_or_else(invalid)?;
        let host = match host {
            Some(host) => {
                let (ip, port) = host.rsplit_once(':').ok_or_else(invalid)?;
                let port = port.parse().map_err(|_| invalid())?;
                let ip = ip.trim_start_matches('[').trim_end_matches(']');
                Some(HostAddress {
                    ip: ip.to_string(),
                    port,
                })
            }
            None => None,
        };
        Ok(PortMapping {
            container_port,
            protocol,
            host,
        })
    }
}

/// Flattens the daemon's port map into sorted mappings, one per host
/// binding. Ports without bindings appear once with no host.
fn port_mappings(ports: &PortMap) -> Vec<PortMapping> {
    let mut mappings = Vec::new();
    for (key, bindings) in ports {
        let Some((container_port, protocol)) = parse_container_port(key) else {
            warn!(port = %key, "Skipping unparseable container port");
            continue;
        };
        let hosts: Vec<HostAddress> = bindings
            .iter()
            .flatten()
            .filter_map(|binding| {
                let port = binding.host_port.as_deref()?.parse().ok()?;
                Some(HostAddress {
                    ip: binding.host_ip.clone().unwrap_or_default(),
                    port,
                })
            })
            .collect();
        if hosts.is_empty() {
            mappings.push(PortMapping {
                container_port,
                protocol,
                host: None,
            });
        } else {
            mappings.extend(hosts.into_iter().map(|host| PortMapping {
                container_port,
                protocol: protocol.clone(),
                host: Some(host),
            }));
        }
    }
    mappings.sort();
    mappings
}

/// Whether the daemon reports the container as already stopped or gone.
fn is_already_gone(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304 | 404 | 409,
            ..
        }
    )
}

async fn stop_and_remove(docker: &Docker, id: &str) -> Result<(), DockerError> {
    let stop = StopContainerOptions { t: STOP_GRACE_SECS };
    match docker.stop_container(id, Some(stop)).await {
        Ok(()) => {}
        Err(e) if is_already_gone(&e) => debug!(container = %id, "Container already stopped"),
        Err(e) => {
            return Err(DockerError::RunFailed(format!(
                "Failed to stop container {id}: {e}"
            )))
        }
    }

    let remove = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(id, Some(remove)).await {
        Ok(()) => {}
        Err(e) if is_already_gone(&e) => debug!(container = %id, "Container already removed"),
        Err(e) => {
            return Err(DockerError::RunFailed(format!(
                "Failed to remove container {id}: {e}"
            )))
        }
    }
    debug!(container = %id, "Container closed");
    Ok(())
}

/// Packs `source` into a tar archive whose single top-level entry carries
/// the source's file name.
fn pack_copy_archive(source: &Path) -> Result<Vec<u8>, DockerError> {
    let copy_error = |reason: String| DockerError::CopyFailed {
        path: source.display().to_string(),
        reason,
    };
    let name = source
        .file_name()
        .ok_or_else(|| copy_error("source has no file name".to_string()))?;
    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(true);
    let appended = if source.is_dir() {
        archive.append_dir_all(name, source)
    } else {
        archive.append_path_with_name(source, name)
    };
    appended.map_err(|e| copy_error(e.to_string()))?;
    archive.into_inner().map_err(|e| copy_error(e.to_string()))
}

/// Unpacks an archive produced by the daemon for a single path, placing its
/// top-level entry at `destination`.
fn unpack_copy_archive(archive: &[u8], destination: &Path) -> Result<(), DockerError> {
    let copy_error = |reason: String| DockerError::CopyFailed {
        path: destination.display().to_string(),
        reason,
    };
    let mut archive = tar::Archive::new(archive);
    let entries = archive.entries().map_err(|e| copy_error(e.to_string()))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| copy_error(e.to_string()))?;
        let path = entry
            .path()
            .map_err(|e| copy_error(e.to_string()))?
            .into_owned();
        if path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(copy_error(format!(
                "archive entry escapes destination: {}",
                path.display()
            )));
        }
        let relative: PathBuf = path
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .skip(1)
            .collect();
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| copy_error(e.to_string()))?;
        }
        entry
            .unpack(&target)
            .map_err(|e| copy_error(e.to_string()))?;
    }
    Ok(())
}

/// Creates and starts containers.
#[derive(Debug, Clone)]
pub struct ContainerRunner {
    docker: Docker,
    copy_timeout: Duration,
}

impl ContainerRunner {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            copy_timeout: StandardTimeout::Long.default_value(),
        }
    }

    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the daemon is not accessible.
    pub fn connect() -> Result<Self, DockerError> {
        Ok(Self::new(connect_local()?))
    }

    pub fn with_copy_timeout(mut self, timeout: Duration) -> Self {
        self.copy_timeout = timeout;
        self
    }

    /// Takes the copy timeout from `<domain>.timeout.copy`, if defined.
    pub fn with_settings(mut self, settings: &LayeredSettingSet) -> Result<Self, ConfigError> {
        self.copy_timeout = settings.timeouts().get("copy", self.copy_timeout)?;
        Ok(self)
    }

    pub fn copy_timeout(&self) -> Duration {
        self.copy_timeout
    }

    /// Creates and starts a container.
    ///
    /// If the container is created but fails to start, it is removed before
    /// the error is returned.
    pub async fn run(&self, spec: &ContainerSpec) -> Result<RunningContainer, DockerError> {
        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, container_config(spec))
            .await
            .map_err(|e| DockerError::RunFailed(format!("Failed to create container: {e}")))?;
        for warning in &created.warnings {
            warn!(container = %created.id, warning = %warning, "Container created with warning");
        }

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(cleanup) = stop_and_remove(&self.docker, &created.id).await {
                warn!(container = %created.id, error = %cleanup, "Failed to remove unstarted container");
            }
            return Err(DockerError::RunFailed(format!("Failed to start container: {e}")));
        }

        debug!(container = %created.id, image = %spec.image, "Container started");
        Ok(RunningContainer {
            docker: self.docker.clone(),
            id: created.id,
            copy_timeout: self.copy_timeout,
            closed: false,
        })
    }
}

/// A started container owned by the caller.
pub struct RunningContainer {
    docker: Docker,
    id: String,
    copy_timeout: Duration,
    closed: bool,
}

impl RunningContainer {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ports of the container as currently published by the daemon.
    pub async fn fetch_ports(&self) -> Result<Vec<PortMapping>, DockerError> {
        let inspected = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;
        let ports = inspected
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();
        Ok(port_mappings(&ports))
    }

    /// Copies a local file or directory into `container_dir`, which must
    /// already exist in the container. The copy keeps the source's name.
    pub async fn copy_to(&self, source: &Path, container_dir: &str) -> Result<(), ContainmentError> {
        if !source.exists() {
            return Err(DockerError::CopyFailed {
                path: source.display().to_string(),
                reason: "source does not exist".to_string(),
            }
            .into());
        }
        let archive = pack_copy_archive(source)?;
        let options = UploadToContainerOptions {
            path: container_dir.to_string(),
            ..Default::default()
        };
        let upload = self
            .docker
            .upload_to_container(&self.id, Some(options), archive.into());
        tokio::time::timeout(self.copy_timeout, upload)
            .await
            .map_err(|_| ContainmentError::Timeout {
                operation: "copy",
                timeout: self.copy_timeout,
            })?
            .map_err(|e| DockerError::CopyFailed {
                path: container_dir.to_string(),
                reason: e.to_string(),
            })?;
        debug!(container = %self.id, source = %source.display(), dest = %container_dir, "Copied into container");
        Ok(())
    }

    /// Copies `container_path` out of the container to `destination`, which
    /// names the resulting file or directory itself.
    pub async fn copy_from(&self, container_path: &str, destination: &Path) -> Result<(), ContainmentError> {
        if container_path.trim().is_empty() {
            return Err(DockerError::CopyFailed {
                path: container_path.to_string(),
                reason: "source path is empty".to_string(),
            }
            .into());
        }
        let options = DownloadFromContainerOptions {
            path: container_path.to_string(),
        };
        let download = self
            .docker
            .download_from_container(&self.id, Some(options))
            .try_fold(Vec::new(), |mut archive, chunk| async move {
                archive.extend_from_slice(&chunk);
                Ok(archive)
            });
        let archive = tokio::time::timeout(self.copy_timeout, download)
            .await
            .map_err(|_| ContainmentError::Timeout {
                operation: "copy",
                timeout: self.copy_timeout,
            })?
            .map_err(|e| DockerError::CopyFailed {
                path: container_path.to_string(),
                reason: e.to_string(),
            })?;
        unpack_copy_archive(&archive, destination)?;
        debug!(container = %self.id, source = %container_path, dest = %destination.display(), "Copied from container");
        Ok(())
    }

    /// Executor that attaches to command output.
    pub fn executor(&self, config: ExecConfig) -> AttachedExecutor {
        AttachedExecutor::new(self.docker.clone(), &self.id).with_config(config)
    }

    /// Executor that runs commands detached and polls for their exit code.
    pub fn detached_executor(&self, config: ExecConfig) -> DetachedExecutor {
        DetachedExecutor::new(self.docker.clone(), &self.id).with_config(config)
    }

    /// Stops and removes the container. A container that is already gone
    /// counts as closed.
    pub async fn close(mut self) -> Result<(), DockerError> {
        self.closed = true;
        stop_and_remove(&self.docker, &self.id).await
    }
}

impl fmt::Debug for RunningContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningContainer")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for RunningContainer {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let docker = self.docker.clone();
                let id = std::mem::take(&mut self.id);
                handle.spawn(async move {
                    if let Err(e) = stop_and_remove(&docker, &id).await {
                        warn!(container = %id, error = %e, "Failed to remove dropped container");
                    }
                });
            }
            Err(_) => {
                warn!(container = %self.id, "Container dropped outside a runtime and left running");
            }
        }
    }
}
