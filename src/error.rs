//! Error types for containment operations.
//!
//! Defines error types for the major subsystems:
//! - Polling (interruption of a poll session)
//! - Image specifier and directive parsing
//! - Configuration loading and duration parsing
//! - Docker daemon interactions
//! - The require-image and exec flows built on top of them

use std::time::Duration;

use thiserror::Error;

/// Errors that can end a poll session early.
///
/// Exhausting the interval sequence is not an error; it is reported as
/// [`StopReason::Timeout`](crate::poll::StopReason::Timeout).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("Polling interrupted while waiting between attempts")]
    Interrupted,
}

/// Errors that can occur while parsing image names and absent-image directives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Image specifier is empty")]
    EmptySpecifier,

    #[error("Invalid image specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    #[error("Absent-image directive is empty")]
    EmptyDirective,

    #[error("Unknown absent-image action '{0}': must be 'pull', 'build', 'fail', or 'ignore'")]
    UnknownAction(String),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid duration '{input}': {reason}")]
    InvalidDuration { input: String, reason: String },

    #[error("Invalid time unit '{0}'")]
    InvalidUnit(String),

    #[error("Missing required setting: {0}")]
    MissingSetting(String),

    #[error("Invalid key=value pair '{0}'")]
    InvalidPair(String),

    #[error("Invalid value '{value}' for setting {key}")]
    InvalidSetting { key: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker pull failed: {0}")]
    PullFailed(String),

    #[error("Docker tag failed: {0}")]
    TagFailed(String),

    #[error("Docker exec failed: {0}")]
    ExecFailed(String),

    #[error("Failed to package build context '{path}': {reason}")]
    BuildContext { path: String, reason: String },

    #[error("Container run failed: {0}")]
    RunFailed(String),

    #[error("Invalid port {0}: must be between 1 and 65535")]
    InvalidPort(u16),

    #[error("Invalid port mapping '{0}'")]
    InvalidPortMapping(String),

    #[error("Copy failed for '{path}': {reason}")]
    CopyFailed { path: String, reason: String },

    #[error("Docker API error: {0}")]
    Api(#[from] bollard::errors::Error),
}

/// Top-level errors of the require-image and exec flows.
#[derive(Debug, Error)]
pub enum ContainmentError {
    #[error("{operation} timeout exceeded ({timeout:?})")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} completed unsuccessfully: {summary}")]
    OperationFailed {
        operation: &'static str,
        summary: String,
    },

    #[error("Failing as directed because image '{0}' is absent")]
    RequiredImageAbsent(String),

    #[error("Invalid dockerfile directory: {0}")]
    InvalidDockerfileDir(String),

    #[error("Invalid directive parameter: {0}")]
    InvalidDirectiveParameter(String),

    #[error("Interrupted while waiting for {0} to complete")]
    Interrupted(&'static str),

    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}

impl From<bollard::errors::Error> for ContainmentError {
    fn from(e: bollard::errors::Error) -> Self {
        ContainmentError::Docker(DockerError::Api(e))
    }
}
