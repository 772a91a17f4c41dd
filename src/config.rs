//! Configuration for the require-image and exec flows.
//!
//! Settings can be built in code with the `with_*` methods or loaded from a
//! YAML file. The CLI layers environment settings
//! (`CONTAINMENT_TIMEOUT_PULL`, `CONTAINMENT_TIMEOUT_BUILD`) over the file
//! and command-line flags over both.
//!
//! ```yaml
//! name: my-app-test:latest
//! absent_image_action: "build:./docker"
//! build_timeout: 10m
//! pull_timeout: PT5M
//! build_args:
//!   RUST_VERSION: "1.80"
//! labels:
//!   org.example.purpose: integration-test
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::durations::serde_human;
use crate::error::ConfigError;
use crate::image::AbsentImageDirective;
use crate::settings::LayeredSettingSet;

/// Default timeout for an image build.
pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default timeout for an image pull.
pub const DEFAULT_PULL_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Directory, relative to the base directory, searched for a Dockerfile
/// when a build directive has no parameter.
pub const DEFAULT_DOCKERFILE_SUBDIR: &str = "src/test/docker";

/// Default interval between exec status checks.
pub const DEFAULT_EXEC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of exec status checks.
pub const DEFAULT_EXEC_MAX_POLLS: u32 = 30;

/// Settings for ensuring an image exists locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequireImageConfig {
    /// Name plus optional tag, `name[:tag]`.
    pub name: String,
    /// What to do if the image is absent. Required by the require-image flow.
    pub absent_image_action: Option<AbsentImageDirective>,
    #[serde(with = "serde_human")]
    pub pull_timeout: Duration,
    #[serde(with = "serde_human")]
    pub build_timeout: Duration,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Base for the default Dockerfile directory.
    pub base_dir: PathBuf,
}

impl Default for RequireImageConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl RequireImageConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            absent_image_action: None,
            pull_timeout: DEFAULT_PULL_TIMEOUT,
            build_timeout: DEFAULT_BUILD_TIMEOUT,
            build_args: BTreeMap::new(),
            labels: BTreeMap::new(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Loads settings from a YAML file. Missing fields take their defaults.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_directive(mut self, directive: AbsentImageDirective) -> Self {
        self.absent_image_action = Some(directive);
        self
    }

    pub fn with_pull_timeout(mut self, timeout: Duration) -> Self {
        self.pull_timeout = timeout;
        self
    }

    pub fn with_build_timeout(mut self, timeout: Duration) -> Self {
        self.build_timeout = timeout;
        self
    }

    pub fn with_build_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(name.into(), value.into());
        self
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Replaces the timeouts with `<domain>.timeout.pull` and
    /// `<domain>.timeout.build` where `settings` defines them.
    pub fn apply_settings(mut self, settings: &LayeredSettingSet) -> Result<Self, ConfigError> {
        let timeouts = settings.timeouts();
        self.pull_timeout = timeouts.get("pull", self.pull_timeout)?;
        self.build_timeout = timeouts.get("build", self.build_timeout)?;
        Ok(self)
    }

    /// Directory searched for a Dockerfile when a build directive has no
    /// parameter.
    pub fn default_dockerfile_dir(&self) -> PathBuf {
        self.base_dir.join(DEFAULT_DOCKERFILE_SUBDIR)
    }

    /// Checks the settings every flow needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingSetting("image name".to_string()));
        }
        Ok(())
    }
}

/// Settings for running a command inside a container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Environment variables, `KEY=VALUE`.
    pub env: Vec<String>,
    /// Working directory inside the container.
    pub working_dir: Option<String>,
    /// Interval between status checks of a detached exec.
    #[serde(with = "serde_human")]
    pub poll_interval: Duration,
    /// Maximum number of status checks of a detached exec.
    pub max_polls: u32,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            working_dir: None,
            poll_interval: DEFAULT_EXEC_POLL_INTERVAL,
            max_polls: DEFAULT_EXEC_MAX_POLLS,
        }
    }
}

impl ExecConfig {
    pub fn with_env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.env
            .push(format!("{}={}", key.as_ref(), value.as_ref()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }
}

/// Splits a `KEY=VALUE` pair, as given to `--build-arg` and `--label`.
pub fn parse_key_value(pair: &str) -> Result<(String, String), ConfigError> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(ConfigError::InvalidPair(pair.to_string())),
    }
}
