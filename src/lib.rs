//! containment: polling and completion helpers for Docker-backed test setups.
//!
//! This library provides a generic [`poll::Poller`] for waiting on
//! long-running operations, a [`callback::BlockableCallback`] that turns
//! push-style progress streams into bounded waits, and the Docker flows
//! built on them: requiring an image locally (pull, build, fail or ignore
//! when absent), running containers and running commands inside them.
//! Timeouts can be tuned through [`settings`], which layers the process
//! environment over built-in defaults.

// Core modules
pub mod callback;
pub mod cli;
pub mod config;
pub mod docker;
pub mod durations;
pub mod error;
pub mod image;
pub mod poll;
pub mod require;
pub mod settings;

// Re-export commonly used error types
pub use error::{ConfigError, ContainmentError, DockerError, ImageError, PollError};

// Re-export the polling and callback primitives
pub use callback::{feed, BlockableCallback, ResultCallback};
pub use poll::{
    PollAction, PollAnswer, PollCheck, PollOutcome, PollRepetition, Poller, Sleeper, StopReason,
    SystemSleeper,
};

// Re-export the require-image flow
pub use config::{ExecConfig, RequireImageConfig};
pub use image::{AbsentImageAction, AbsentImageDirective, ImageSpecifier};
pub use require::require_image;

// Re-export the container lifecycle
pub use docker::{ContainerRunner, ContainerSpec, PortMapping, RunningContainer};
pub use settings::LayeredSettingSet;
