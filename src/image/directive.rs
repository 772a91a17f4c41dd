//! What to do when a required image is absent locally.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ImageError;

/// Separates the action from its parameter, as in `pull:alpine:3.19`.
pub const DIRECTIVE_DELIMITER: char = ':';

/// Action performed when a required image is not present locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AbsentImageAction {
    /// Pull the image from a remote repository.
    Pull,
    /// Build the image from a local directory containing a Dockerfile.
    Build,
    /// Fail.
    Fail,
    /// Ignore and move on.
    Ignore,
}

impl AbsentImageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbsentImageAction::Pull => "pull",
            AbsentImageAction::Build => "build",
            AbsentImageAction::Fail => "fail",
            AbsentImageAction::Ignore => "ignore",
        }
    }
}

impl fmt::Display for AbsentImageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AbsentImageAction {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pull" => Ok(AbsentImageAction::Pull),
            "build" => Ok(AbsentImageAction::Build),
            "fail" => Ok(AbsentImageAction::Fail),
            "ignore" => Ok(AbsentImageAction::Ignore),
            other => Err(ImageError::UnknownAction(other.to_string())),
        }
    }
}

/// An action plus an optional parameter, written `action[:parameter]`.
///
/// The parameter means different things per action: the remote image name
/// for `pull`, the Dockerfile directory for `build`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbsentImageDirective {
    pub action: AbsentImageAction,
    pub parameter: Option<String>,
}

impl AbsentImageDirective {
    pub fn new(action: AbsentImageAction) -> Self {
        Self {
            action,
            parameter: None,
        }
    }

    pub fn with_parameter(mut self, parameter: impl Into<String>) -> Self {
        self.parameter = Some(parameter.into());
        self
    }
}

impl fmt::Display for AbsentImageDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.parameter {
            Some(parameter) => write!(f, "{}{DIRECTIVE_DELIMITER}{parameter}", self.action),
            None => write!(f, "{}", self.action),
        }
    }
}

impl FromStr for AbsentImageDirective {
    type Err = ImageError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if token.trim().is_empty() {
            return Err(ImageError::EmptyDirective);
        }
        let (action, parameter) = match token.split_once(DIRECTIVE_DELIMITER) {
            Some((action, parameter)) => (action, Some(parameter.trim().to_string())),
            None => (token, None),
        };
        Ok(Self {
            action: action.parse()?,
            parameter,
        })
    }
}

impl Serialize for AbsentImageDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AbsentImageDirective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
