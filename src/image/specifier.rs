//! Image references in `[registry/][repository/]name[:tag]` form.

use std::fmt;
use std::str::FromStr;

use crate::error::ImageError;

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageSpecifier {
    pub name: String,
    pub tag: Option<String>,
    pub repository: Option<String>,
    pub registry: Option<String>,
}

impl ImageSpecifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: None,
            repository: None,
            registry: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Copy of this specifier with `default_tag` filled in if no tag is set.
    pub fn with_default_tag(&self, default_tag: &str) -> Self {
        let mut copy = self.clone();
        if copy.tag.is_none() {
            copy.tag = Some(default_tag.to_string());
        }
        copy
    }

    /// Reference without the tag, as the `repo` argument of a tag operation.
    pub fn untagged(&self) -> String {
        Self {
            tag: None,
            ..self.clone()
        }
        .to_string()
    }
}

impl fmt::Display for ImageSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{registry}/")?;
            // A registry needs a repository segment to stay parseable.
            let repository = self.repository.as_deref().unwrap_or("_");
            write!(f, "{repository}/")?;
        } else if let Some(repository) = &self.repository {
            write!(f, "{repository}/")?;
        }
        f.write_str(&self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        Ok(())
    }
}

impl FromStr for ImageSpecifier {
    type Err = ImageError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        if token.trim().is_empty() {
            return Err(ImageError::EmptySpecifier);
        }
        let parts: Vec<&str> = token.splitn(3, '/').collect();
        let (registry, repository, name_and_tag) = match parts.as_slice() {
            [name_and_tag] => (None, None, *name_and_tag),
            [repository, name_and_tag] => (None, Some(*repository), *name_and_tag),
            [registry, repository, name_and_tag] => {
                (Some(*registry), Some(*repository), *name_and_tag)
            }
            _ => unreachable!("splitn(3) yields between one and three parts"),
        };
        let (name, tag) = match name_and_tag.split_once(':') {
            Some((name, tag)) => (name, Some(tag)),
            None => (name_and_tag, None),
        };
        if name.trim().is_empty() {
            return Err(ImageError::InvalidSpecifier {
                specifier: token.to_string(),
                reason: "name must be nonempty".to_string(),
            });
        }
        Ok(Self {
            name: name.to_string(),
            tag: tag.map(str::to_string),
            repository: repository.map(str::to_string),
            registry: registry.map(str::to_string),
        })
    }
}
