//! Targets under test
//!
//! A `Target` is the immutable description of one artifact on one platform.
//! The orchestration loop resolves one per requested platform.

use crate::config::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Placeholder replaced by the platform name in image archive templates
pub const PLATFORM_PLACEHOLDER: &str = "{platform}";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("image reference is empty")]
    ImageEmpty,

    #[error("platform is empty")]
    PlatformEmpty,

    #[error("invalid image reference '{reference}': {reason}")]
    InvalidReference { reference: String, reason: String },
}

/// Resolved artifact, platform and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Image or bundle reference, e.g. `example.io/app:v1`
    pub image: String,

    /// Container platform architecture, e.g. `amd64`
    pub platform: String,

    /// Registry credentials file
    pub docker_config: Option<PathBuf>,

    /// Local `docker save` archive holding the image for this platform
    pub image_archive: Option<PathBuf>,
}

impl Target {
    pub fn new(image: impl Into<String>, platform: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            platform: platform.into(),
            docker_config: None,
            image_archive: None,
        }
    }

    pub fn with_docker_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_config = Some(path.into());
        self
    }

    pub fn with_image_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_archive = Some(path.into());
        self
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), TargetError> {
        if self.image.trim().is_empty() {
            return Err(TargetError::ImageEmpty);
        }
        if self.platform.trim().is_empty() {
            return Err(TargetError::PlatformEmpty);
        }
        Ok(())
    }

    pub fn reference(&self) -> Result<ImageReference, TargetError> {
        ImageReference::parse(&self.image)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.image, self.platform)
    }
}

/// Parsed `[registry/]repository[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self, TargetError> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(TargetError::ImageEmpty);
        }

        let invalid = |reason: &str| TargetError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let (name, digest) = match reference.split_once('@') {
            Some((name, digest)) if !digest.is_empty() => (name, Some(digest.to_string())),
            Some(_) => return Err(invalid("digest is empty")),
            None => (reference, None),
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a registry port.
        let last_slash = name.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (path, tag) = match name[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &name[split + 1..];
                if tag.is_empty() {
                    return Err(invalid("tag is empty"));
                }
                (&name[..split], Some(tag.to_string()))
            }
            None => (name, None),
        };

        if path.is_empty() {
            return Err(invalid("repository is empty"));
        }

        let (registry, repository) = match path.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), rest.to_string())
            }
            _ => (None, path.to_string()),
        };

        if repository.is_empty() {
            return Err(invalid("repository is empty"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Last path segment of the repository
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }
}

/// Host architecture expressed as a container platform name
pub fn host_platform() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        "x86" => "386",
        "arm" => "arm",
        other => other,
    }
    .to_string()
}

/// Split, trim and de-duplicate requested platforms, keeping request order.
/// Falls back to the host platform when nothing was requested.
pub fn normalize_platforms<S: AsRef<str>>(requested: &[S]) -> Vec<String> {
    let mut platforms: Vec<String> = Vec::new();
    for entry in requested {
        for platform in entry.as_ref().split(',') {
            let platform = platform.trim();
            if !platform.is_empty() && !platforms.iter().any(|p| p == platform) {
                platforms.push(platform.to_string());
            }
        }
    }

    if platforms.is_empty() {
        platforms.push(host_platform());
    }
    platforms
}

/// Produce one target per platform to certify
pub fn resolve_targets(config: &RuntimeConfig) -> Result<Vec<Target>, TargetError> {
    if config.image.trim().is_empty() {
        return Err(TargetError::ImageEmpty);
    }

    normalize_platforms(&config.platforms)
        .into_iter()
        .map(|platform| {
            let mut target = Target::new(config.image.clone(), platform.clone());
            if let Some(path) = &config.docker_config {
                target = target.with_docker_config(path.clone());
            }
            if let Some(template) = &config.image_archive {
                target = target.with_image_archive(template.replace(PLATFORM_PLACEHOLDER, &platform));
            }
            target.validate()?;
            Ok(target)
        })
        .collect()
}
