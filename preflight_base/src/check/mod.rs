//! The check contract
//!
//! A check validates one target and answers pass or fail. Checks that cannot
//! reach an answer return a `CheckError`, which the engine records as errored
//! without stopping the run.

pub mod errors;

pub use errors::{CheckError, CheckInitError};

use crate::artifacts::ArtifactWriter;
use crate::context::CancellationToken;
use crate::image::LoadedImage;
use crate::logging::LoggingService;
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

/// Whether a failure of the check fails the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckLevel {
    #[default]
    Required,
    Optional,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckMetadata {
    pub description: String,
    pub level: CheckLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl CheckMetadata {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.level = CheckLevel::Optional;
        self
    }

    pub fn with_knowledge_base(mut self, url: impl Into<String>) -> Self {
        self.knowledge_base_url = Some(url.into());
        self
    }

    pub fn with_check_url(mut self, url: impl Into<String>) -> Self {
        self.check_url = Some(url.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn is_required(&self) -> bool {
        self.level == CheckLevel::Required
    }
}

/// Guidance shown when a check does not pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckHelp {
    pub message: String,
    pub suggestion: String,
}

impl CheckHelp {
    pub fn new(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

/// A single compliance test
pub trait Check: Send + Sync {
    /// Identifier, unique within a policy
    fn name(&self) -> &str;

    /// `Ok(true)` passed, `Ok(false)` failed, `Err` could not complete
    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError>;

    fn metadata(&self) -> CheckMetadata;

    fn help(&self) -> CheckHelp;
}

/// What a check sees while it runs
///
/// The target is shared read-only. The image slot is filled at most once per
/// engine run, by whichever check loads the image first.
pub struct CheckContext<'a> {
    target: &'a Target,
    artifacts: &'a dyn ArtifactWriter,
    logger: &'a LoggingService,
    cancellation: &'a CancellationToken,
    image: &'a OnceLock<LoadedImage>,
    workdir: &'a Path,
}

impl<'a> CheckContext<'a> {
    pub fn new(
        target: &'a Target,
        artifacts: &'a dyn ArtifactWriter,
        logger: &'a LoggingService,
        cancellation: &'a CancellationToken,
        image: &'a OnceLock<LoadedImage>,
        workdir: &'a Path,
    ) -> Self {
        Self {
            target,
            artifacts,
            logger,
            cancellation,
            image,
            workdir,
        }
    }

    pub fn target(&self) -> &Target {
        self.target
    }

    pub fn artifacts(&self) -> &dyn ArtifactWriter {
        self.artifacts
    }

    pub fn logger(&self) -> &LoggingService {
        self.logger
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Bail out with `CheckError::Cancelled` once the run is cancelled
    pub fn ensure_not_cancelled(&self) -> Result<(), CheckError> {
        if self.is_cancelled() {
            Err(CheckError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Scratch directory owned by the engine run
    pub fn workdir(&self) -> &Path {
        self.workdir
    }

    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.get()
    }

    pub fn require_image(&self) -> Result<&LoadedImage, CheckError> {
        self.image.get().ok_or(CheckError::ImageNotLoaded)
    }

    pub fn set_image(&self, image: LoadedImage) -> Result<&LoadedImage, CheckError> {
        self.image
            .set(image)
            .map_err(|_| CheckError::ImageAlreadyLoaded)?;
        self.require_image()
    }
}
