//! Top-level error type
//!
//! Configuration and resolution errors abort before any check runs.
//! Cancellation is reported separately so callers can tell it apart. Check
//! failures never appear here; they are part of the `ResultSet`.

use crate::artifacts::ArtifactError;
use crate::config::ConfigError;
use crate::execution::EngineError;
use crate::formatters::FormatError;
use crate::policy::UnknownPolicy;
use crate::registry::RegistryError;
use crate::results::ResultSet;
use crate::submit::SubmitError;
use crate::target::TargetError;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PreflightError {
    #[error("image cannot be empty")]
    ImageEmpty,

    #[error(transparent)]
    UnknownPolicy(#[from] UnknownPolicy),

    #[error("cannot initialize checks: {0}")]
    CannotInitializeChecks(#[source] RegistryError),

    #[error("invalid logging configuration")]
    InvalidLoggingConfiguration,

    /// Carries the results gathered before the run stopped
    #[error("{cause}")]
    Cancelled {
        cause: String,
        results: Box<ResultSet>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Target(TargetError),

    #[error(transparent)]
    Engine(EngineError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("failed to write results to {path}: {source}")]
    WriteResults {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("platform {platform}: {source}")]
    Platform {
        platform: String,
        #[source]
        source: Box<PreflightError>,
    },
}

impl PreflightError {
    /// Bad input or setup, raised before checks execute
    pub fn is_configuration_error(&self) -> bool {
        match self {
            PreflightError::ImageEmpty
            | PreflightError::UnknownPolicy(_)
            | PreflightError::CannotInitializeChecks(_)
            | PreflightError::InvalidLoggingConfiguration
            | PreflightError::Config(_)
            | PreflightError::Target(_)
            | PreflightError::Format(FormatError::UnknownFormat(_)) => true,
            PreflightError::Engine(e) => e.is_configuration_error(),
            PreflightError::Platform { source, .. } => source.is_configuration_error(),
            _ => false,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        match self {
            PreflightError::Cancelled { .. } => true,
            PreflightError::Platform { source, .. } => source.is_cancellation(),
            _ => false,
        }
    }

    /// Results completed before a cancellation, when this is one
    pub fn partial_results(&self) -> Option<&ResultSet> {
        match self {
            PreflightError::Cancelled { results, .. } => Some(&**results),
            PreflightError::Platform { source, .. } => source.partial_results(),
            _ => None,
        }
    }

    /// Message suitable for the terminal
    pub fn user_message(&self) -> String {
        match self {
            PreflightError::ImageEmpty => {
                "No image was given. Pass the image or bundle reference to certify.".to_string()
            }
            PreflightError::UnknownPolicy(UnknownPolicy(name)) => format!(
                "Unknown policy '{}'. Valid policies: operator, container, mcp, scratch-nonroot, scratch-root, root, konflux.",
                name
            ),
            PreflightError::InvalidLoggingConfiguration => {
                "Logging is not configured for this run.".to_string()
            }
            PreflightError::Cancelled { cause, .. } => format!("Run stopped: {}", cause),
            PreflightError::Platform { platform, source } => {
                format!("Platform {}: {}", platform, source.user_message())
            }
            other => other.to_string(),
        }
    }
}

impl From<TargetError> for PreflightError {
    fn from(e: TargetError) -> Self {
        match e {
            TargetError::ImageEmpty => PreflightError::ImageEmpty,
            other => PreflightError::Target(other),
        }
    }
}

impl From<RegistryError> for PreflightError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::UnknownPolicy(p) => PreflightError::UnknownPolicy(p),
            other => PreflightError::CannotInitializeChecks(other),
        }
    }
}

impl PreflightError {
    /// Wrap an engine error, attaching `results` when the engine was cancelled
    pub fn from_engine(e: EngineError, results: ResultSet) -> Self {
        match e {
            cancelled @ EngineError::Cancelled { .. } => PreflightError::Cancelled {
                cause: cancelled.to_string(),
                results: Box::new(results),
            },
            other => other.into(),
        }
    }
}

impl From<EngineError> for PreflightError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::MissingLogger => PreflightError::InvalidLoggingConfiguration,
            EngineError::Target(t) => t.into(),
            cancelled @ EngineError::Cancelled { .. } => PreflightError::Cancelled {
                cause: cancelled.to_string(),
                results: Box::default(),
            },
            EngineError::Submit(s) => PreflightError::Submit(s),
            other => PreflightError::Engine(other),
        }
    }
}
