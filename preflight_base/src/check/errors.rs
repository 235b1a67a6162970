use crate::artifacts::ArtifactError;
use crate::fsutil::FileError;
use crate::image::ImageError;
use std::path::PathBuf;

/// A check could not complete.
///
/// Returning `Ok(false)` from a check is a clean failure; returning one of
/// these records the check as errored.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("image has not been loaded by an earlier check")]
    ImageNotLoaded,

    #[error("image was already loaded for this run")]
    ImageAlreadyLoaded,

    #[error("image error: {0}")]
    Image(#[from] ImageError),

    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    File(#[from] FileError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{reason}")]
    Failed { reason: String },

    #[error("check was cancelled")]
    Cancelled,
}

impl CheckError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CheckError::Failed {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CheckError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A check constructor rejected its configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("check '{check}' cannot be initialized: {reason}")]
pub struct CheckInitError {
    pub check: String,
    pub reason: String,
}

impl CheckInitError {
    pub fn new(check: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            reason: reason.into(),
        }
    }
}
