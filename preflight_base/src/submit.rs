//! Result submission
//!
//! A submitter receives the final `ResultSet` of a platform run. The no-op
//! submitter is the default; `FileSubmitter` persists results to a directory.

use crate::fsutil::{write_file_to_artifacts, FileError};
use crate::logging::LoggingService;
use crate::results::ResultSet;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write submission {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    File(#[from] FileError),

    #[error("submission rejected: {0}")]
    Rejected(String),
}

pub trait Submitter: Send + Sync {
    fn submit(&self, results: &ResultSet, logger: &LoggingService) -> Result<(), SubmitError>;
}

/// Discards results, optionally logging why
#[derive(Debug, Clone, Default)]
pub struct NoopSubmitter {
    emit_log: bool,
    reason: Option<String>,
}

impl NoopSubmitter {
    pub fn new(emit_log: bool) -> Self {
        Self {
            emit_log,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl Submitter for NoopSubmitter {
    fn submit(&self, results: &ResultSet, logger: &LoggingService) -> Result<(), SubmitError> {
        if self.emit_log {
            let reason = self.reason.as_deref().unwrap_or("no submitter configured");
            logger.log_info_with_context(
                "results are not being submitted",
                vec![("reason", reason), ("platform", results.platform.as_str())],
            );
        }
        Ok(())
    }
}

/// Writes each submitted result set as JSON into a directory
#[derive(Debug, Clone)]
pub struct FileSubmitter {
    dir: PathBuf,
}

impl FileSubmitter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_name(results: &ResultSet) -> String {
        let platform = if results.platform.is_empty() {
            "unknown"
        } else {
            results.platform.as_str()
        };
        format!("submission-{platform}.json")
    }
}

impl Submitter for FileSubmitter {
    fn submit(&self, results: &ResultSet, logger: &LoggingService) -> Result<(), SubmitError> {
        fs::create_dir_all(&self.dir).map_err(|source| SubmitError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let body = serde_json::to_string_pretty(results)?;
        let path = write_file_to_artifacts(&self.dir, &Self::file_name(results), &body)?;

        let shown = path.display().to_string();
        logger.log_info_with_context("results submitted", vec![("path", shown.as_str())]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogLevel, MemoryLogger};
    use std::sync::Arc;

    #[test]
    fn test_noop_submitter_logs_reason() {
        let memory = Arc::new(MemoryLogger::new());
        let logger = LoggingService::new(memory.clone(), LogLevel::Debug);

        NoopSubmitter::new(true)
            .with_reason("submission disabled")
            .submit(&ResultSet::empty(), &logger)
            .unwrap();
        NoopSubmitter::new(false)
            .submit(&ResultSet::empty(), &logger)
            .unwrap();

        assert_eq!(memory.event_count(), 1);
        assert_eq!(memory.find("not being submitted").len(), 1);
    }

    #[test]
    fn test_file_submitter_writes_json() {
        let temp = tempfile::tempdir().unwrap();
        let logger = LoggingService::new(Arc::new(MemoryLogger::new()), LogLevel::Info);
        let results = ResultSet {
            image: "example.io/app:v1".to_string(),
            platform: "s390x".to_string(),
            ..ResultSet::empty()
        };

        FileSubmitter::new(temp.path().join("out"))
            .submit(&results, &logger)
            .unwrap();

        let written = fs::read(temp.path().join("out/submission-s390x.json")).unwrap();
        let parsed: ResultSet = serde_json::from_slice(&written).unwrap();
        assert_eq!(parsed, results);
    }
}
