//! # Result Types
//!
//! Per-check outcomes and the per-platform result set handed to formatters
//! and submitters.

use crate::artifacts::ArtifactRef;
use crate::check::{CheckHelp, CheckMetadata};
use crate::policy::Policy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Why a check was recorded as errored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErroredReason {
    /// The check returned an error
    CheckError,
    /// The check panicked
    Panicked,
    /// The run was cancelled before or while the check ran
    Cancelled,
}

impl ErroredReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErroredReason::CheckError => "check-error",
            ErroredReason::Panicked => "panicked",
            ErroredReason::Cancelled => "cancelled",
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
    Errored {
        reason: ErroredReason,
        detail: String,
    },
}

impl CheckStatus {
    pub fn errored(reason: ErroredReason, detail: impl Into<String>) -> Self {
        CheckStatus::Errored {
            reason,
            detail: detail.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "PASSED",
            CheckStatus::Failed => "FAILED",
            CheckStatus::Errored { .. } => "ERRORED",
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Result of one check invocation, never modified once recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,

    #[serde(flatten)]
    pub status: CheckStatus,

    #[serde(rename = "elapsed_ms", with = "millis")]
    pub elapsed: Duration,

    pub metadata: CheckMetadata,

    pub help: CheckHelp,

    /// Files the check wrote through the artifact writer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ArtifactRef>,
}

impl CheckResult {
    pub fn is_passed(&self) -> bool {
        matches!(self.status, CheckStatus::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, CheckStatus::Failed)
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.status, CheckStatus::Errored { .. })
    }

    pub fn is_required(&self) -> bool {
        self.metadata.is_required()
    }

    pub fn error_detail(&self) -> Option<&str> {
        match &self.status {
            CheckStatus::Errored { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

/// Counts per outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

/// All results for one platform run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSet {
    pub policy: Option<Policy>,

    pub image: String,

    pub platform: String,

    pub started_at: Option<DateTime<Utc>>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Results in execution order
    pub results: Vec<CheckResult>,
}

impl ResultSet {
    /// The zero value handed out before execution completes
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// True when at least one check ran and no required check failed or errored
    pub fn passed(&self) -> bool {
        !self.results.is_empty()
            && self
                .results
                .iter()
                .filter(|r| r.is_required())
                .all(CheckResult::is_passed)
    }

    pub fn passed_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_passed())
    }

    pub fn failed_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_failed())
    }

    pub fn errored_results(&self) -> impl Iterator<Item = &CheckResult> {
        self.results.iter().filter(|r| r.is_errored())
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.results.iter().find(|r| r.name == name)
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            total: self.results.len(),
            passed: self.passed_results().count(),
            failed: self.failed_results().count(),
            errored: self.errored_results().count(),
        }
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
