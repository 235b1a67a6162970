//! Accumulates check results into a `ResultSet`

use crate::check::{CheckHelp, CheckMetadata};
use crate::policy::Policy;
use crate::results::{CheckResult, CheckStatus, ErroredReason, ResultSet};
use crate::target::Target;
use chrono::Utc;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("a result for check '{0}' was already recorded")]
pub struct DuplicateResult(pub String);

/// Builds the result set for one engine run, in invocation order
#[derive(Debug)]
pub struct ResultAggregator {
    set: ResultSet,
    seen: HashSet<String>,
}

impl ResultAggregator {
    /// Start a result set for `target`, stamping the start time
    pub fn start(target: &Target, policy: Option<Policy>) -> Self {
        Self {
            set: ResultSet {
                policy,
                image: target.image.clone(),
                platform: target.platform.clone(),
                started_at: Some(Utc::now()),
                finished_at: None,
                results: Vec::new(),
            },
            seen: HashSet::new(),
        }
    }

    pub fn record(&mut self, result: CheckResult) -> Result<(), DuplicateResult> {
        if !self.seen.insert(result.name.clone()) {
            return Err(DuplicateResult(result.name));
        }
        self.set.results.push(result);
        Ok(())
    }

    /// Record a check that never ran as errored
    pub fn record_skipped(
        &mut self,
        name: &str,
        metadata: CheckMetadata,
        help: CheckHelp,
        reason: ErroredReason,
        detail: &str,
    ) -> Result<(), DuplicateResult> {
        self.record(CheckResult {
            name: name.to_string(),
            status: CheckStatus::errored(reason, detail),
            elapsed: Duration::ZERO,
            metadata,
            help,
            artifacts: Vec::new(),
        })
    }

    /// Stamp the finish time and hand out the immutable snapshot
    pub fn finish(mut self) -> ResultSet {
        self.set.finished_at = Some(Utc::now());
        self.set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn passed(name: &str) -> CheckResult {
        CheckResult {
            name: name.to_string(),
            status: CheckStatus::Passed,
            elapsed: Duration::from_millis(1),
            metadata: CheckMetadata::default(),
            help: CheckHelp::default(),
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_results_keep_invocation_order() {
        let target = Target::new("example.io/app:v1", "amd64");
        let mut aggregator = ResultAggregator::start(&target, Some(Policy::ScratchRoot));

        aggregator.record(passed("A")).unwrap();
        aggregator
            .record_skipped(
                "B",
                CheckMetadata::default(),
                CheckHelp::default(),
                ErroredReason::Cancelled,
                "execution was cancelled",
            )
            .unwrap();

        let set = aggregator.finish();
        assert_eq!(set.policy, Some(Policy::ScratchRoot));
        assert_eq!(set.platform, "amd64");
        assert_eq!(set.results[0].name, "A");
        assert!(set.results[1].is_errored());
        assert!(set.finished_at >= set.started_at);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let target = Target::new("example.io/app:v1", "amd64");
        let mut aggregator = ResultAggregator::start(&target, None);

        aggregator.record(passed("A")).unwrap();
        assert_matches!(aggregator.record(passed("A")), Err(DuplicateResult(name)) if name == "A");
        assert_eq!(aggregator.finish().len(), 1);
    }
}
