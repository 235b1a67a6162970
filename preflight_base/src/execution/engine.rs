//! # Execution Engine
//!
//! Runs an ordered list of checks against one target. Checks run one at a
//! time in resolution order; each invocation is isolated so that an error or
//! panic in one check is recorded and the next check still runs.

use crate::artifacts::{ArtifactWriter, MapWriter, RecordingWriter};
use crate::check::{Check, CheckContext, CheckError, CheckHelp, CheckMetadata};
use crate::context::{CancellationToken, ExecutionContext};
use crate::image::LoadedImage;
use crate::logging::LoggingService;
use crate::policy::Policy;
use crate::results::{
    CheckResult, CheckStatus, DuplicateResult, ErroredReason, ResultAggregator, ResultSet,
};
use crate::submit::{SubmitError, Submitter};
use crate::target::{Target, TargetError};
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tempfile::TempDir;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no checks to execute")]
    NoChecks,

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("invalid logging configuration: no logger attached to the execution context")]
    MissingLogger,

    #[error("check '{0}' is scheduled more than once")]
    DuplicateCheck(String),

    #[error("failed to create work directory: {0}")]
    Workdir(#[source] std::io::Error),

    #[error("checks have already been executed")]
    AlreadyExecuted,

    #[error("checks have not been executed")]
    NotExecuted,

    #[error("{cause} after {completed} of {scheduled} checks")]
    Cancelled {
        cause: String,
        completed: usize,
        scheduled: usize,
    },

    #[error("failed to submit results: {0}")]
    Submit(#[from] SubmitError),
}

impl EngineError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, EngineError::Cancelled { .. })
    }

    /// Raised before any check runs
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            EngineError::NoChecks
                | EngineError::Target(_)
                | EngineError::MissingLogger
                | EngineError::DuplicateCheck(_)
        )
    }
}

/// Check runner bound to one target
pub struct Engine {
    checks: Vec<Box<dyn Check>>,
    target: Target,
    policy: Option<Policy>,
    submitter: Option<Arc<dyn Submitter>>,
    logger: Arc<LoggingService>,
    artifacts: Arc<dyn ArtifactWriter>,
    cancellation: CancellationToken,
    image: OnceLock<LoadedImage>,
    workdir: Option<TempDir>,
    results: Option<ResultSet>,
}

impl Engine {
    /// Validate inputs and bind the engine to `target`.
    ///
    /// The context must carry a logger. When it has no artifact writer, files
    /// written by checks are kept in memory.
    pub fn new(
        ctx: &ExecutionContext,
        checks: Vec<Box<dyn Check>>,
        submitter: Option<Arc<dyn Submitter>>,
        target: Target,
    ) -> Result<Self, EngineError> {
        let logger = ctx.logger().cloned().ok_or(EngineError::MissingLogger)?;

        if checks.is_empty() {
            return Err(EngineError::NoChecks);
        }
        target.validate()?;

        let mut seen = HashSet::new();
        for check in &checks {
            if !seen.insert(check.name().to_string()) {
                return Err(EngineError::DuplicateCheck(check.name().to_string()));
            }
        }

        let artifacts = ctx
            .artifact_writer()
            .cloned()
            .unwrap_or_else(|| Arc::new(MapWriter::new()));

        Ok(Self {
            checks,
            target,
            policy: None,
            submitter,
            logger,
            artifacts,
            cancellation: ctx.cancellation().clone(),
            image: OnceLock::new(),
            workdir: None,
            results: None,
        })
    }

    /// Record which policy the checks came from
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Image loaded during execution, if any check loaded one
    pub fn image(&self) -> Option<&LoadedImage> {
        self.image.get()
    }

    /// Run every check once, in order.
    ///
    /// Check failures and errors are recorded in the results. Only cancellation
    /// and setup problems are returned as errors; results gathered before a
    /// cancellation remain available through `results()`.
    pub fn execute_checks(&mut self) -> Result<(), EngineError> {
        if self.results.is_some() {
            return Err(EngineError::AlreadyExecuted);
        }

        let workdir = tempfile::Builder::new()
            .prefix("preflight-")
            .tempdir()
            .map_err(EngineError::Workdir)?;

        let scheduled = self.checks.len().to_string();
        self.logger.log_info_with_context(
            "executing checks",
            vec![
                ("image", self.target.image.as_str()),
                ("platform", self.target.platform.as_str()),
                ("policy", self.policy.map(|p| p.as_str()).unwrap_or("custom")),
                ("checks", scheduled.as_str()),
            ],
        );

        let mut aggregator = ResultAggregator::start(&self.target, self.policy);
        let mut cancelled: Option<&'static str> = None;
        let mut completed = 0;

        for check in &self.checks {
            if let Some(cause) = cancelled.or_else(|| self.cancellation.cause()) {
                cancelled = Some(cause);
                aggregator.record_skipped(
                    check.name(),
                    metadata_of(check.as_ref()),
                    help_of(check.as_ref()),
                    ErroredReason::Cancelled,
                    cause,
                )
                .map_err(duplicate)?;
                continue;
            }

            let result = self.run_check(check.as_ref(), workdir.path());
            if let CheckStatus::Errored {
                reason: ErroredReason::Cancelled,
                detail,
            } = &result.status
            {
                cancelled = Some(self.cancellation.cause().unwrap_or("check was cancelled"));
                self.logger.log_warning_with_context(
                    "check cancelled",
                    vec![("check", result.name.as_str()), ("cause", detail.as_str())],
                );
            } else {
                completed += 1;
            }
            aggregator.record(result).map_err(duplicate)?;
        }

        self.workdir = Some(workdir);
        self.results = Some(aggregator.finish());

        match cancelled {
            Some(cause) => {
                self.logger.log_warning_with_context(
                    "execution cancelled",
                    vec![("platform", self.target.platform.as_str()), ("cause", cause)],
                );
                Err(EngineError::Cancelled {
                    cause: cause.to_string(),
                    completed,
                    scheduled: self.checks.len(),
                })
            }
            None => Ok(()),
        }
    }

    fn run_check(&self, check: &dyn Check, workdir: &Path) -> CheckResult {
        let name = check.name().to_string();
        self.logger
            .log_debug_with_context("running check", vec![("check", name.as_str())]);

        let recorder = RecordingWriter::new(self.artifacts.as_ref());
        let start = Instant::now();

        let outcome = {
            let ctx = CheckContext::new(
                &self.target,
                &recorder,
                &self.logger,
                &self.cancellation,
                &self.image,
                workdir,
            );
            panic::catch_unwind(AssertUnwindSafe(|| check.validate(&ctx)))
        };
        let elapsed = start.elapsed();

        let mut status = match outcome {
            Ok(Ok(true)) => CheckStatus::Passed,
            Ok(Ok(false)) => CheckStatus::Failed,
            Ok(Err(CheckError::Cancelled)) => {
                CheckStatus::errored(ErroredReason::Cancelled, CheckError::Cancelled.to_string())
            }
            Ok(Err(e)) => CheckStatus::errored(ErroredReason::CheckError, e.to_string()),
            Err(payload) => CheckStatus::errored(ErroredReason::Panicked, panic_message(payload.as_ref())),
        };

        // Cancellation observed while the check ran voids its outcome.
        if let Some(cause) = self.cancellation.cause() {
            status = CheckStatus::errored(ErroredReason::Cancelled, cause);
        }

        let elapsed_ms = elapsed.as_millis().to_string();
        let context = vec![
            ("check", name.as_str()),
            ("status", status.label()),
            ("elapsed_ms", elapsed_ms.as_str()),
        ];
        match &status {
            CheckStatus::Errored { detail, .. } => self
                .logger
                .log_error_with_context(&format!("check errored: {detail}"), context),
            _ => self.logger.log_info_with_context("check completed", context),
        }

        CheckResult {
            name,
            status,
            elapsed,
            metadata: metadata_of(check),
            help: help_of(check),
            artifacts: recorder.into_refs(),
        }
    }

    /// Snapshot of the results; empty until `execute_checks` has returned
    pub fn results(&self) -> ResultSet {
        self.results.clone().unwrap_or_default()
    }

    /// Hand the results to the attached submitter, if any
    pub fn submit(&self) -> Result<(), EngineError> {
        let results = self.results.as_ref().ok_or(EngineError::NotExecuted)?;
        if let Some(submitter) = &self.submitter {
            submitter.submit(results, &self.logger)?;
        }
        Ok(())
    }
}

fn duplicate(DuplicateResult(name): DuplicateResult) -> EngineError {
    EngineError::DuplicateCheck(name)
}

fn metadata_of(check: &dyn Check) -> CheckMetadata {
    panic::catch_unwind(AssertUnwindSafe(|| check.metadata())).unwrap_or_default()
}

fn help_of(check: &dyn Check) -> CheckHelp {
    panic::catch_unwind(AssertUnwindSafe(|| check.help())).unwrap_or_default()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("check panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("check panicked: {message}")
    } else {
        "check panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::tests::write_image_archive;
    use crate::logging::{LogLevel, MemoryLogger};
    use crate::submit::FileSubmitter;
    use assert_matches::assert_matches;
    use std::sync::Mutex;

    #[derive(Clone)]
    enum Script {
        Pass,
        Fail,
        Error,
        Panic,
        Cancel(CancellationToken),
        WriteArtifact,
        LoadImage,
        ReadImage,
    }

    struct Scripted {
        name: String,
        script: Script,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl Check for Scripted {
        fn name(&self) -> &str {
            &self.name
        }

        fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
            self.calls.lock().unwrap().push(self.name.clone());
            match &self.script {
                Script::Pass => Ok(true),
                Script::Fail => Ok(false),
                Script::Error => Err(CheckError::failed("registry unreachable")),
                Script::Panic => panic!("index out of bounds"),
                Script::Cancel(token) => {
                    token.cancel();
                    Ok(true)
                }
                Script::WriteArtifact => {
                    ctx.artifacts().write_file("notes.txt", b"written")?;
                    Ok(true)
                }
                Script::LoadImage => {
                    let archive = ctx
                        .target()
                        .image_archive
                        .clone()
                        .ok_or(CheckError::ImageNotLoaded)?;
                    let image = LoadedImage::from_archive(&archive, &ctx.workdir().join("image"))?;
                    ctx.set_image(image)?;
                    Ok(true)
                }
                Script::ReadImage => Ok(ctx.require_image()?.user() == "1001"),
            }
        }

        fn metadata(&self) -> CheckMetadata {
            CheckMetadata::new(format!("{} check", self.name))
        }

        fn help(&self) -> CheckHelp {
            CheckHelp::new("help", "suggestion")
        }
    }

    struct Harness {
        calls: Arc<Mutex<Vec<String>>>,
        memory: Arc<MemoryLogger>,
        ctx: ExecutionContext,
    }

    impl Harness {
        fn new() -> Self {
            let memory = Arc::new(MemoryLogger::new());
            let logger = Arc::new(LoggingService::new(memory.clone(), LogLevel::Debug));
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                memory,
                ctx: ExecutionContext::new().with_logger(logger),
            }
        }

        fn checks(&self, scripts: &[(&str, Script)]) -> Vec<Box<dyn Check>> {
            scripts
                .iter()
                .map(|(name, script)| {
                    Box::new(Scripted {
                        name: name.to_string(),
                        script: script.clone(),
                        calls: self.calls.clone(),
                    }) as Box<dyn Check>
                })
                .collect()
        }

        fn engine(&self, scripts: &[(&str, Script)]) -> Engine {
            Engine::new(
                &self.ctx,
                self.checks(scripts),
                None,
                Target::new("example.io/app:v1", "amd64"),
            )
            .unwrap()
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    fn names(set: &ResultSet) -> Vec<&str> {
        set.results.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_failures_do_not_stop_the_run() {
        let harness = Harness::new();
        let mut engine = harness.engine(&[
            ("A", Script::Pass),
            ("B", Script::Fail),
            ("C", Script::Error),
            ("D", Script::Panic),
            ("E", Script::Pass),
        ]);

        engine.execute_checks().unwrap();
        let set = engine.results();

        assert_eq!(names(&set), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(harness.calls(), vec!["A", "B", "C", "D", "E"]);
        assert!(set.results[0].is_passed());
        assert!(set.results[1].is_failed());
        assert_matches!(
            &set.results[2].status,
            CheckStatus::Errored { reason: ErroredReason::CheckError, detail } if detail == "registry unreachable"
        );
        assert_matches!(
            &set.results[3].status,
            CheckStatus::Errored { reason: ErroredReason::Panicked, detail } if detail.contains("index out of bounds")
        );
        assert!(set.results[4].is_passed());
        assert!(!set.passed());
        assert_eq!(set.results[0].metadata.description, "A check");
    }

    #[test]
    fn test_cancellation_mid_run() {
        let token = CancellationToken::new();
        let mut harness = Harness::new();
        harness.ctx = harness.ctx.clone().with_cancellation(token.clone());

        let mut engine = harness.engine(&[
            ("A", Script::Pass),
            ("B", Script::Cancel(token)),
            ("C", Script::Pass),
            ("D", Script::Pass),
        ]);

        let err = engine.execute_checks().unwrap_err();
        assert_matches!(err, EngineError::Cancelled { completed: 1, scheduled: 4, .. });
        assert!(err.is_cancellation());

        let set = engine.results();
        assert_eq!(set.len(), 4);
        assert_eq!(harness.calls(), vec!["A", "B"]);
        assert!(set.results[0].is_passed());
        for result in &set.results[1..] {
            assert_matches!(
                &result.status,
                CheckStatus::Errored { reason: ErroredReason::Cancelled, .. }
            );
        }
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut harness = Harness::new();
        harness.ctx = harness.ctx.clone().with_cancellation(token);

        let mut engine = harness.engine(&[("A", Script::Pass), ("B", Script::Pass)]);

        assert_matches!(engine.execute_checks(), Err(EngineError::Cancelled { completed: 0, .. }));
        assert!(harness.calls().is_empty());
        assert_eq!(engine.results().errored_results().count(), 2);
    }

    #[test]
    fn test_results_before_and_after_execution() {
        let harness = Harness::new();
        let mut engine = harness.engine(&[("A", Script::Pass)]);

        assert_eq!(engine.results(), ResultSet::empty());
        assert_matches!(engine.submit(), Err(EngineError::NotExecuted));

        engine.execute_checks().unwrap();
        let first = engine.results();
        assert_eq!(first, engine.results());
        assert!(first.passed());
        assert_eq!(first.image, "example.io/app:v1");

        assert_matches!(engine.execute_checks(), Err(EngineError::AlreadyExecuted));
        assert_eq!(harness.calls().len(), 1);
    }

    #[test]
    fn test_construction_errors() {
        let harness = Harness::new();

        let result = Engine::new(&harness.ctx, vec![], None, Target::new("img", "amd64"));
        assert_matches!(result.err(), Some(EngineError::NoChecks));

        let result = Engine::new(
            &harness.ctx,
            harness.checks(&[("A", Script::Pass)]),
            None,
            Target::new("", "amd64"),
        );
        assert_matches!(result.err(), Some(EngineError::Target(TargetError::ImageEmpty)));

        let result = Engine::new(
            &ExecutionContext::new(),
            harness.checks(&[("A", Script::Pass)]),
            None,
            Target::new("img", "amd64"),
        );
        let err = result.err().unwrap();
        assert_matches!(err, EngineError::MissingLogger);
        assert!(err.is_configuration_error());

        let result = Engine::new(
            &harness.ctx,
            harness.checks(&[("A", Script::Pass), ("A", Script::Fail)]),
            None,
            Target::new("img", "amd64"),
        );
        assert_matches!(result.err(), Some(EngineError::DuplicateCheck(name)) if name == "A");
    }

    #[test]
    fn test_artifacts_are_attributed_to_checks() {
        let harness = Harness::new();
        let writer = Arc::new(MapWriter::with_root("/artifacts/amd64"));
        let ctx = harness.ctx.clone().with_artifact_writer(writer.clone());

        let mut engine = Engine::new(
            &ctx,
            harness.checks(&[("A", Script::Pass), ("B", Script::WriteArtifact)]),
            None,
            Target::new("img", "amd64"),
        )
        .unwrap();
        engine.execute_checks().unwrap();
        let set = engine.results();

        assert!(set.results[0].artifacts.is_empty());
        assert_eq!(set.results[1].artifacts.len(), 1);
        assert_eq!(
            set.results[1].artifacts[0].path,
            std::path::PathBuf::from("/artifacts/amd64/notes.txt")
        );
        assert_eq!(writer.get("notes.txt"), Some(b"written".to_vec()));
    }

    #[test]
    fn test_loaded_image_is_shared_with_later_checks() {
        let temp = tempfile::tempdir().unwrap();
        let archive = write_image_archive(temp.path(), "1001", &[], &[&[("etc/motd", b"hi")]]);
        let harness = Harness::new();

        let mut engine = Engine::new(
            &harness.ctx,
            harness.checks(&[("Load", Script::LoadImage), ("Read", Script::ReadImage)]),
            None,
            Target::new("img", "amd64").with_image_archive(archive),
        )
        .unwrap();
        engine.execute_checks().unwrap();

        assert!(engine.results().passed());
        assert_eq!(engine.image().map(|i| i.layer_count), Some(1));
    }

    #[test]
    fn test_read_without_load_errors() {
        let harness = Harness::new();
        let mut engine = harness.engine(&[("Read", Script::ReadImage)]);
        engine.execute_checks().unwrap();

        assert_eq!(
            engine.results().results[0].error_detail(),
            Some("image has not been loaded by an earlier check")
        );
    }

    #[test]
    fn test_logs_one_line_per_check() {
        let harness = Harness::new();
        let mut engine = harness.engine(&[("A", Script::Pass), ("B", Script::Fail), ("C", Script::Error)]);
        engine.execute_checks().unwrap();

        assert_eq!(harness.memory.find("executing checks").len(), 1);
        assert_eq!(harness.memory.find("running check").len(), 3);
        assert_eq!(harness.memory.find("check completed").len(), 2);
        assert_eq!(harness.memory.get_errors().len(), 1);
    }

    #[test]
    fn test_submit_uses_attached_submitter() {
        let temp = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let submitter: Arc<dyn Submitter> = Arc::new(FileSubmitter::new(temp.path()));

        let mut engine = Engine::new(
            &harness.ctx,
            harness.checks(&[("A", Script::Pass)]),
            Some(submitter),
            Target::new("img", "s390x"),
        )
        .unwrap()
        .with_policy(Policy::Container);
        engine.execute_checks().unwrap();
        engine.submit().unwrap();

        assert!(temp.path().join("submission-s390x.json").exists());
        assert_eq!(engine.results().policy, Some(Policy::Container));
    }
}
