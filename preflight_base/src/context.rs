//! Execution context shared by the engine, the runner and the orchestration loop

use crate::artifacts::ArtifactWriter;
use crate::logging::LoggingService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation signal with an optional deadline
///
/// Clones share the same flag, so cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that reports cancelled once `timeout` has elapsed from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst) || self.deadline_exceeded()
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Human readable cause, when cancelled
    pub fn cause(&self) -> Option<&'static str> {
        if self.cancelled.load(Ordering::SeqCst) {
            Some("execution was cancelled")
        } else if self.deadline_exceeded() {
            Some("execution deadline exceeded")
        } else {
            None
        }
    }
}

/// Logger, cancellation and artifact sink for a run
#[derive(Clone, Default)]
pub struct ExecutionContext {
    logger: Option<Arc<LoggingService>>,
    artifacts: Option<Arc<dyn ArtifactWriter>>,
    cancellation: CancellationToken,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: Arc<LoggingService>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_artifact_writer(mut self, writer: Arc<dyn ArtifactWriter>) -> Self {
        self.artifacts = Some(writer);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn logger(&self) -> Option<&Arc<LoggingService>> {
        self.logger.as_ref()
    }

    pub fn artifact_writer(&self) -> Option<&Arc<dyn ArtifactWriter>> {
        self.artifacts.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}
