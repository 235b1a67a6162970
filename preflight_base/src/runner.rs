//! Runs checks for one platform and writes their reports

use crate::context::ExecutionContext;
use crate::errors::PreflightError;
use crate::formatters::{Formatter, JunitXmlFormatter};
use crate::results::ResultSet;
use crate::submit::Submitter;
use std::fs;
use std::path::{Path, PathBuf};

pub const RESULTS_FILE_BASENAME: &str = "results";
pub const JUNIT_RESULTS_FILE: &str = "results-junit.xml";

/// Output options for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckConfig {
    pub include_junit_results: bool,
    pub submit_results: bool,
}

/// Destination for rendered reports
pub trait ResultWriter: Send + Sync {
    fn write_results(&self, path: &Path, contents: &[u8]) -> std::io::Result<()>;
}

/// Writes reports straight to the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultWriterFile;

impl ResultWriter for ResultWriterFile {
    fn write_results(&self, path: &Path, contents: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents)
    }
}

fn write(writer: &dyn ResultWriter, path: PathBuf, contents: &[u8]) -> Result<PathBuf, PreflightError> {
    writer
        .write_results(&path, contents)
        .map_err(|source| PreflightError::WriteResults {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Execute `run`, then write `results.<ext>`, the optional JUnit report and
/// submit when asked.
///
/// A cancelled run still gets its reports written from the results gathered
/// before it stopped; it is not submitted and the cancellation is returned.
///
/// Reports land in the artifact writer's directory, or the working directory
/// when the context has no writer.
pub fn run_preflight<F>(
    ctx: &ExecutionContext,
    run: F,
    cfg: CheckConfig,
    formatter: &dyn Formatter,
    writer: &dyn ResultWriter,
    submitter: &dyn Submitter,
) -> Result<ResultSet, PreflightError>
where
    F: FnOnce(&ExecutionContext) -> Result<ResultSet, PreflightError>,
{
    let logger = ctx
        .logger()
        .cloned()
        .ok_or(PreflightError::InvalidLoggingConfiguration)?;

    let (results, cancelled) = match run(ctx) {
        Ok(results) => (results, None),
        Err(PreflightError::Cancelled { cause, results }) => (*results, Some(cause)),
        Err(e) => return Err(e),
    };

    let dir = ctx
        .artifact_writer()
        .map(|w| w.path().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    let rendered = formatter.format(&results)?;
    let results_file = dir.join(format!(
        "{}.{}",
        RESULTS_FILE_BASENAME,
        formatter.file_extension()
    ));
    let path = write(writer, results_file, &rendered)?;
    logger.log_debug_with_context(
        "results written",
        vec![("path", path.display().to_string().as_str())],
    );

    if cfg.include_junit_results {
        let junit = JunitXmlFormatter.format(&results)?;
        let path = write(writer, dir.join(JUNIT_RESULTS_FILE), &junit)?;
        logger.log_debug_with_context(
            "junit results written",
            vec![("path", path.display().to_string().as_str())],
        );
    }

    if let Some(cause) = cancelled {
        logger.log_warning_with_context(
            "partial results written",
            vec![("platform", results.platform.as_str()), ("cause", cause.as_str())],
        );
        return Err(PreflightError::Cancelled {
            cause,
            results: Box::new(results),
        });
    }

    if cfg.submit_results {
        submitter.submit(&results, &logger)?;
    }

    let summary = results.summary();
    let (passed, failed, errored) = (
        summary.passed.to_string(),
        summary.failed.to_string(),
        summary.errored.to_string(),
    );
    logger.log_info_with_context(
        if results.passed() {
            "preflight result: PASSED"
        } else {
            "preflight result: FAILED"
        },
        vec![
            ("platform", results.platform.as_str()),
            ("passed", passed.as_str()),
            ("failed", failed.as_str()),
            ("errored", errored.as_str()),
        ],
    );

    Ok(results)
}
