//! Multi-platform driver
//!
//! Platforms are processed one after another. Each gets its own target,
//! artifact directory and engine. The first platform error stops the loop and
//! is returned to the caller.

use crate::artifacts::FilesystemWriter;
use crate::certification::Certification;
use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::errors::PreflightError;
use crate::formatters::new_by_name;
use crate::policy::Policy;
use crate::registry::PolicyRegistry;
use crate::results::ResultSet;
use crate::runner::{run_preflight, CheckConfig, ResultWriterFile};
use crate::submit::{NoopSubmitter, Submitter};
use crate::target::{resolve_targets, Target};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of one platform
#[derive(Debug, Clone)]
pub struct PlatformRun {
    pub platform: String,
    pub artifacts_dir: PathBuf,
    pub results: ResultSet,
}

/// Run `run_one` for every platform in `config`, stopping at the first error
pub fn run_platforms<F>(
    ctx: &ExecutionContext,
    config: &RuntimeConfig,
    mut run_one: F,
) -> Result<Vec<PlatformRun>, PreflightError>
where
    F: FnMut(&ExecutionContext, &Target) -> Result<ResultSet, PreflightError>,
{
    let logger = ctx
        .logger()
        .cloned()
        .ok_or(PreflightError::InvalidLoggingConfiguration)?;

    let targets = resolve_targets(config)?;
    let mut runs = Vec::with_capacity(targets.len());

    for target in targets {
        logger.log_info(&format!(
            "running checks for {} for platform {}",
            target.image, target.platform
        ));

        let platform_error = |source: PreflightError| PreflightError::Platform {
            platform: target.platform.clone(),
            source: Box::new(source),
        };

        let artifacts_dir = config.artifacts_dir_for(&target.platform);
        let writer = FilesystemWriter::new(&artifacts_dir)
            .map_err(|e| platform_error(PreflightError::from(e)))?;

        let mut cancellation = ctx.cancellation().clone();
        if let Some(timeout) = config.timeout {
            cancellation = cancellation.with_deadline(Instant::now() + timeout);
        }

        let platform_ctx = ctx
            .clone()
            .with_artifact_writer(Arc::new(writer))
            .with_cancellation(cancellation);

        let results = run_one(&platform_ctx, &target).map_err(platform_error)?;

        runs.push(PlatformRun {
            platform: target.platform.clone(),
            artifacts_dir,
            results,
        });
    }

    Ok(runs)
}

/// Certify every configured platform under `policy`, writing reports into
/// each platform's artifact directory
pub fn certify_platforms(
    ctx: &ExecutionContext,
    registry: Arc<PolicyRegistry>,
    policy: Policy,
    config: &RuntimeConfig,
    submitter: Option<&dyn Submitter>,
) -> Result<Vec<PlatformRun>, PreflightError> {
    let formatter = new_by_name(&config.format)?;
    let noop = NoopSubmitter::new(config.submit).with_reason("no submission service configured");
    let submitter = submitter.unwrap_or(&noop);

    let cfg = CheckConfig {
        include_junit_results: config.write_junit,
        submit_results: config.submit,
    };

    run_platforms(ctx, config, |platform_ctx, target| {
        let mut cert = Certification::for_target(Arc::clone(&registry), policy, target);
        run_preflight(
            platform_ctx,
            |c| cert.run(c),
            cfg,
            formatter.as_ref(),
            &ResultWriterFile,
            submitter,
        )
    })
}
