//! Certification builder
//!
//! One `Certification` describes a single artifact to certify under a
//! policy. Options are set through `with_*` methods; checks are resolved once
//! and consumed by the next `run`, so a later run gets fresh check instances.

use crate::check::Check;
use crate::context::ExecutionContext;
use crate::errors::PreflightError;
use crate::execution::Engine;
use crate::policy::Policy;
use crate::registry::{CommonCheckConfig, PolicyRegistry};
use crate::results::ResultSet;
use crate::target::{host_platform, Target};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Certification {
    registry: Arc<PolicyRegistry>,
    policy: Policy,
    image: String,
    docker_config: Option<PathBuf>,
    platform: Option<String>,
    image_archive: Option<PathBuf>,
    checks: Option<Vec<Box<dyn Check>>>,
}

impl Certification {
    pub fn new(registry: Arc<PolicyRegistry>, policy: Policy, image: impl Into<String>) -> Self {
        Self {
            registry,
            policy,
            image: image.into(),
            docker_config: None,
            platform: None,
            image_archive: None,
            checks: None,
        }
    }

    /// Plain container image, `container` policy unless changed
    pub fn container(registry: Arc<PolicyRegistry>, image: impl Into<String>) -> Self {
        Self::new(registry, Policy::Container, image)
    }

    /// Operator bundle image
    pub fn operator(registry: Arc<PolicyRegistry>, bundle: impl Into<String>) -> Self {
        Self::new(registry, Policy::Operator, bundle)
    }

    /// MCP server image
    pub fn mcp(registry: Arc<PolicyRegistry>, image: impl Into<String>) -> Self {
        Self::new(registry, Policy::Mcp, image)
    }

    /// Build from a resolved target
    pub fn for_target(registry: Arc<PolicyRegistry>, policy: Policy, target: &Target) -> Self {
        let mut cert = Self::new(registry, policy, target.image.clone())
            .with_platform(target.platform.clone());
        cert.docker_config = target.docker_config.clone();
        cert.image_archive = target.image_archive.clone();
        cert
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self.checks = None;
        self
    }

    pub fn with_docker_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_config = Some(path.into());
        self.checks = None;
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn with_image_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.image_archive = Some(path.into());
        self
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Resolve the policy's checks; does nothing if already resolved
    pub fn resolve(&mut self) -> Result<(), PreflightError> {
        if self.checks.is_some() {
            return Ok(());
        }
        if self.image.trim().is_empty() {
            return Err(PreflightError::ImageEmpty);
        }

        let config = CommonCheckConfig {
            docker_config: self.docker_config.clone(),
        };
        self.checks = Some(self.registry.resolve(self.policy, &config)?);
        Ok(())
    }

    /// Policy and ordered check names
    pub fn list(&mut self) -> Result<(Policy, Vec<String>), PreflightError> {
        self.resolve()?;
        let names = self
            .checks
            .iter()
            .flatten()
            .map(|c| c.name().to_string())
            .collect();
        Ok((self.policy, names))
    }

    /// Target this certification runs against
    pub fn target(&self) -> Target {
        Target {
            image: self.image.clone(),
            platform: self.platform.clone().unwrap_or_else(host_platform),
            docker_config: self.docker_config.clone(),
            image_archive: self.image_archive.clone(),
        }
    }

    /// Resolve, execute every check and return the results
    pub fn run(&mut self, ctx: &ExecutionContext) -> Result<ResultSet, PreflightError> {
        self.resolve()?;
        let checks = self.checks.take().unwrap_or_default();

        let mut engine = Engine::new(ctx, checks, None, self.target())?.with_policy(self.policy);
        match engine.execute_checks() {
            Ok(()) => Ok(engine.results()),
            Err(e) => Err(PreflightError::from_engine(e, engine.results())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{CheckContext, CheckError, CheckHelp, CheckInitError, CheckMetadata};
    use crate::logging::{LogLevel, LoggingService, MemoryLogger};
    use crate::registry::RegistryBuilder;
    use assert_matches::assert_matches;

    struct Always(&'static str, bool);

    impl Check for Always {
        fn name(&self) -> &str {
            self.0
        }

        fn validate(&self, _ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
            Ok(self.1)
        }

        fn metadata(&self) -> CheckMetadata {
            CheckMetadata::new(self.0)
        }

        fn help(&self) -> CheckHelp {
            CheckHelp::default()
        }
    }

    fn registry() -> Arc<PolicyRegistry> {
        let registry = RegistryBuilder::new()
            .with_check(&[Policy::Mcp, Policy::ScratchRoot], "First", |_: &CommonCheckConfig| {
                Ok(Box::new(Always("First", true)) as Box<dyn Check>)
            })
            .with_check(&[Policy::Mcp], "Second", |_: &CommonCheckConfig| {
                Ok(Box::new(Always("Second", false)) as Box<dyn Check>)
            })
            .with_check(&[Policy::Operator], "NeedsAuth", |config: &CommonCheckConfig| {
                match &config.docker_config {
                    Some(path) if !path.exists() => {
                        Err(CheckInitError::new("NeedsAuth", "docker config not found"))
                    }
                    _ => Ok(Box::new(Always("NeedsAuth", true)) as Box<dyn Check>),
                }
            })
            .build()
            .unwrap();
        Arc::new(registry)
    }

    fn context() -> ExecutionContext {
        ExecutionContext::new().with_logger(Arc::new(LoggingService::new(
            Arc::new(MemoryLogger::new()),
            LogLevel::Debug,
        )))
    }

    #[test]
    fn test_list_is_idempotent() {
        let mut cert = Certification::mcp(registry(), "example.io/mcp:v1");

        let first = cert.list().unwrap();
        let second = cert.list().unwrap();

        assert_eq!(first, (Policy::Mcp, vec!["First".to_string(), "Second".to_string()]));
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_image() {
        let mut cert = Certification::mcp(registry(), "  ");
        assert_matches!(cert.resolve(), Err(PreflightError::ImageEmpty));
    }

    #[test]
    fn test_constructor_failure() {
        let mut cert = Certification::operator(registry(), "example.io/bundle:v1")
            .with_docker_config("/nonexistent/auth.json");
        assert_matches!(cert.resolve(), Err(PreflightError::CannotInitializeChecks(_)));
    }

    #[test]
    fn test_run_produces_one_result_per_check() {
        let mut cert = Certification::new(registry(), Policy::Mcp, "example.io/mcp:v1")
            .with_platform("s390x");
        let results = cert.run(&context()).unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results.platform, "s390x");
        assert_eq!(results.policy, Some(Policy::Mcp));
        assert!(!results.passed());

        // A second run resolves fresh checks.
        assert_eq!(cert.run(&context()).unwrap().len(), 2);
    }

    #[test]
    fn test_with_policy_changes_checks() {
        let mut cert = Certification::mcp(registry(), "example.io/app:v1");
        cert.resolve().unwrap();
        let mut cert = cert.with_policy(Policy::ScratchRoot);

        assert_eq!(cert.list().unwrap().1, vec!["First".to_string()]);
        assert_eq!(cert.target().platform, host_platform());
    }
}
