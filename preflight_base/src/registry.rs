//! Policy registry
//!
//! Maps each policy to an ordered list of check constructors. Resolving a
//! policy builds fresh check instances, so no check is shared between runs.

use crate::check::{Check, CheckInitError};
use crate::policy::{Policy, UnknownPolicy};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds a check from the shared configuration
pub type CheckConstructor =
    Arc<dyn Fn(&CommonCheckConfig) -> Result<Box<dyn Check>, CheckInitError> + Send + Sync>;

/// Settings injected into every check of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommonCheckConfig {
    pub docker_config: Option<PathBuf>,
}

impl CommonCheckConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_docker_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_config = Some(path.into());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownPolicy(#[from] UnknownPolicy),

    #[error("policy '{0}' has no checks registered")]
    EmptyPolicy(Policy),

    #[error("check '{check}' is registered twice for policy '{policy}'")]
    DuplicateCheck { policy: Policy, check: String },

    #[error("cannot initialize checks: {0}")]
    CannotInitializeChecks(#[from] CheckInitError),
}

#[derive(Clone)]
struct RegisteredCheck {
    name: String,
    constructor: CheckConstructor,
}

/// Policy to ordered check constructors
#[derive(Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<Policy, Vec<RegisteredCheck>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check to the end of a policy's list
    pub fn register(
        &mut self,
        policy: Policy,
        name: impl Into<String>,
        constructor: CheckConstructor,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let checks = self.policies.entry(policy).or_default();

        if checks.iter().any(|c| c.name == name) {
            return Err(RegistryError::DuplicateCheck {
                policy,
                check: name,
            });
        }

        checks.push(RegisteredCheck { name, constructor });
        Ok(())
    }

    /// Construct the checks for `policy`, in registration order
    pub fn resolve(
        &self,
        policy: Policy,
        config: &CommonCheckConfig,
    ) -> Result<Vec<Box<dyn Check>>, RegistryError> {
        let registered = self
            .policies
            .get(&policy)
            .filter(|checks| !checks.is_empty())
            .ok_or(RegistryError::EmptyPolicy(policy))?;

        registered
            .iter()
            .map(|entry| (entry.constructor)(config).map_err(RegistryError::from))
            .collect()
    }

    /// Like `resolve`, for a policy given by name
    pub fn resolve_str(
        &self,
        policy: &str,
        config: &CommonCheckConfig,
    ) -> Result<Vec<Box<dyn Check>>, RegistryError> {
        let policy: Policy = policy.parse()?;
        self.resolve(policy, config)
    }

    /// Ordered check names for `policy` without constructing anything
    pub fn check_names(&self, policy: Policy) -> Vec<&str> {
        self.policies
            .get(&policy)
            .map(|checks| checks.iter().map(|c| c.name.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn has_policy(&self, policy: Policy) -> bool {
        self.policies.get(&policy).is_some_and(|c| !c.is_empty())
    }

    /// Registered policies in declaration order
    pub fn policies(&self) -> Vec<Policy> {
        Policy::ALL
            .into_iter()
            .filter(|p| self.has_policy(*p))
            .collect()
    }

    /// True when every known policy has at least one check
    pub fn is_complete(&self) -> bool {
        Policy::ALL.iter().all(|p| self.has_policy(*p))
    }
}

/// Fluent construction of a `PolicyRegistry`
#[derive(Default)]
pub struct RegistryBuilder {
    registry: PolicyRegistry,
    errors: Vec<RegistryError>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a check to each listed policy
    pub fn with_check<F>(mut self, policies: &[Policy], name: &str, constructor: F) -> Self
    where
        F: Fn(&CommonCheckConfig) -> Result<Box<dyn Check>, CheckInitError>
            + Send
            + Sync
            + 'static,
    {
        let constructor: CheckConstructor = Arc::new(constructor);
        for policy in policies {
            if let Err(e) = self
                .registry
                .register(*policy, name, Arc::clone(&constructor))
            {
                self.errors.push(e);
            }
        }
        self
    }

    /// Return the first registration error, if any
    pub fn build(mut self) -> Result<PolicyRegistry, RegistryError> {
        if self.errors.is_empty() {
            Ok(self.registry)
        } else {
            Err(self.errors.remove(0))
        }
    }
}
