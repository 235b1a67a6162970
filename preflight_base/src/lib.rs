//! # Preflight Base
//!
//! Policy-driven check execution for container certification: policies resolve
//! to ordered checks, an engine runs them against one target per platform, and
//! the results are rendered, written and optionally submitted.

pub mod artifacts;
pub mod certification;
pub mod check;
pub mod config;
pub mod context;
pub mod errors;
pub mod execution;
pub mod formatters;
pub mod fsutil;
pub mod image;
pub mod logging;
pub mod orchestrate;
pub mod policy;
pub mod registry;
pub mod results;
pub mod runner;
pub mod submit;
pub mod target;

pub use errors::PreflightError;

pub mod prelude {
    pub use crate::artifacts::{ArtifactRef, ArtifactWriter, FilesystemWriter, MapWriter};
    pub use crate::certification::Certification;
    pub use crate::check::{
        Check, CheckContext, CheckError, CheckHelp, CheckInitError, CheckLevel, CheckMetadata,
    };
    pub use crate::config::{ConfigFile, RuntimeConfig};
    pub use crate::context::{CancellationToken, ExecutionContext};
    pub use crate::errors::PreflightError;
    pub use crate::execution::{Engine, EngineError};
    pub use crate::formatters::{new_by_name, Formatter, DEFAULT_FORMAT};
    pub use crate::image::LoadedImage;
    pub use crate::logging::{LogLevel, LoggingService};
    pub use crate::orchestrate::{certify_platforms, run_platforms, PlatformRun};
    pub use crate::policy::Policy;
    pub use crate::registry::{CommonCheckConfig, PolicyRegistry, RegistryBuilder};
    pub use crate::results::{CheckResult, CheckStatus, ErroredReason, ResultSet};
    pub use crate::runner::{run_preflight, CheckConfig, ResultWriterFile};
    pub use crate::submit::{FileSubmitter, NoopSubmitter, Submitter};
    pub use crate::target::{resolve_targets, Target};
}
