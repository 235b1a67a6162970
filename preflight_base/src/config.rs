//! Runtime configuration
//!
//! Sources, lowest precedence first: defaults, an optional TOML file, the
//! `PFLT_*` environment, then whatever the command line sets through the
//! `with_*` builders.

use crate::logging::LogLevel;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ARTIFACTS: &str = "PFLT_ARTIFACTS";
pub const ENV_DOCKER_CONFIG: &str = "PFLT_DOCKERCONFIG";
pub const ENV_PLATFORM: &str = "PFLT_PLATFORM";
pub const ENV_IMAGE_ARCHIVE: &str = "PFLT_IMAGE_ARCHIVE";
pub const ENV_JUNIT: &str = "PFLT_JUNIT";
pub const ENV_SUBMIT: &str = "PFLT_SUBMIT";
pub const ENV_FORMAT: &str = "PFLT_FORMAT";
pub const ENV_LOG_LEVEL: &str = "PFLT_LOGLEVEL";
pub const ENV_TIMEOUT: &str = "PFLT_TIMEOUT";

pub const DEFAULT_ARTIFACTS_DIR: &str = "artifacts";
pub const DEFAULT_OUTPUT_FORMAT: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Optional on-disk configuration, every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub artifacts: Option<PathBuf>,
    pub docker_config: Option<PathBuf>,
    pub platforms: Option<Vec<String>>,
    pub image_archive: Option<String>,
    pub junit: Option<bool>,
    pub submit: Option<bool>,
    pub format: Option<String>,
    pub log_level: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolved configuration for one invocation
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Image or bundle reference under test
    pub image: String,

    /// Requested platforms; empty means the host platform
    pub platforms: Vec<String>,

    /// Registry credentials file
    pub docker_config: Option<PathBuf>,

    /// Root of per-platform artifact directories
    pub artifacts: PathBuf,

    /// Local image archive path, may contain `{platform}`
    pub image_archive: Option<String>,

    pub submit: bool,
    pub write_junit: bool,

    /// Formatter name for the results file
    pub format: String,

    pub log_level: LogLevel,

    /// Deadline for each platform run
    pub timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: String::new(),
            platforms: Vec::new(),
            docker_config: None,
            artifacts: PathBuf::from(DEFAULT_ARTIFACTS_DIR),
            image_archive: None,
            submit: false,
            write_junit: false,
            format: DEFAULT_OUTPUT_FORMAT.to_string(),
            log_level: LogLevel::Info,
            timeout: None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_log_level(key: &str, value: &str) -> Result<LogLevel, ConfigError> {
    LogLevel::parse(value).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: "expected one of error, warn, info, debug".to_string(),
    })
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl RuntimeConfig {
    /// Apply values from a config file over the current ones
    pub fn merge_file(mut self, file: ConfigFile) -> Result<Self, ConfigError> {
        if let Some(v) = file.artifacts {
            self.artifacts = v;
        }
        if let Some(v) = file.docker_config {
            self.docker_config = Some(v);
        }
        if let Some(v) = file.platforms {
            self.platforms = v;
        }
        if let Some(v) = file.image_archive {
            self.image_archive = Some(v);
        }
        if let Some(v) = file.junit {
            self.write_junit = v;
        }
        if let Some(v) = file.submit {
            self.submit = v;
        }
        if let Some(v) = file.format {
            self.format = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = parse_log_level("log_level", &v)?;
        }
        if let Some(v) = file.timeout_secs {
            self.timeout = Some(Duration::from_secs(v));
        }
        Ok(self)
    }

    /// Apply `PFLT_*` variables from the process environment
    pub fn merge_env(self) -> Result<Self, ConfigError> {
        self.merge_env_with(|key| env::var(key).ok())
    }

    /// Apply `PFLT_*` variables from an arbitrary lookup
    pub fn merge_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_ARTIFACTS) {
            self.artifacts = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DOCKER_CONFIG) {
            self.docker_config = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_PLATFORM) {
            self.platforms = vec![v];
        }
        if let Some(v) = lookup(ENV_IMAGE_ARCHIVE) {
            self.image_archive = Some(v);
        }
        if let Some(v) = lookup(ENV_JUNIT) {
            self.write_junit = parse_bool(ENV_JUNIT, &v)?;
        }
        if let Some(v) = lookup(ENV_SUBMIT) {
            self.submit = parse_bool(ENV_SUBMIT, &v)?;
        }
        if let Some(v) = lookup(ENV_FORMAT) {
            self.format = v;
        }
        if let Some(v) = lookup(ENV_LOG_LEVEL) {
            self.log_level = parse_log_level(ENV_LOG_LEVEL, &v)?;
        }
        if let Some(v) = lookup(ENV_TIMEOUT) {
            self.timeout = Some(parse_secs(ENV_TIMEOUT, &v)?);
        }
        Ok(self)
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn with_docker_config(mut self, path: impl Into<PathBuf>) -> Self {
        self.docker_config = Some(path.into());
        self
    }

    pub fn with_artifacts(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts = dir.into();
        self
    }

    pub fn with_image_archive(mut self, template: impl Into<String>) -> Self {
        self.image_archive = Some(template.into());
        self
    }

    pub fn with_submit(mut self, submit: bool) -> Self {
        self.submit = submit;
        self
    }

    pub fn with_junit(mut self, junit: bool) -> Self {
        self.write_junit = junit;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Artifact directory for one platform run
    pub fn artifacts_dir_for(&self, platform: &str) -> PathBuf {
        self.artifacts.join(platform)
    }
}
