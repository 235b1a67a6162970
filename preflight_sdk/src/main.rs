//! Preflight command line
//!
//! `preflight check container|operator|mcp <IMAGE>` certifies an image on
//! every requested platform. `preflight list-checks` prints a policy's checks.

use clap::{Args, Parser, Subcommand, ValueEnum};
use preflight_base::config::{ConfigFile, RuntimeConfig};
use preflight_base::context::ExecutionContext;
use preflight_base::logging::{ConsoleLogger, LogLevel, LoggingService, StructuredLogger};
use preflight_base::orchestrate::{certify_platforms, PlatformRun};
use preflight_base::policy::{Policy, UnknownPolicy};
use preflight_base::registry::RegistryError;
use preflight_base::PreflightError;
use preflight_sdk::create_policy_registry;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const EXIT_PASSED: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "preflight", version, about = "Certify container images, operator bundles and MCP servers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the certification checks for an artifact
    Check {
        #[command(subcommand)]
        artifact: CheckCommand,
    },
    /// Print the checks a policy runs, in order
    ListChecks {
        /// Policy name
        #[arg(long, default_value = "container")]
        policy: String,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum CheckCommand {
    /// Runs checks for a container image
    Container {
        /// Image reference, e.g. quay.io/repo/image:tag
        image: String,

        /// container, scratch-nonroot, scratch-root, root or konflux
        #[arg(long, default_value = "container")]
        policy: String,

        #[command(flatten)]
        options: CheckOptions,
    },
    /// Runs checks for an operator bundle image
    Operator {
        /// Bundle image reference
        bundle: String,

        #[command(flatten)]
        options: CheckOptions,
    },
    /// Runs checks for an MCP server image
    Mcp {
        /// Image reference of the MCP server
        image: String,

        #[command(flatten)]
        options: CheckOptions,
    },
}

#[derive(Debug, Args, Default)]
struct CheckOptions {
    /// Platforms to check, repeatable or comma separated
    #[arg(long, value_delimiter = ',')]
    platform: Vec<String>,

    /// Root directory for artifacts and results
    #[arg(long)]
    artifacts: Option<PathBuf>,

    /// Registry credentials file
    #[arg(long)]
    docker_config: Option<PathBuf>,

    /// Local `docker save` archive; `{platform}` is replaced per platform
    #[arg(long)]
    image_archive: Option<String>,

    /// Also write results-junit.xml
    #[arg(long)]
    junit: bool,

    /// Submit results after each platform
    #[arg(long)]
    submit: bool,

    /// Results format: json, junitxml or text
    #[arg(long)]
    format: Option<String>,

    /// Deadline per platform
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// TOML configuration file
    #[arg(long, env = "PFLT_CONFIG")]
    config: Option<PathBuf>,

    /// Where check log lines go [default: env]
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    /// Through env_logger, filtered by RUST_LOG
    #[default]
    Env,
    /// Plain lines on stderr
    Console,
    /// One JSON object per line on stderr
    Json,
}

impl LogFormat {
    fn service(self, level: LogLevel) -> LoggingService {
        match self {
            LogFormat::Env => LoggingService::facade(level),
            LogFormat::Console => LoggingService::new(Arc::new(ConsoleLogger::new(level)), level),
            LogFormat::Json => LoggingService::new(Arc::new(StructuredLogger::new(level)), level),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error("failed to build policy registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("policy '{policy}' cannot be used to check {artifact}")]
    PolicyMismatch { policy: Policy, artifact: &'static str },
}

impl CliError {
    fn user_message(&self) -> String {
        match self {
            CliError::Preflight(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

impl From<UnknownPolicy> for CliError {
    fn from(e: UnknownPolicy) -> Self {
        CliError::Preflight(e.into())
    }
}

impl CheckOptions {
    /// Defaults, then the config file, then `PFLT_*` variables, then flags
    fn resolve(self, image: String) -> Result<RuntimeConfig, PreflightError> {
        let mut config = RuntimeConfig::default();
        if let Some(path) = &self.config {
            config = config.merge_file(ConfigFile::load(path)?)?;
        }
        config = config.merge_env()?.with_image(image);

        if !self.platform.is_empty() {
            config = config.with_platforms(self.platform);
        }
        if let Some(dir) = self.artifacts {
            config = config.with_artifacts(dir);
        }
        if let Some(path) = self.docker_config {
            config = config.with_docker_config(path);
        }
        if let Some(template) = self.image_archive {
            config = config.with_image_archive(template);
        }
        if self.junit {
            config = config.with_junit(true);
        }
        if self.submit {
            config = config.with_submit(true);
        }
        if let Some(format) = self.format {
            config = config.with_format(format);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }
}

impl CheckCommand {
    fn into_parts(self) -> Result<(Policy, String, CheckOptions), CliError> {
        match self {
            CheckCommand::Container {
                image,
                policy,
                options,
            } => {
                let policy: Policy = policy.parse()?;
                if !policy.is_container_policy() {
                    return Err(CliError::PolicyMismatch {
                        policy,
                        artifact: "a container image",
                    });
                }
                Ok((policy, image, options))
            }
            CheckCommand::Operator { bundle, options } => Ok((Policy::Operator, bundle, options)),
            CheckCommand::Mcp { image, options } => Ok((Policy::Mcp, image, options)),
        }
    }
}

fn print_summary(runs: &[PlatformRun]) {
    for run in runs {
        let summary = run.results.summary();
        println!(
            "{}: {} ({} passed, {} failed, {} errored) -> {}",
            run.platform,
            if run.results.passed() { "PASSED" } else { "FAILED" },
            summary.passed,
            summary.failed,
            summary.errored,
            run.artifacts_dir.display()
        );
    }
}

fn run_check(artifact: CheckCommand) -> Result<u8, CliError> {
    let (policy, image, options) = artifact.into_parts()?;
    let log_format = options.log_format.unwrap_or_default();
    let config = options.resolve(image)?;

    init_logging(&config);
    log::info!(
        "certification library version {}",
        env!("CARGO_PKG_VERSION")
    );

    let registry = Arc::new(create_policy_registry()?);
    let ctx = ExecutionContext::new().with_logger(Arc::new(log_format.service(config.log_level)));

    let runs = certify_platforms(&ctx, registry, policy, &config, None).map_err(|e| {
        if let Some(partial) = e.partial_results() {
            let summary = partial.summary();
            log::warn!(
                "{}: stopped with {} of {} checks completed, partial report in {}",
                partial.platform,
                summary.passed + summary.failed,
                summary.total,
                config.artifacts_dir_for(&partial.platform).display()
            );
        }
        e
    })?;
    print_summary(&runs);

    if runs.iter().all(|run| run.results.passed()) {
        Ok(EXIT_PASSED)
    } else {
        Ok(EXIT_FAILED)
    }
}

fn list_checks(policy: &str) -> Result<u8, CliError> {
    let policy: Policy = policy.parse()?;
    let registry = create_policy_registry()?;

    println!("{}:", policy);
    for name in registry.check_names(policy) {
        println!("  {}", name);
    }
    Ok(EXIT_PASSED)
}

/// `RUST_LOG` wins over the configured level
fn init_logging(config: &RuntimeConfig) {
    let env = env_logger::Env::default().default_filter_or(config.log_level.as_str());
    // A second init only happens in tests.
    let _ = env_logger::Builder::from_env(env).try_init();
}

fn execute(cli: Cli) -> Result<u8, CliError> {
    match cli.command {
        Command::Check { artifact } => run_check(artifact),
        Command::ListChecks { policy } => list_checks(&policy),
        Command::Version => {
            println!("preflight {}", env!("CARGO_PKG_VERSION"));
            Ok(EXIT_PASSED)
        }
    }
}

fn main() -> ExitCode {
    match execute(Cli::parse()) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {}", e.user_message());
            ExitCode::from(EXIT_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use clap::CommandFactory;
    use std::fs;
    use std::path::Path;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_container_flags() {
        let cli = Cli::try_parse_from([
            "preflight",
            "check",
            "container",
            "example.io/app:v1",
            "--policy",
            "konflux",
            "--platform",
            "amd64,arm64",
            "--platform",
            "s390x",
            "--junit",
            "--timeout",
            "30",
        ])
        .unwrap();

        let Command::Check { artifact } = cli.command else {
            panic!("expected check command");
        };
        let (policy, image, options) = artifact.into_parts().unwrap();
        assert_eq!(policy, Policy::Konflux);
        assert_eq!(image, "example.io/app:v1");
        assert_eq!(options.platform, vec!["amd64", "arm64", "s390x"]);
        assert!(options.junit);
        assert_eq!(options.timeout, Some(30));
    }

    #[test]
    fn test_parse_log_format() {
        let cli = Cli::try_parse_from([
            "preflight",
            "check",
            "mcp",
            "example.io/mcp:v1",
            "--log-format",
            "json",
        ])
        .unwrap();
        let Command::Check { artifact } = cli.command else {
            panic!("expected check command");
        };
        let (_, _, options) = artifact.into_parts().unwrap();
        assert_eq!(options.log_format, Some(LogFormat::Json));

        assert!(Cli::try_parse_from([
            "preflight", "check", "mcp", "example.io/mcp:v1", "--log-format", "xml",
        ])
        .is_err());

        let service = LogFormat::Console.service(LogLevel::Warning);
        assert!(service.should_log(LogLevel::Error));
        assert!(!service.should_log(LogLevel::Info));
    }

    #[test]
    fn test_container_rejects_other_policies() {
        let command = CheckCommand::Container {
            image: "example.io/app:v1".into(),
            policy: "operator".into(),
            options: CheckOptions::default(),
        };
        assert_matches!(command.into_parts(), Err(CliError::PolicyMismatch { .. }));

        let command = CheckCommand::Container {
            image: "example.io/app:v1".into(),
            policy: "nonsense".into(),
            options: CheckOptions::default(),
        };
        assert_matches!(
            command.into_parts(),
            Err(CliError::Preflight(PreflightError::UnknownPolicy(_)))
        );
    }

    #[test]
    fn test_flags_override_config_file() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("preflight.toml");
        fs::write(&file, "artifacts = \"from-file\"\nformat = \"text\"\njunit = true\n").unwrap();

        let options = CheckOptions {
            artifacts: Some(PathBuf::from("from-flag")),
            config: Some(file),
            ..CheckOptions::default()
        };
        let config = options.resolve("example.io/app:v1".into()).unwrap();

        assert_eq!(config.artifacts, PathBuf::from("from-flag"));
        assert_eq!(config.format, "text");
        assert!(config.write_junit);
        assert_eq!(config.image, "example.io/app:v1");
    }

    fn write_mcp_archive(dir: &Path, user: &str) -> PathBuf {
        let labels = serde_json::json!({
            "name": "mcp", "vendor": "Example", "version": "1.0",
            "release": "1", "summary": "MCP server", "description": "An MCP server",
        });
        let config = serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "User": user, "Labels": labels },
            "rootfs": { "type": "layers", "diff_ids": [] },
        });
        let manifest = serde_json::json!([{
            "Config": "config.json",
            "RepoTags": ["example.io/mcp:v1"],
            "Layers": ["layer0/layer.tar"],
        }]);

        let layer = tar_bytes(&[("licenses/LICENSE", b"Apache-2.0".as_slice())]);
        let config = serde_json::to_vec(&config).unwrap();
        let manifest = serde_json::to_vec(&manifest).unwrap();
        let archive = tar_bytes(&[
            ("manifest.json", manifest.as_slice()),
            ("config.json", config.as_slice()),
            ("layer0/layer.tar", layer.as_slice()),
        ]);

        let path = dir.join(format!("mcp-{}.tar", user));
        fs::write(&path, archive).unwrap();
        path
    }

    fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn mcp_command(archive: &Path, artifacts: &Path) -> CheckCommand {
        CheckCommand::Mcp {
            image: "example.io/mcp:v1".into(),
            options: CheckOptions {
                platform: vec!["amd64".into()],
                artifacts: Some(artifacts.to_path_buf()),
                image_archive: Some(archive.display().to_string()),
                ..CheckOptions::default()
            },
        }
    }

    #[test]
    fn test_mcp_check_end_to_end() {
        let temp = tempfile::tempdir().unwrap();
        let artifacts = temp.path().join("artifacts");

        let passing = write_mcp_archive(temp.path(), "1001");
        let code = run_check(mcp_command(&passing, &artifacts)).unwrap();
        assert_eq!(code, EXIT_PASSED);

        let results: serde_json::Value =
            serde_json::from_slice(&fs::read(artifacts.join("amd64/results.json")).unwrap()).unwrap();
        assert_eq!(results["passed"], serde_json::Value::Bool(true));

        let root = write_mcp_archive(temp.path(), "root");
        let code = run_check(mcp_command(&root, &artifacts)).unwrap();
        assert_eq!(code, EXIT_FAILED);
    }

    #[test]
    fn test_timeout_still_writes_report() {
        let temp = tempfile::tempdir().unwrap();
        let artifacts = temp.path().join("artifacts");
        let archive = write_mcp_archive(temp.path(), "1001");

        let mut command = mcp_command(&archive, &artifacts);
        if let CheckCommand::Mcp { options, .. } = &mut command {
            options.timeout = Some(0);
            options.junit = true;
        }

        let err = run_check(command).unwrap_err();
        assert_matches!(&err, CliError::Preflight(e) if e.is_cancellation());

        let report = fs::read_to_string(artifacts.join("amd64/results.json")).unwrap();
        assert!(report.contains("ImageArchiveLoaded"));
        assert!(artifacts.join("amd64/results-junit.xml").exists());
    }

    #[test]
    fn test_list_checks_rejects_unknown_policy() {
        assert_matches!(list_checks("nonsense"), Err(CliError::Preflight(_)));
        assert_eq!(list_checks("operator").unwrap(), EXIT_PASSED);
    }
}
