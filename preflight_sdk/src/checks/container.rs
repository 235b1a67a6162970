//! Container image checks
//!
//! These inspect the unpacked root filesystem and the image config of the
//! image loaded earlier in the run.

use super::knowledge_base;
use preflight_base::check::{Check, CheckContext, CheckError, CheckHelp, CheckMetadata};
use preflight_base::target::ImageReference;
use std::fs;
use std::io::ErrorKind;

/// Images with this many layers or more are rejected
pub const ACCEPTABLE_LAYER_MAX: usize = 40;

/// Labels every certified image must carry
pub const REQUIRED_LABELS: [&str; 6] = ["name", "vendor", "version", "release", "summary", "description"];

/// Paths that must not ship inside an image
pub const PROHIBITED_PATHS: [&str; 4] = [
    "etc/pki/entitlement",
    "etc/pki/entitlement-host",
    "etc/rhsm",
    "run/secrets",
];

/// Name fragments reserved for trademark holders
const PROHIBITED_NAME_FRAGMENTS: [&str; 3] = ["redhat", "red-hat", "rhel"];

const LICENSES_DIR: &str = "licenses";

/// Ships license terms under `/licenses`
pub struct HasLicense;

impl HasLicense {
    pub const NAME: &'static str = "HasLicense";
}

impl Check for HasLicense {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let dir = ctx.require_image()?.path(LICENSES_DIR);

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.logger().log_debug("licenses directory not found");
                return Ok(false);
            }
            Err(e) => return Err(CheckError::io(dir, e)),
        };

        let mut count = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CheckError::io(&dir, e))?;
            let file_type = entry.file_type().map_err(|e| CheckError::io(entry.path(), e))?;
            if file_type.is_file() {
                count += 1;
            }
        }

        let found = count.to_string();
        ctx.logger()
            .log_debug_with_context("license files found", vec![("count", found.as_str())]);
        Ok(count > 0)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking if terms and conditions applicable to the software including open source licensing information are present.")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check HasLicense encountered an error. Please review the /licenses directory in your container.",
            "Create a directory named /licenses and include all relevant licensing",
        )
    }
}

/// Carries a tag other than `latest`
pub struct HasUniqueTag;

impl HasUniqueTag {
    pub const NAME: &'static str = "HasUniqueTag";
}

fn is_unique_tag(tag: &str) -> bool {
    !tag.is_empty() && tag != "latest"
}

impl Check for HasUniqueTag {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let reference = ctx
            .target()
            .reference()
            .map_err(|e| CheckError::failed(e.to_string()))?;

        let mut tags: Vec<String> = reference.tag.into_iter().collect();
        if let Some(image) = ctx.image() {
            tags.extend(
                image
                    .repo_tags
                    .iter()
                    .filter_map(|t| ImageReference::parse(t).ok())
                    .filter(|r| r.repository == reference.repository)
                    .filter_map(|r| r.tag),
            );
        }

        let unique = tags.iter().any(|t| is_unique_tag(t));
        if !unique {
            ctx.logger().log_debug_with_context(
                "no unique tag found",
                vec![("tags", tags.join(",").as_str())],
            );
        }
        Ok(unique)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking if container has a tag other than 'latest', so that the image can be uniquely identified.")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check HasUniqueTag encountered an error. Please review the preflight.log file for more information.",
            "Add a tag to your image. Consider using Semantic Versioning. https://semver.org/",
        )
    }
}

/// Fewer than `ACCEPTABLE_LAYER_MAX` layers
pub struct LayerCountAcceptable;

impl LayerCountAcceptable {
    pub const NAME: &'static str = "LayerCountAcceptable";
}

impl Check for LayerCountAcceptable {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let image = ctx.require_image()?;
        let layers = image.layer_count.to_string();
        ctx.logger()
            .log_debug_with_context("number of layers detected", vec![("layers", layers.as_str())]);
        Ok(image.layer_count < ACCEPTABLE_LAYER_MAX)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new(format!(
            "Checking if container has less than {} layers. Too many layers within the container images can degrade container performance.",
            ACCEPTABLE_LAYER_MAX
        ))
        .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check LayerCountAcceptable encountered an error. Please review the preflight.log file for more information.",
            format!(
                "Optimize your Dockerfile to consolidate and minimize the number of layers. Each RUN command will produce a new layer. Try combining RUN commands using && where possible. There must be less than {} layers",
                ACCEPTABLE_LAYER_MAX
            ),
        )
    }
}

/// No credential or entitlement material in the filesystem
pub struct HasNoProhibitedPaths;

impl HasNoProhibitedPaths {
    pub const NAME: &'static str = "HasNoProhibitedPaths";
}

impl Check for HasNoProhibitedPaths {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let image = ctx.require_image()?;

        let mut found = Vec::new();
        for path in PROHIBITED_PATHS {
            ctx.ensure_not_cancelled()?;
            let full = image.path(path);
            match fs::symlink_metadata(&full) {
                Ok(_) => found.push(path),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(CheckError::io(full, e)),
            }
        }

        if !found.is_empty() {
            ctx.logger().log_warning_with_context(
                "prohibited paths found in image",
                vec![("paths", found.join(",").as_str())],
            );
        }
        Ok(found.is_empty())
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking that the container does not ship entitlement certificates or mounted secrets.")
            .optional()
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check HasNoProhibitedPaths encountered an error. Please review the preflight.log file for more information.",
            "Remove entitlement certificates and secrets from the image before publishing it",
        )
    }
}

/// Carries every label in `REQUIRED_LABELS`
pub struct HasRequiredLabel;

impl HasRequiredLabel {
    pub const NAME: &'static str = "HasRequiredLabel";
}

impl Check for HasRequiredLabel {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let image = ctx.require_image()?;

        let missing: Vec<&str> = REQUIRED_LABELS
            .into_iter()
            .filter(|name| image.label(name).map_or(true, |v| v.trim().is_empty()))
            .collect();

        if !missing.is_empty() {
            ctx.logger().log_warning_with_context(
                "expected labels are missing",
                vec![("labels", missing.join(",").as_str())],
            );
        }
        Ok(missing.is_empty())
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new(format!(
            "Checking if the required labels ({}) are present in the container metadata.",
            REQUIRED_LABELS.join(", ")
        ))
        .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check HasRequiredLabel encountered an error. Please review the preflight.log file for more information.",
            format!(
                "Add the following labels to your Dockerfile or Containerfile: {}",
                REQUIRED_LABELS.join(", ")
            ),
        )
    }
}

/// Runs as a user other than root
pub struct RunAsNonRoot;

impl RunAsNonRoot {
    pub const NAME: &'static str = "RunAsNonRoot";
}

/// An unset user means the runtime default, which is root.
fn is_root_user(user: &str) -> bool {
    let name = user.split(':').next().unwrap_or_default().trim();
    name.is_empty() || name == "root" || name == "0"
}

impl Check for RunAsNonRoot {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let user = ctx.require_image()?.user();
        if is_root_user(user) {
            ctx.logger()
                .log_debug_with_context("detected root user", vec![("user", user)]);
            return Ok(false);
        }
        Ok(true)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking if container runs as the root user because a container that does not specify a non-root user will fail the automatic certification.")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check RunAsNonRoot encountered an error. Please review the preflight.log file for more information.",
            "Indicate a specific USER in the dockerfile or containerfile",
        )
    }
}

/// Repository name does not use a reserved name
pub struct HasProhibitedContainerName;

impl HasProhibitedContainerName {
    pub const NAME: &'static str = "HasProhibitedContainerName";
}

fn violates_trademark(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    PROHIBITED_NAME_FRAGMENTS
        .iter()
        .any(|fragment| name.contains(fragment))
}

impl Check for HasProhibitedContainerName {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let reference = ctx
            .target()
            .reference()
            .map_err(|e| CheckError::failed(e.to_string()))?;

        if violates_trademark(reference.name()) {
            ctx.logger()
                .log_debug_with_context("container name violates trademark", vec![("name", reference.name())]);
            return Ok(false);
        }
        Ok(true)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking if the container name violates trademark restrictions.")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check HasProhibitedContainerName encountered an error. Please review the preflight.log file for more information.",
            "Update container name to not include a reserved trademark",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::Fixture;
    use assert_matches::assert_matches;

    const ALL_LABELS: [(&str, &str); 6] = [
        ("name", "app"),
        ("vendor", "Example"),
        ("version", "1.0"),
        ("release", "1"),
        ("summary", "An app"),
        ("description", "An example app"),
    ];

    #[test]
    fn test_license() {
        let with = Fixture::new("example.io/app:v1").with_image("1001", &[], &[("licenses/LICENSE", "MIT")]);
        assert!(with.run(&HasLicense).unwrap());

        let without = Fixture::new("example.io/app:v1").with_image("1001", &[], &[("etc/motd", "hi")]);
        assert!(!without.run(&HasLicense).unwrap());

        let empty = Fixture::new("example.io/app:v1").with_image("1001", &[], &[]);
        fs::create_dir_all(empty.image.get().unwrap().path("licenses")).unwrap();
        assert!(!empty.run(&HasLicense).unwrap());
    }

    #[test]
    fn test_checks_need_a_loaded_image() {
        let fixture = Fixture::new("example.io/app:v1");
        assert_matches!(fixture.run(&HasLicense), Err(CheckError::ImageNotLoaded));
        assert_matches!(fixture.run(&RunAsNonRoot), Err(CheckError::ImageNotLoaded));
        assert_matches!(fixture.run(&LayerCountAcceptable), Err(CheckError::ImageNotLoaded));
    }

    #[test]
    fn test_unique_tag() {
        assert!(Fixture::new("example.io/app:v1").run(&HasUniqueTag).unwrap());
        assert!(!Fixture::new("example.io/app:latest").run(&HasUniqueTag).unwrap());
        assert!(!Fixture::new("example.io/app").run(&HasUniqueTag).unwrap());

        // A unique tag recorded in the archive is enough.
        let mut fixture = Fixture::new("example.io/app:latest").with_image("1001", &[], &[]);
        fixture.image_mut().repo_tags = vec![
            "example.io/app:latest".to_string(),
            "example.io/app:1.2.3".to_string(),
        ];
        assert!(fixture.run(&HasUniqueTag).unwrap());
    }

    #[test]
    fn test_layer_count() {
        let mut fixture = Fixture::new("example.io/app:v1").with_image("1001", &[], &[]);
        fixture.image_mut().layer_count = ACCEPTABLE_LAYER_MAX - 1;
        assert!(fixture.run(&LayerCountAcceptable).unwrap());

        fixture.image_mut().layer_count = ACCEPTABLE_LAYER_MAX;
        assert!(!fixture.run(&LayerCountAcceptable).unwrap());
    }

    #[test]
    fn test_prohibited_paths() {
        let clean = Fixture::new("example.io/app:v1").with_image("1001", &[], &[("etc/motd", "hi")]);
        assert!(clean.run(&HasNoProhibitedPaths).unwrap());

        let dirty = Fixture::new("example.io/app:v1")
            .with_image("1001", &[], &[("etc/pki/entitlement/cert.pem", "secret")]);
        assert!(!dirty.run(&HasNoProhibitedPaths).unwrap());
        assert_eq!(dirty.memory.find("prohibited paths found").len(), 1);

        assert!(!HasNoProhibitedPaths.metadata().is_required());
    }

    #[test]
    fn test_required_labels() {
        let complete = Fixture::new("example.io/app:v1").with_image("1001", &ALL_LABELS, &[]);
        assert!(complete.run(&HasRequiredLabel).unwrap());

        let partial = Fixture::new("example.io/app:v1").with_image("1001", &ALL_LABELS[..4], &[]);
        assert!(!partial.run(&HasRequiredLabel).unwrap());
        let warnings = partial.memory.find("expected labels are missing");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].context.get("labels").map(String::as_str), Some("summary,description"));
    }

    #[test]
    fn test_run_as_non_root() {
        for user in ["", "root", "0", "0:0", "root:wheel"] {
            let fixture = Fixture::new("example.io/app:v1").with_image(user, &[], &[]);
            assert!(!fixture.run(&RunAsNonRoot).unwrap(), "user {:?}", user);
        }
        for user in ["1001", "app", "1001:0"] {
            let fixture = Fixture::new("example.io/app:v1").with_image(user, &[], &[]);
            assert!(fixture.run(&RunAsNonRoot).unwrap(), "user {:?}", user);
        }
    }

    #[test]
    fn test_prohibited_container_name() {
        assert!(Fixture::new("example.io/team/app:v1").run(&HasProhibitedContainerName).unwrap());
        assert!(!Fixture::new("example.io/team/RedHat-app:v1").run(&HasProhibitedContainerName).unwrap());
        // Only the last path segment counts.
        assert!(Fixture::new("example.io/redhat/app:v1").run(&HasProhibitedContainerName).unwrap());
    }
}
