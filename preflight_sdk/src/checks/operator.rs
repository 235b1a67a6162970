//! Operator bundle checks
//!
//! A bundle image carries `metadata/annotations.yaml` and a manifests
//! directory holding the ClusterServiceVersion and CRDs.

use super::{ensure_docker_config, knowledge_base};
use preflight_base::check::{
    Check, CheckContext, CheckError, CheckHelp, CheckInitError, CheckMetadata,
};
use preflight_base::image::LoadedImage;
use preflight_base::registry::CommonCheckConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const ANNOTATIONS_FILE: &str = "metadata/annotations.yaml";

pub const PACKAGE_ANNOTATION: &str = "operators.operatorframework.io.bundle.package.v1";
pub const CHANNELS_ANNOTATION: &str = "operators.operatorframework.io.bundle.channels.v1";
pub const MEDIATYPE_ANNOTATION: &str = "operators.operatorframework.io.bundle.mediatype.v1";
pub const MANIFESTS_ANNOTATION: &str = "operators.operatorframework.io.bundle.manifests.v1";

const REGISTRY_V1: &str = "registry+v1";
const DEFAULT_MANIFESTS_DIR: &str = "manifests/";
const CSV_KIND: &str = "ClusterServiceVersion";

#[derive(Debug, Default, Deserialize)]
struct AnnotationsFile {
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

/// Raw text and parsed annotations, or `None` when the file is absent
fn read_annotations(
    image: &LoadedImage,
) -> Result<Option<(String, BTreeMap<String, String>)>, CheckError> {
    let path = image.path(ANNOTATIONS_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckError::io(path, e)),
    };

    let parsed: AnnotationsFile = serde_yaml::from_str(&raw).map_err(|e| {
        CheckError::failed(format!("failed to parse {}: {}", ANNOTATIONS_FILE, e))
    })?;
    Ok(Some((raw, parsed.annotations)))
}

/// Annotations that are missing or hold an unexpected value
fn annotation_problems(annotations: &BTreeMap<String, String>) -> Vec<String> {
    let mut problems = Vec::new();
    for key in [PACKAGE_ANNOTATION, CHANNELS_ANNOTATION, MANIFESTS_ANNOTATION] {
        if annotations.get(key).map_or(true, |v| v.trim().is_empty()) {
            problems.push(format!("missing {}", key));
        }
    }
    match annotations.get(MEDIATYPE_ANNOTATION) {
        Some(v) if v == REGISTRY_V1 => {}
        Some(v) => problems.push(format!("{} is {}, expected {}", MEDIATYPE_ANNOTATION, v, REGISTRY_V1)),
        None => problems.push(format!("missing {}", MEDIATYPE_ANNOTATION)),
    }
    problems
}

/// Bundle metadata is present and well formed
pub struct ValidateOperatorBundle;

impl ValidateOperatorBundle {
    pub const NAME: &'static str = "ValidateOperatorBundle";

    pub fn new(config: &CommonCheckConfig) -> Result<Self, CheckInitError> {
        ensure_docker_config(Self::NAME, config)?;
        Ok(Self)
    }
}

impl Check for ValidateOperatorBundle {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let image = ctx.require_image()?;
        let Some((raw, annotations)) = read_annotations(image)? else {
            ctx.logger().log_warning("bundle has no annotations file");
            return Ok(false);
        };

        ctx.artifacts().write_file("annotations.yaml", raw.as_bytes())?;

        let problems = annotation_problems(&annotations);
        for problem in &problems {
            ctx.logger()
                .log_warning_with_context("bundle validation", vec![("problem", problem.as_str())]);
        }
        Ok(problems.is_empty())
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Validating Bundle image that checks if it can validate the content and format of the operator bundle")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check ValidateOperatorBundle encountered an error. Please review the preflight.log file for more information.",
            "Valid bundles are required for certification. Ensure metadata/annotations.yaml declares the package, channels, manifests directory and registry+v1 media type",
        )
    }
}

/// Manifests directory holds a ClusterServiceVersion
pub struct BundleHasManifests;

impl BundleHasManifests {
    pub const NAME: &'static str = "BundleHasManifests";
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

fn manifest_kind(path: &Path) -> Result<Option<String>, CheckError> {
    let raw = fs::read_to_string(path).map_err(|e| CheckError::io(path, e))?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&raw).map_err(|e| {
        CheckError::failed(format!("failed to parse {}: {}", path.display(), e))
    })?;
    Ok(doc.get("kind").and_then(|k| k.as_str()).map(str::to_string))
}

impl Check for BundleHasManifests {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let image = ctx.require_image()?;
        let dir_name = read_annotations(image)?
            .and_then(|(_, a)| a.get(MANIFESTS_ANNOTATION).cloned())
            .unwrap_or_else(|| DEFAULT_MANIFESTS_DIR.to_string());
        let Some(dir) = image.contained_path(&dir_name) else {
            ctx.logger().log_warning_with_context(
                "manifests directory escapes the bundle",
                vec![("dir", dir_name.as_str())],
            );
            return Ok(false);
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                ctx.logger()
                    .log_warning_with_context("manifests directory not found", vec![("dir", dir_name.as_str())]);
                return Ok(false);
            }
            Err(e) => return Err(CheckError::io(dir, e)),
        };

        let mut manifests = 0;
        let mut has_csv = false;
        for entry in entries {
            ctx.ensure_not_cancelled()?;
            let path = entry.map_err(|e| CheckError::io(&dir, e))?.path();
            if !path.is_file() || !is_yaml(&path) {
                continue;
            }
            manifests += 1;
            if manifest_kind(&path)?.as_deref() == Some(CSV_KIND) {
                has_csv = true;
            }
        }

        let count = manifests.to_string();
        ctx.logger()
            .log_debug_with_context("bundle manifests found", vec![("count", count.as_str())]);
        Ok(has_csv)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Checking that the bundle ships its manifests including a ClusterServiceVersion")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check BundleHasManifests encountered an error. Please review the preflight.log file for more information.",
            "Place the ClusterServiceVersion and CRDs in the manifests directory named by metadata/annotations.yaml",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::testing::Fixture;
    use assert_matches::assert_matches;

    const ANNOTATIONS: &str = "annotations:
  operators.operatorframework.io.bundle.package.v1: example
  operators.operatorframework.io.bundle.channels.v1: stable
  operators.operatorframework.io.bundle.mediatype.v1: registry+v1
  operators.operatorframework.io.bundle.manifests.v1: manifests/
  operators.operatorframework.io.bundle.metadata.v1: metadata/
";

    const CSV: &str = "apiVersion: operators.coreos.com/v1alpha1
kind: ClusterServiceVersion
metadata:
  name: example.v1.0.0
";

    const CRD: &str = "apiVersion: apiextensions.k8s.io/v1
kind: CustomResourceDefinition
";

    fn check() -> ValidateOperatorBundle {
        ValidateOperatorBundle::new(&CommonCheckConfig::new()).unwrap()
    }

    #[test]
    fn test_valid_bundle_writes_artifact() {
        let fixture = Fixture::new("example.io/bundle:v1")
            .with_image("", &[], &[(ANNOTATIONS_FILE, ANNOTATIONS)]);

        assert!(fixture.run(&check()).unwrap());
        assert_eq!(
            fixture.writer.get("annotations.yaml"),
            Some(ANNOTATIONS.as_bytes().to_vec())
        );
    }

    #[test]
    fn test_wrong_media_type_fails() {
        let annotations = ANNOTATIONS.replace("registry+v1", "plain");
        let fixture = Fixture::new("example.io/bundle:v1")
            .with_image("", &[], &[(ANNOTATIONS_FILE, annotations.as_str())]);

        assert!(!fixture.run(&check()).unwrap());
        assert_eq!(fixture.memory.find("bundle validation").len(), 1);
    }

    #[test]
    fn test_missing_or_broken_annotations() {
        let missing = Fixture::new("example.io/bundle:v1").with_image("", &[], &[]);
        assert!(!missing.run(&check()).unwrap());

        let broken = Fixture::new("example.io/bundle:v1")
            .with_image("", &[], &[(ANNOTATIONS_FILE, "annotations: [unclosed")]);
        assert_matches!(broken.run(&check()), Err(CheckError::Failed { .. }));
    }

    #[test]
    fn test_manifests() {
        let with_csv = Fixture::new("example.io/bundle:v1").with_image(
            "",
            &[],
            &[
                (ANNOTATIONS_FILE, ANNOTATIONS),
                ("manifests/example.clusterserviceversion.yaml", CSV),
                ("manifests/example.crd.yaml", CRD),
            ],
        );
        assert!(with_csv.run(&BundleHasManifests).unwrap());

        let crds_only = Fixture::new("example.io/bundle:v1").with_image(
            "",
            &[],
            &[(ANNOTATIONS_FILE, ANNOTATIONS), ("manifests/example.crd.yaml", CRD)],
        );
        assert!(!crds_only.run(&BundleHasManifests).unwrap());

        let no_dir = Fixture::new("example.io/bundle:v1").with_image("", &[], &[(ANNOTATIONS_FILE, ANNOTATIONS)]);
        assert!(!no_dir.run(&BundleHasManifests).unwrap());
    }

    #[test]
    fn test_manifests_directory_must_stay_in_bundle() {
        let annotations = ANNOTATIONS.replace("manifests.v1: manifests/", "manifests.v1: ../../manifests/");
        let fixture = Fixture::new("example.io/bundle:v1").with_image(
            "",
            &[],
            &[
                (ANNOTATIONS_FILE, annotations.as_str()),
                ("manifests/example.clusterserviceversion.yaml", CSV),
            ],
        );

        assert!(!fixture.run(&BundleHasManifests).unwrap());
        assert_eq!(fixture.memory.find("manifests directory escapes the bundle").len(), 1);
    }

    #[test]
    fn test_manifests_directory_defaults_without_annotations() {
        let fixture = Fixture::new("example.io/bundle:v1")
            .with_image("", &[], &[("manifests/csv.yml", CSV)]);
        assert!(fixture.run(&BundleHasManifests).unwrap());
    }
}
