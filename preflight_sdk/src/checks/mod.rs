//! Certification checks
//!
//! Every check reads the image loaded by `ImageArchiveLoaded`, so that check
//! must run first in each policy.

pub mod container;
pub mod image;
pub mod operator;

pub use container::{
    HasLicense, HasNoProhibitedPaths, HasProhibitedContainerName, HasRequiredLabel,
    HasUniqueTag, LayerCountAcceptable, RunAsNonRoot,
};
pub use image::ImageArchiveLoaded;
pub use operator::{BundleHasManifests, ValidateOperatorBundle};

use preflight_base::check::CheckInitError;
use preflight_base::registry::CommonCheckConfig;

const KNOWLEDGE_BASE_URL: &str = "https://preflight-rs.github.io/preflight/checks";

/// Knowledge base page for a check
pub(crate) fn knowledge_base(check: &str) -> String {
    format!("{}#{}", KNOWLEDGE_BASE_URL, check.to_ascii_lowercase())
}

/// A configured credentials file must exist when the check is built
pub(crate) fn ensure_docker_config(
    check: &str,
    config: &CommonCheckConfig,
) -> Result<(), CheckInitError> {
    match &config.docker_config {
        Some(path) if !path.exists() => Err(CheckInitError::new(
            check,
            format!("docker config {} does not exist", path.display()),
        )),
        _ => Ok(()),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_missing_docker_config_fails_construction() {
        let config = CommonCheckConfig::new().with_docker_config("/nonexistent/config.json");
        assert_matches!(
            ensure_docker_config("ImageArchiveLoaded", &config),
            Err(CheckInitError { ref check, .. }) if check == "ImageArchiveLoaded"
        );
        assert!(ensure_docker_config("ImageArchiveLoaded", &CommonCheckConfig::new()).is_ok());
    }
}
