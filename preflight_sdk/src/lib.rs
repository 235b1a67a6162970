//! # Preflight SDK
//!
//! Container certification checks and the default policy tables.
//! Provides image loading, license, tag, layer, label, user and naming checks
//! for container images plus metadata and manifest checks for operator bundles.

pub mod checks;

use preflight_base::check::Check;
use preflight_base::policy::Policy;
use preflight_base::registry::{PolicyRegistry, RegistryBuilder, RegistryError};

use checks::{
    BundleHasManifests, HasLicense, HasNoProhibitedPaths, HasProhibitedContainerName,
    HasRequiredLabel, HasUniqueTag, ImageArchiveLoaded, LayerCountAcceptable, RunAsNonRoot,
    ValidateOperatorBundle,
};

/// Every policy certifying a container image
const CONTAINER_FAMILY: [Policy; 5] = [
    Policy::Container,
    Policy::Root,
    Policy::ScratchNonRoot,
    Policy::ScratchRoot,
    Policy::Konflux,
];

fn boxed<C: Check + 'static>(check: C) -> Box<dyn Check> {
    Box::new(check)
}

/// Create a registry with every policy wired to its ordered checks
///
/// Policy tables:
/// - container: the full image check set
/// - root: container without RunAsNonRoot
/// - scratch-nonroot: container without HasNoProhibitedPaths
/// - scratch-root: scratch-nonroot without RunAsNonRoot
/// - konflux: container without HasUniqueTag
/// - mcp: image, license, tag, layer, label and user checks
/// - operator: image loading plus bundle validation
///
/// Registration order is execution order, so `ImageArchiveLoaded` comes first.
pub fn create_policy_registry() -> Result<PolicyRegistry, RegistryError> {
    use Policy::*;

    RegistryBuilder::new()
        .with_check(&Policy::ALL, ImageArchiveLoaded::NAME, |config| {
            Ok(boxed(ImageArchiveLoaded::new(config)?))
        })
        .with_check(
            &[Container, Root, ScratchNonRoot, ScratchRoot, Konflux, Mcp],
            HasLicense::NAME,
            |_| Ok(boxed(HasLicense)),
        )
        .with_check(
            &[Container, Root, ScratchNonRoot, ScratchRoot, Mcp],
            HasUniqueTag::NAME,
            |_| Ok(boxed(HasUniqueTag)),
        )
        .with_check(
            &[Container, Root, ScratchNonRoot, ScratchRoot, Konflux, Mcp],
            LayerCountAcceptable::NAME,
            |_| Ok(boxed(LayerCountAcceptable)),
        )
        .with_check(&[Container, Root, Konflux], HasNoProhibitedPaths::NAME, |_| {
            Ok(boxed(HasNoProhibitedPaths))
        })
        .with_check(
            &[Container, Root, ScratchNonRoot, ScratchRoot, Konflux, Mcp],
            HasRequiredLabel::NAME,
            |_| Ok(boxed(HasRequiredLabel)),
        )
        .with_check(&[Container, ScratchNonRoot, Konflux, Mcp], RunAsNonRoot::NAME, |_| {
            Ok(boxed(RunAsNonRoot))
        })
        .with_check(&CONTAINER_FAMILY, HasProhibitedContainerName::NAME, |_| {
            Ok(boxed(HasProhibitedContainerName))
        })
        .with_check(&[Operator], ValidateOperatorBundle::NAME, |config| {
            Ok(boxed(ValidateOperatorBundle::new(config)?))
        })
        .with_check(&[Operator], BundleHasManifests::NAME, |_| {
            Ok(boxed(BundleHasManifests))
        })
        .build()
}
