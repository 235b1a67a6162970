//! Certification policies
//!
//! A policy names a compliance profile. The registry maps each one to an
//! ordered list of checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named compliance profile selecting a check set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    Operator,
    Container,
    Mcp,
    #[serde(rename = "scratch-nonroot")]
    ScratchNonRoot,
    ScratchRoot,
    Root,
    Konflux,
}

impl Policy {
    /// Every policy, in declaration order
    pub const ALL: [Policy; 7] = [
        Policy::Operator,
        Policy::Container,
        Policy::Mcp,
        Policy::ScratchNonRoot,
        Policy::ScratchRoot,
        Policy::Root,
        Policy::Konflux,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Policy::Operator => "operator",
            Policy::Container => "container",
            Policy::Mcp => "mcp",
            Policy::ScratchNonRoot => "scratch-nonroot",
            Policy::ScratchRoot => "scratch-root",
            Policy::Root => "root",
            Policy::Konflux => "konflux",
        }
    }

    /// Policies that certify a plain container image
    pub fn is_container_policy(&self) -> bool {
        matches!(
            self,
            Policy::Container
                | Policy::ScratchNonRoot
                | Policy::ScratchRoot
                | Policy::Root
                | Policy::Konflux
        )
    }

    /// Scratch images have no base OS layer
    pub fn is_scratch(&self) -> bool {
        matches!(self, Policy::ScratchNonRoot | Policy::ScratchRoot)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string names no known policy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl FromStr for Policy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Policy::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s.trim())
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}
