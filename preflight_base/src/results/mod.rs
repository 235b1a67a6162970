//! # Results
//!
//! - [`CheckResult`] - outcome of one check invocation
//! - [`ResultSet`] - ordered results for one platform run
//! - [`ResultAggregator`] - builds a `ResultSet` while the engine runs

pub mod aggregator;
pub mod types;

pub use aggregator::{DuplicateResult, ResultAggregator};
pub use types::*;
