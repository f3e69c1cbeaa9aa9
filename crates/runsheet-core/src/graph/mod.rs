//! Graph-level checks over a scope's predecessor links.
//!
//! ## Submodules
//!
//! - [`validate`]: cycle, depth, and dangling-link detection.

pub mod validate;

pub use validate::{
    CycleReport, DEFAULT_MAX_CHAIN_DEPTH, DependencyGraphValidator, GraphViolation,
    ValidationResult,
};
