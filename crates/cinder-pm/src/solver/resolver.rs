use crate::error::{CinderError, Result};

use super::assertion::PackagesAssertions;
use super::formula::Formula;
use super::PackageSolver;

/// Fallback invoked when the base SAT call returns no model.
///
/// Implementations may relax the formula (a learning explorer, for
/// instance) and return an alternative assertion set. The hook is the
/// extension point; concrete heuristics live outside the core.
pub trait PackageResolver: Send + Sync {
    fn solve(&self, formula: &Formula, solver: &dyn PackageSolver) -> Result<PackagesAssertions>;
}

/// The default no-op fallback: an unsolvable formula stays unsolvable.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyPackageResolver;

impl PackageResolver for DummyPackageResolver {
    fn solve(&self, _formula: &Formula, _solver: &dyn PackageSolver) -> Result<PackagesAssertions> {
        Err(CinderError::Unsolvable)
    }
}

/// Tuning knobs carried in configuration for pluggable resolver
/// implementations. The dummy resolver ignores them.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverOptions {
    pub rate: f32,
    pub discount: f32,
    pub max_attempts: usize,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        ResolverOptions {
            rate: 0.7,
            discount: 1.0,
            max_attempts: 9000,
        }
    }
}
