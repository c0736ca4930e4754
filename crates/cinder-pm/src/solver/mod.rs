// SAT resolver core
//
// Resolution is encoded as Boolean satisfiability over package-version
// atoms. The encoder assigns stable atom names through a
// per-transaction encoding database, the backend produces a model, and
// the model decodes into ordered package assertions.

mod assertion;
mod formula;
mod parallel;
mod resolver;
mod sat;
#[allow(clippy::module_inception)]
mod solver;


pub use assertion::{PackageAssert, PackagesAssertions};
pub use formula::{Clause, Encoder, Formula, Literal};
pub use resolver::{DummyPackageResolver, PackageResolver, ResolverOptions};
pub use sat::Model;
pub use solver::Solver;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::database::PackageDatabase;
use crate::error::Result;
use crate::package::{Package, Packages};

/// Which resolver variant to construct, keyed by the `solver.type`
/// setting. Both variants have identical semantics; the parallel one
/// fans formula construction out over a worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    #[default]
    SingleCore,
    Parallel,
}

impl SolverKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "" | "single-core" => Some(SolverKind::SingleCore),
            "parallel" => Some(SolverKind::Parallel),
            _ => None,
        }
    }
}

/// Construction options for the tagged solver factory.
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    pub kind: SolverKind,
    pub concurrency: usize,
}

impl SolverOptions {
    pub fn concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

/// Cooperative cancellation shared between the caller and the solver
/// and orchestrator worker pools. Workers check it at their
/// receive boundaries; the solver checks it between solve and decode.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The capability set shared by the solver variants.
pub trait PackageSolver: Send {
    fn set_definition_database(&mut self, db: Arc<dyn PackageDatabase>);
    fn set_resolver(&mut self, resolver: Arc<dyn PackageResolver>);

    /// Every package in the definition database.
    fn world(&self) -> Packages;

    /// Every package in the installed database.
    fn installed(&self) -> Packages;

    /// Compute the assertions that realize installing `wanted` on top
    /// of the current installed state.
    fn install(&mut self, wanted: &Packages) -> Result<PackagesAssertions>;

    /// Compute the packages to remove in order to purge `candidate`.
    fn uninstall(
        &mut self,
        candidate: &Package,
        check_conflicts: bool,
        full: bool,
    ) -> Result<Packages>;

    /// Full removal: every installed package the constraints force out
    /// alongside `to_remove`.
    fn uninstall_universe(&mut self, to_remove: &Packages) -> Result<Packages>;

    /// Compute the (uninstall set, install assertions) pair realizing
    /// an upgrade of the installed state against the definitions.
    fn upgrade(
        &mut self,
        check_conflicts: bool,
        full: bool,
    ) -> Result<(Packages, PackagesAssertions)>;

    /// Whole-universe upgrade: the merged definition and installed
    /// worlds are authoritative.
    fn upgrade_universe(&mut self, drop_removed: bool)
        -> Result<(Packages, PackagesAssertions)>;

    /// Reverse-dependency gate: `Ok(false)` when nothing in `set`
    /// depends on `pack`, `ConflictBlocked` naming the blockers
    /// otherwise.
    fn conflicts(&self, pack: &Package, set: &Packages) -> Result<bool>;

    /// SAT query: is `pack` required for `set` to stay satisfiable?
    fn conflicts_with(&self, pack: &Package, set: &Packages) -> Result<bool>;

    fn conflicts_with_installed(&self, pack: &Package) -> Result<bool>;

    /// Build the formula for the current request state and decode the
    /// resulting model.
    fn solve(&mut self) -> Result<PackagesAssertions>;
}

/// Construct a solver with the default no-op UNSAT fallback.
pub fn new_solver(
    options: &SolverOptions,
    installed: Arc<dyn PackageDatabase>,
    definitions: Arc<dyn PackageDatabase>,
    solver_db: Arc<dyn PackageDatabase>,
) -> Box<dyn PackageSolver> {
    new_resolver(
        options,
        installed,
        definitions,
        solver_db,
        Arc::new(DummyPackageResolver),
    )
}

/// Construct a solver with an explicit UNSAT fallback.
pub fn new_resolver(
    options: &SolverOptions,
    installed: Arc<dyn PackageDatabase>,
    definitions: Arc<dyn PackageDatabase>,
    solver_db: Arc<dyn PackageDatabase>,
    resolver: Arc<dyn PackageResolver>,
) -> Box<dyn PackageSolver> {
    Box::new(Solver::with_resolver(
        options.kind,
        options.concurrency(),
        installed,
        definitions,
        solver_db,
        resolver,
    ))
}
