//! The dependency resolution and transaction engine of the cinder
//! source-based package manager.
//!
//! Resolution is encoded as Boolean satisfiability over propositional
//! variables representing package-version atoms; dependencies,
//! conflicts and provides relations translate into clauses, and the
//! decoded model becomes the ordered set of install/remove operations
//! a transaction realizes against the system.

pub mod config;
pub mod database;
pub mod error;
pub mod event;
pub mod installer;
pub mod package;
pub mod solver;

pub use config::Config;
pub use database::{new_database, DatabaseEngine, MemoryDatabase, PackageDatabase, PersistentDatabase};
pub use error::{CinderError, Result};
pub use event::{Event, EventBus, EventListener};
pub use installer::{
    Artifact, ArtifactMatch, Client, Installer, InstallerOptions, Repositories, Repository,
    System, TransactionState,
};
pub use package::{Package, PackageFile, PackageMetadata, Packages};
pub use solver::{
    new_resolver, new_solver, DummyPackageResolver, PackageAssert, PackageResolver,
    PackageSolver, PackagesAssertions, SolverKind, SolverOptions,
};
