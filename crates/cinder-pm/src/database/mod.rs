// Package database abstraction
//
// Two interchangeable implementations share one query contract: an
// in-memory store and a persistent embedded key-value store. Both keep
// a fingerprint-keyed package store, a file-manifest store, a
// no-version index (package name -> versions) and a provides index.

mod memory;
mod persistent;

pub use memory::MemoryDatabase;
pub use persistent::PersistentDatabase;

use std::path::Path;
use std::sync::Arc;

use crate::error::{CinderError, Result};
use crate::package::{Package, PackageFile, Packages};

/// The query contract shared by the solver and the orchestrator.
///
/// All mutating operations serialize on a single per-database mutex;
/// concurrent access across distinct database instances needs no
/// external synchronization. Every `find_*` operation resolves
/// `provides` first: a reference to a provided package returns the
/// provider.
pub trait PackageDatabase: Send + Sync {
    /// Store a package and index its provides and versions. Returns
    /// the assigned ID (the fingerprint).
    fn create_package(&self, p: &Package) -> Result<String>;

    /// Fetch a package by its ID.
    fn get_package(&self, id: &str) -> Result<Package>;

    /// All stored IDs.
    fn get_packages(&self) -> Vec<String>;

    /// Resolve a (category, name, version) reference: a provides hit
    /// wins, otherwise the exact entry.
    fn find_package(&self, p: &Package) -> Result<Package>;

    /// All entries sharing (category, name), provides-resolved.
    fn find_package_versions(&self, p: &Package) -> Result<Packages>;

    /// The subset of versions satisfying `p`'s version selector,
    /// provides-resolved.
    fn find_packages(&self, p: &Package) -> Result<Packages>;

    /// `find_package`, relaxed: fall back to the best stored version,
    /// then to the input itself.
    fn find_package_candidate(&self, p: &Package) -> Result<Package> {
        match self.find_package(p) {
            Ok(found) => Ok(found),
            Err(_) => {
                let versions = self
                    .find_package_versions(p)
                    .unwrap_or_default();
                Ok(versions.best(None).unwrap_or_else(|| p.clone()))
            }
        }
    }

    /// Remove and re-create, atomically under the database mutex.
    fn update_package(&self, p: &Package) -> Result<()>;

    /// Remove the matching entry; `NotFound` if absent.
    fn remove_package(&self, p: &Package) -> Result<()>;

    fn get_package_files(&self, p: &Package) -> Result<Vec<String>>;
    fn set_package_files(&self, f: &PackageFile) -> Result<()>;
    fn remove_package_files(&self, p: &Package) -> Result<()>;

    /// Snapshot of every stored package, in key-enumeration order.
    fn world(&self) -> Packages;

    /// Copy every package by value into `target`.
    fn clone_to(&self, target: &dyn PackageDatabase) -> Result<()> {
        for p in self.world().iter() {
            target.create_package(p)?;
        }
        Ok(())
    }

    /// Full scan for packages carrying a label key.
    fn find_package_label(&self, label: &str) -> Result<Packages> {
        Ok(self.world().search(|p| p.has_label(label)))
    }

    /// Full scan for packages with a label matching the pattern.
    fn find_package_label_match(&self, pattern: &str) -> Result<Packages> {
        let re = compile_pattern(pattern)?;
        Ok(self.world().search(|p| p.match_label(&re)))
    }

    /// Full scan matching the pattern against the human-readable form.
    fn find_package_match(&self, pattern: &str) -> Result<Packages> {
        let re = compile_pattern(pattern)?;
        Ok(self.world().search(|p| re.is_match(&p.human_readable_string())))
    }

    /// Drop all state.
    fn clean(&self) -> Result<()>;
}

fn compile_pattern(pattern: &str) -> Result<regex::Regex> {
    regex::Regex::new(pattern)
        .map_err(|e| CinderError::InvalidInput(format!("invalid regex {pattern:?}: {e}")))
}

/// Which database implementation to construct, keyed by the
/// `system.database_engine` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatabaseEngine {
    #[default]
    Memory,
    Persistent,
}

impl DatabaseEngine {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "memory" => Some(DatabaseEngine::Memory),
            "boltdb" | "persistent" | "embedded-kv" => Some(DatabaseEngine::Persistent),
            _ => None,
        }
    }
}

/// Tagged factory for database construction.
pub fn new_database(engine: DatabaseEngine, path: Option<&Path>) -> Result<Arc<dyn PackageDatabase>> {
    match engine {
        DatabaseEngine::Memory => Ok(Arc::new(MemoryDatabase::new())),
        DatabaseEngine::Persistent => {
            let path = path.ok_or_else(|| {
                CinderError::InvalidInput("persistent database requires a path".to_string())
            })?;
            Ok(Arc::new(PersistentDatabase::open(path)?))
        }
    }
}
