use std::path::Path;
use std::sync::Arc;

use crate::database::PackageDatabase;
use crate::error::Result;
use crate::package::{Package, Packages};

/// A built package artifact, as exposed by a repository index.
///
/// Transport, verification and unpacking live with the implementation;
/// the orchestrator only sequences the calls.
pub trait Artifact: Send + Sync {
    /// The package definition this artifact was built from, build
    /// timestamp included.
    fn package(&self) -> &Package;

    /// The file list the artifact unpacks into the target root.
    fn files(&self) -> Result<Vec<String>>;

    /// Check the artifact's integrity signature.
    fn verify(&self) -> Result<()>;

    /// Unpack the artifact into the target root.
    fn unpack(&self, target: &Path) -> Result<()>;
}

/// Fetches artifacts into the local cache.
pub trait Client: Send + Sync {
    fn download(&self, artifact: &dyn Artifact) -> Result<Arc<dyn Artifact>>;
}

/// A synced package repository.
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    /// Lower number wins when several repositories provide a package.
    fn priority(&self) -> i32;

    fn enabled(&self) -> bool;

    fn url(&self) -> &str;

    /// The repository's artifact index.
    fn index(&self) -> Vec<Arc<dyn Artifact>>;

    /// The definition database backing this repository.
    fn database(&self) -> Arc<dyn PackageDatabase>;

    fn client(&self) -> Arc<dyn Client>;
}

/// A package matched to the repository that will provide it.
#[derive(Clone)]
pub struct PackageMatch {
    pub package: Package,
    pub repository: Arc<dyn Repository>,
}

/// A fully planned unit of work: the package, its artifact and the
/// repository it came from.
#[derive(Clone)]
pub struct ArtifactMatch {
    pub package: Package,
    pub artifact: Arc<dyn Artifact>,
    pub repository: Arc<dyn Repository>,
}

/// An ordered collection of repositories.
#[derive(Clone, Default)]
pub struct Repositories {
    repositories: Vec<Arc<dyn Repository>>,
}

impl Repositories {
    pub fn new(repositories: Vec<Arc<dyn Repository>>) -> Self {
        Repositories { repositories }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Repository>> {
        self.repositories.iter()
    }

    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Enabled repositories, highest priority first.
    pub fn sorted(&self) -> Repositories {
        let mut enabled: Vec<Arc<dyn Repository>> = self
            .repositories
            .iter()
            .filter(|r| r.enabled())
            .cloned()
            .collect();
        enabled.sort_by_key(|r| r.priority());
        Repositories::new(enabled)
    }

    /// Merge every repository's definitions into `target`, building
    /// the aggregate world the solver runs against.
    pub fn sync_database(&self, target: &dyn PackageDatabase) -> Result<()> {
        for repo in self.iter() {
            repo.database().clone_to(target)?;
        }
        Ok(())
    }

    /// Match each package against the repositories in priority order;
    /// the first repository whose definitions contain it wins.
    pub fn package_matches(&self, packages: &Packages) -> Vec<PackageMatch> {
        let mut matches = Vec::new();
        for package in packages.iter() {
            for repo in self.iter() {
                if let Ok(found) = repo.database().find_package(package) {
                    matches.push(PackageMatch {
                        package: found,
                        repository: Arc::clone(repo),
                    });
                    break;
                }
            }
        }
        matches
    }

    /// Resolve selector entries to the best concrete version the
    /// repositories provide; concrete entries pass through untouched.
    pub fn resolve_selectors(&self, packages: &Packages) -> Packages {
        let mut resolved = Packages::new();
        for package in packages.iter() {
            if !package.is_selector() {
                resolved.put(package.clone());
                continue;
            }
            let mut found = false;
            for repo in self.iter() {
                if let Ok(matching) = repo.database().find_packages(package) {
                    if let Some(best) = matching.best(None) {
                        resolved.put(best);
                        found = true;
                        break;
                    }
                }
            }
            if !found {
                resolved.put(package.clone());
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use crate::error::CinderError;

    struct PassthroughClient;

    impl Client for PassthroughClient {
        fn download(&self, _artifact: &dyn Artifact) -> Result<Arc<dyn Artifact>> {
            Err(CinderError::NotFound("artifact".to_string()))
        }
    }

    struct FakeRepository {
        name: String,
        priority: i32,
        enabled: bool,
        database: Arc<MemoryDatabase>,
    }

    impl Repository for FakeRepository {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        fn url(&self) -> &str {
            "memory://test"
        }

        fn index(&self) -> Vec<Arc<dyn Artifact>> {
            Vec::new()
        }

        fn database(&self) -> Arc<dyn PackageDatabase> {
            self.database.clone()
        }

        fn client(&self) -> Arc<dyn Client> {
            Arc::new(PassthroughClient)
        }
    }

    fn repo(name: &str, priority: i32, enabled: bool, packages: Vec<Package>) -> Arc<dyn Repository> {
        let database = Arc::new(MemoryDatabase::new());
        for p in &packages {
            database.create_package(p).unwrap();
        }
        Arc::new(FakeRepository {
            name: name.to_string(),
            priority,
            enabled,
            database,
        })
    }

    #[test]
    fn test_sorted_filters_and_orders() {
        let repos = Repositories::new(vec![
            repo("low", 90, true, vec![]),
            repo("disabled", 0, false, vec![]),
            repo("high", 1, true, vec![]),
        ]);

        let names: Vec<String> = repos.sorted().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn test_package_matches_respects_priority() {
        let p = Package::new("app", "a", "1.0");
        let repos = Repositories::new(vec![
            repo("secondary", 10, true, vec![p.clone()]),
            repo("primary", 1, true, vec![p.clone()]),
        ])
        .sorted();

        let matches = repos.package_matches(&Packages::single(p));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].repository.name(), "primary");
    }

    #[test]
    fn test_resolve_selectors() {
        let repos = Repositories::new(vec![repo(
            "main",
            1,
            true,
            vec![
                Package::new("app", "d", "1.4"),
                Package::new("app", "d", "1.9"),
            ],
        )]);

        let resolved =
            repos.resolve_selectors(&Packages::single(Package::new("app", "d", ">=1.0")));
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains(&Package::new("app", "d", "1.9")));

        // Concrete references pass through.
        let resolved =
            repos.resolve_selectors(&Packages::single(Package::new("app", "d", "1.4")));
        assert!(resolved.contains(&Package::new("app", "d", "1.4")));
    }

    #[test]
    fn test_sync_database_merges() {
        let repos = Repositories::new(vec![
            repo("main", 1, true, vec![Package::new("app", "a", "1.0")]),
            repo("extra", 2, true, vec![Package::new("app", "b", "1.0")]),
        ]);

        let target = MemoryDatabase::new();
        repos.sync_database(&target).unwrap();
        assert_eq!(target.world().len(), 2);
    }
}
