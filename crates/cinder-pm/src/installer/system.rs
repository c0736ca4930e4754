use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::database::PackageDatabase;
use crate::error::Result;
use crate::package::{Package, PackageFile, PackageMetadata};

/// The system a transaction operates on: its installed database and
/// the target root filesystem.
pub struct System {
    pub database: Arc<dyn PackageDatabase>,
    pub target: PathBuf,
}

impl System {
    pub fn new(database: Arc<dyn PackageDatabase>, target: impl Into<PathBuf>) -> Self {
        System {
            database,
            target: target.into(),
        }
    }

    /// Run finalizers sequentially in the given (dependency) order,
    /// each package at most once. Failures abort unless `force`.
    pub fn execute_finalizers(
        &self,
        packages: &[Package],
        runner: &dyn FinalizerRunner,
        force: bool,
    ) -> Result<()> {
        let mut executed: HashSet<String> = HashSet::new();
        for package in packages {
            if !executed.insert(package.fingerprint()) {
                continue;
            }
            log::info!("running finalizer for {}", package.human_readable_string());
            if let Err(e) = runner.run(package) {
                if !force {
                    return Err(e);
                }
                log::warn!(
                    "finalizer for {} failed, continuing: {e}",
                    package.human_readable_string()
                );
            }
        }
        Ok(())
    }

    /// Record a package described by an artifact metadata document in
    /// the installed database, files included, without unpacking
    /// anything.
    pub fn inject_metadata(&self, metadata: &PackageMetadata) -> Result<()> {
        self.database.create_package(&metadata.package)?;
        self.database.set_package_files(&PackageFile {
            package_fingerprint: metadata.package.fingerprint(),
            files: metadata.files.clone(),
        })
    }
}

/// Runs a package's post-install action. Script execution is external
/// to the core; the orchestrator only guarantees ordering.
pub trait FinalizerRunner: Send + Sync {
    fn run(&self, package: &Package) -> Result<()>;
}

/// The default runner: packages have no finalizers to run.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFinalizerRunner;

impl FinalizerRunner for NoopFinalizerRunner {
    fn run(&self, _package: &Package) -> Result<()> {
        Ok(())
    }
}

/// Decides whether a file is protected from removal by the
/// configuration-protection policy.
pub trait ConfigProtect: Send + Sync {
    fn protected(&self, path: &str) -> bool;
}

/// The default policy: nothing is protected.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConfigProtect;

impl ConfigProtect for NoConfigProtect {
    fn protected(&self, _path: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        ran: Mutex<Vec<String>>,
    }

    impl FinalizerRunner for Recording {
        fn run(&self, package: &Package) -> Result<()> {
            self.ran
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(package.fingerprint());
            Ok(())
        }
    }

    fn system() -> System {
        System::new(Arc::new(MemoryDatabase::new()), "/tmp/target")
    }

    #[test]
    fn test_finalizers_run_once_in_order() {
        let system = system();
        let runner = Recording::default();
        let a = Package::new("app", "a", "1.0");
        let b = Package::new("app", "b", "1.0");

        system
            .execute_finalizers(&[b.clone(), a.clone(), b.clone()], &runner, false)
            .unwrap();

        let ran = runner.ran.lock().unwrap();
        assert_eq!(*ran, vec!["app/b-1.0", "app/a-1.0"]);
    }

    #[test]
    fn test_finalizer_failure_respects_force() {
        struct Failing;
        impl FinalizerRunner for Failing {
            fn run(&self, package: &Package) -> Result<()> {
                Err(crate::error::CinderError::InstallFailed(
                    package.fingerprint(),
                ))
            }
        }

        let system = system();
        let packages = [Package::new("app", "a", "1.0")];
        assert!(system.execute_finalizers(&packages, &Failing, false).is_err());
        assert!(system.execute_finalizers(&packages, &Failing, true).is_ok());
    }

    #[test]
    fn test_inject_metadata() {
        let system = system();
        let metadata = PackageMetadata {
            package: Package::new("app", "curl", "1.0.1"),
            files: vec!["usr/bin/curl".to_string()],
        };

        system.inject_metadata(&metadata).unwrap();
        assert!(system
            .database
            .find_package(&Package::new("app", "curl", "1.0.1"))
            .is_ok());
        assert_eq!(
            system
                .database
                .get_package_files(&metadata.package)
                .unwrap(),
            vec!["usr/bin/curl"]
        );
    }
}
