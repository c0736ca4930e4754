use std::collections::VecDeque;
use std::path::Path;
use std::sync::{mpsc, Arc, Mutex};

use crate::database::{MemoryDatabase, PackageDatabase};
use crate::error::{CinderError, Result};
use crate::event::{Event, EventBus};
use crate::package::{Package, PackageFile, Packages};
use crate::solver::{new_solver, CancellationToken, PackagesAssertions, SolverOptions};

use super::repository::{ArtifactMatch, Repositories};
use super::system::{ConfigProtect, FinalizerRunner, NoConfigProtect, NoopFinalizerRunner, System};
use super::TransactionState;

#[derive(Debug, Clone)]
pub struct InstallerOptions {
    /// Download and install worker-pool width; 0 means the host
    /// logical CPU count.
    pub concurrency: usize,
    pub no_deps: bool,
    pub only_deps: bool,
    pub force: bool,
    pub preserve_system_essential: bool,
    pub full_uninstall: bool,
    pub full_clean_uninstall: bool,
    pub check_conflicts: bool,
    pub solver_upgrade: bool,
    pub remove_unavailable_on_upgrade: bool,
    /// Consider artifacts with a new build timestamp at the same
    /// version when upgrading.
    pub upgrade_new_revisions: bool,
    pub solver: SolverOptions,
    /// Path prefixes (relative to the target root) never removed while
    /// `preserve_system_essential` is set: the system's own cache and
    /// database directories.
    pub protected_prefixes: Vec<String>,
}

impl Default for InstallerOptions {
    fn default() -> Self {
        InstallerOptions {
            concurrency: 0,
            no_deps: false,
            only_deps: false,
            force: false,
            preserve_system_essential: true,
            full_uninstall: false,
            full_clean_uninstall: false,
            check_conflicts: true,
            solver_upgrade: false,
            remove_unavailable_on_upgrade: false,
            upgrade_new_revisions: false,
            solver: SolverOptions::default(),
            protected_prefixes: Vec::new(),
        }
    }
}

/// The transaction orchestrator.
///
/// Drives the state machine from resolver output to a mutated system:
/// planning, parallel downloads, parallel installs, database commits
/// and ordered finalizers. All target-filesystem side effects go
/// through the artifact collaborators except file removal, which the
/// orchestrator owns.
pub struct Installer {
    repositories: Repositories,
    options: InstallerOptions,
    bus: Arc<EventBus>,
    finalizer: Arc<dyn FinalizerRunner>,
    config_protect: Arc<dyn ConfigProtect>,
    state: Mutex<TransactionState>,
    cancel: CancellationToken,
}

impl Installer {
    pub fn new(repositories: Repositories, options: InstallerOptions) -> Self {
        Installer {
            repositories,
            options,
            bus: Arc::new(EventBus::new()),
            finalizer: Arc::new(NoopFinalizerRunner),
            config_protect: Arc::new(NoConfigProtect),
            state: Mutex::new(TransactionState::Building),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_finalizer_runner(mut self, runner: Arc<dyn FinalizerRunner>) -> Self {
        self.finalizer = runner;
        self
    }

    pub fn with_config_protect(mut self, protect: Arc<dyn ConfigProtect>) -> Self {
        self.config_protect = protect;
        self
    }

    /// The bus transaction lifecycle events are published on.
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> TransactionState {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_state(&self, state: TransactionState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        self.bus.publish(&Event::TransactionStateChanged { state });
    }

    fn width(&self) -> usize {
        if self.options.concurrency > 0 {
            self.options.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Drive a transaction entry point, pinning the terminal state.
    fn run<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        match f() {
            Ok(()) => {
                self.set_state(TransactionState::Done);
                Ok(())
            }
            Err(e) => {
                self.set_state(TransactionState::Aborted(e.kind().to_string()));
                Err(e)
            }
        }
    }

    /// Install the given packages and their dependencies into the
    /// system.
    pub fn install(&self, packages: &Packages, system: &System) -> Result<()> {
        let repos = self.repositories.sorted();
        self.run(|| self.install_inner(&repos, packages, system))
    }

    /// Remove a package (and whatever the solver marks with it) from
    /// the system.
    pub fn uninstall(&self, package: &Package, system: &System) -> Result<()> {
        self.run(|| self.uninstall_inner(package, system, false))
    }

    /// Upgrade the installed state against the repositories.
    pub fn upgrade(&self, system: &System) -> Result<()> {
        self.run(|| self.upgrade_inner(system))
    }

    /// Remove `to_remove`, then install `to_install`, downloading
    /// everything up front.
    pub fn swap(&self, to_remove: &Packages, to_install: &Packages, system: &System) -> Result<()> {
        let repos = self.repositories.sorted();
        self.run(|| self.swap_inner(&repos, to_remove, to_install, system))
    }

    /// Rebuild installed-database state for artifacts whose files are
    /// already present in the target, after adopting a system that
    /// never had one.
    pub fn reclaim(&self, system: &System) -> Result<()> {
        let repos = self.repositories.sorted();

        let mut to_merge = Vec::new();
        for repo in repos.iter() {
            for artifact in repo.index() {
                log::debug!(
                    "checking if {} from {} is installed",
                    artifact.package().human_readable_string(),
                    repo.name()
                );
                for f in artifact.files()? {
                    if system.target.join(&f).exists() {
                        to_merge.push((Arc::clone(repo), artifact.clone()));
                        break;
                    }
                }
            }
        }

        for (repo, artifact) in to_merge {
            let package = repo.database().find_package(artifact.package())?;
            let reclaimed = system
                .database
                .find_package_versions(&package)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if reclaimed {
                log::warn!(
                    "filtering out {}, already reclaimed",
                    package.human_readable_string()
                );
                continue;
            }
            if let Err(e) = system.database.create_package(&package) {
                if e.is_fatal() || !self.options.force {
                    return Err(e);
                }
                log::warn!("failed recording {}: {e}", package.human_readable_string());
            }
            system.database.set_package_files(&PackageFile {
                package_fingerprint: package.fingerprint(),
                files: artifact.files()?,
            })?;
            log::info!("reclaimed {}", package.human_readable_string());
        }
        Ok(())
    }

    fn install_inner(
        &self,
        repos: &Repositories,
        packages: &Packages,
        system: &System,
    ) -> Result<()> {
        self.set_state(TransactionState::Building);

        // Filter out packages with any version already installed.
        let mut to_process = Packages::new();
        for p in packages.iter() {
            let has_versions = system
                .database
                .find_package_versions(p)
                .map(|v| !v.is_empty())
                .unwrap_or(false);
            if has_versions {
                log::warn!(
                    "filtering out {}, other versions are already installed",
                    p.human_readable_string()
                );
                continue;
            }
            to_process.put(p.clone());
        }
        if to_process.is_empty() {
            log::warn!("no package to install");
            return Ok(());
        }

        // The aggregate definition world across all repositories.
        let all_repos: Arc<dyn PackageDatabase> = Arc::new(MemoryDatabase::new());
        repos.sync_database(all_repos.as_ref())?;
        let to_process = repos.resolve_selectors(&to_process);

        let mut packages_to_install = Packages::new();
        let mut solution = PackagesAssertions::new();

        if !self.options.no_deps {
            self.set_state(TransactionState::Solving);
            let mut solver = new_solver(
                &self.options.solver,
                Arc::clone(&system.database),
                Arc::clone(&all_repos),
                Arc::new(MemoryDatabase::new()),
            );
            match solver.install(&to_process) {
                Ok(s) => solution = s,
                Err(e) if self.options.force && !e.is_fatal() => {
                    log::warn!("resolution failed, continuing under force: {e}");
                }
                Err(e) => return Err(e),
            }
            self.set_state(TransactionState::Decoding);
            for assertion in solution.iter().filter(|a| a.value) {
                if system.database.find_package(&assertion.package).is_ok() {
                    continue;
                }
                packages_to_install.put(assertion.package.clone());
            }
        } else if !self.options.only_deps {
            for p in to_process.iter() {
                if system.database.find_package(p).is_err() {
                    packages_to_install.put(p.clone());
                }
            }
        }

        self.set_state(TransactionState::Planning);
        let to_install = self.match_artifacts(repos, &packages_to_install, system)?;

        self.set_state(TransactionState::Downloading);
        self.download_all(&to_install)?;

        // Installs begin only after every download completed.
        self.set_state(TransactionState::Applying);
        let outcomes = self.run_pool(&to_install, |m| {
            let artifact = m.repository.client().download(m.artifact.as_ref())?;
            let files = artifact.files()?;
            artifact.unpack(&system.target)?;
            system.database.set_package_files(&PackageFile {
                package_fingerprint: m.package.fingerprint(),
                files,
            })?;
            log::info!("{} installed", m.package.human_readable_string());
            Ok(())
        });
        self.collect_outcomes(outcomes, "install")?;

        self.set_state(TransactionState::Committing);
        for m in &to_install {
            if let Err(e) = system.database.create_package(&m.package) {
                if e.is_fatal() || !self.options.force {
                    return Err(e);
                }
                log::warn!("failed recording {}: {e}", m.package.human_readable_string());
            }
            self.bus.publish(&Event::InstallCompleted {
                package: m.package.clone(),
            });
        }

        // Finalizers run sequentially, dependencies first.
        let mut to_finalize: Vec<Package> = Vec::new();
        if !self.options.no_deps {
            for wanted in to_process.iter() {
                let ordered = solution.order(all_repos.as_ref(), &wanted.fingerprint())?;
                for assertion in ordered.iter().filter(|a| a.value) {
                    let Some(m) = to_install
                        .iter()
                        .find(|m| m.package.fingerprint() == assertion.package.fingerprint())
                    else {
                        // A dependency that was already installed.
                        continue;
                    };
                    to_finalize.push(m.repository.database().find_package(&assertion.package)?);
                }
            }
        } else {
            for m in &to_install {
                to_finalize.push(m.repository.database().find_package(&m.package)?);
            }
        }
        system.execute_finalizers(&to_finalize, self.finalizer.as_ref(), self.options.force)
    }

    fn upgrade_inner(&self, system: &System) -> Result<()> {
        let repos = self.repositories.sorted();
        let all_repos: Arc<dyn PackageDatabase> = Arc::new(MemoryDatabase::new());
        repos.sync_database(all_repos.as_ref())?;

        self.set_state(TransactionState::Solving);
        log::info!("computing upgrade");
        if self.options.upgrade_new_revisions {
            log::info!("will consider new build revisions while upgrading");
        }

        let mut solver = new_solver(
            &self.options.solver,
            Arc::clone(&system.database),
            Arc::clone(&all_repos),
            Arc::new(MemoryDatabase::new()),
        );
        let (mut uninstall, solution) = if self.options.solver_upgrade {
            solver.upgrade_universe(self.options.remove_unavailable_on_upgrade)?
        } else {
            solver.upgrade(!self.options.full_uninstall, self.options.no_deps)?
        };

        for p in uninstall.iter() {
            log::info!("{} marked for uninstall", p.human_readable_string());
        }

        let mut to_install = Packages::new();
        for assertion in solution.iter().filter(|a| a.value) {
            if system.database.find_package(&assertion.package).is_err() {
                log::info!("{} marked for upgrade", assertion.package.human_readable_string());
                to_install.put(assertion.package.clone());
            }
        }

        if self.options.upgrade_new_revisions {
            log::info!("checking for packages with new build revisions");
            for p in system.database.world().iter() {
                let matches = repos.package_matches(&Packages::single(p.clone()));
                let Some(best) = matches.first() else {
                    log::warn!(
                        "{} is missing from the repositories, consider a universe upgrade",
                        p.human_readable_string()
                    );
                    continue;
                };
                for artifact in best.repository.index() {
                    if artifact.package().matches(p)
                        && artifact.package().build_timestamp != p.build_timestamp
                    {
                        log::info!(
                            "{} has a new build revision ({:?} vs {:?}) in {}",
                            p.human_readable_string(),
                            artifact.package().build_timestamp,
                            p.build_timestamp,
                            best.repository.name()
                        );
                        to_install.put(best.package.clone());
                        uninstall.put(p.clone());
                    }
                }
            }
        }

        self.swap_inner(&repos, &uninstall.unique(), &to_install.unique(), system)
    }

    fn swap_inner(
        &self,
        repos: &Repositories,
        to_remove: &Packages,
        to_install: &Packages,
        system: &System,
    ) -> Result<()> {
        // Download everything first so a failed transfer cannot leave
        // the system stripped but not re-populated.
        self.set_state(TransactionState::Downloading);
        let matches = self.match_artifacts(repos, to_install, system)?;
        self.download_all(&matches)?;

        // Removals here never gate on conflicts: the conflicting state
        // is exactly what the swap is about to resolve.
        for u in to_remove.iter() {
            log::info!("{} marked for deletion", u.human_readable_string());
            if let Err(e) = self.uninstall_inner(u, system, true) {
                if e.is_fatal() || !self.options.force {
                    log::error!("failed uninstall of {}", u.human_readable_string());
                    return Err(e);
                }
                log::warn!("uninstall of {} failed, continuing: {e}", u.human_readable_string());
            }
        }

        self.install_inner(repos, to_install, system)
    }

    fn uninstall_inner(&self, package: &Package, system: &System, forced: bool) -> Result<()> {
        let forced = forced || self.options.force;
        // Forced removal takes the package and its requires without
        // asking questions.
        let check_conflicts = self.options.check_conflicts && !forced;
        let full = self.options.full_uninstall && !forced;

        log::info!("uninstalling {}", package.human_readable_string());
        self.set_state(TransactionState::Solving);

        // A temporary installed copy keeps the solver off the live
        // database while it walks the dependency tree.
        let installed_tmp: Arc<dyn PackageDatabase> = Arc::new(MemoryDatabase::new());
        system.database.clone_to(installed_tmp.as_ref())?;

        let solution = if !self.options.no_deps {
            let mut solver = new_solver(
                &self.options.solver,
                Arc::clone(&installed_tmp),
                Arc::clone(&installed_tmp),
                Arc::new(MemoryDatabase::new()),
            );
            if self.options.full_clean_uninstall {
                solver.uninstall_universe(&Packages::single(package.clone()))?
            } else {
                match solver.uninstall(package, check_conflicts, full) {
                    Ok(solution) => solution,
                    Err(e) if forced && !e.is_fatal() => {
                        log::warn!("uninstall resolution failed, removing only the candidate: {e}");
                        Packages::single(package.clone())
                    }
                    Err(e) => return Err(e),
                }
            }
        } else {
            Packages::single(package.clone())
        };

        self.set_state(TransactionState::Applying);
        for p in solution.iter() {
            if let Err(e) = self.remove_package(p, system) {
                if e.is_fatal() || !forced {
                    return Err(e);
                }
                log::warn!("removal of {} failed, continuing: {e}", p.human_readable_string());
            }
        }
        Ok(())
    }

    /// Remove one package's files from the target and drop it from the
    /// installed database.
    fn remove_package(&self, package: &Package, system: &System) -> Result<()> {
        let files = system.database.get_package_files(package)?;
        let (present, not_present) = order_files(&system.target, &files);

        for f in present.iter().chain(not_present.iter()) {
            if self.config_protect.protected(f) {
                log::debug!("preserving protected file {f}");
                continue;
            }
            if self.options.preserve_system_essential
                && self
                    .options
                    .protected_prefixes
                    .iter()
                    .any(|prefix| f.starts_with(prefix.as_str()))
            {
                log::warn!("preserving {f}, it is required by the package manager itself");
                continue;
            }

            let target = system.target.join(f);
            let Ok(metadata) = std::fs::symlink_metadata(&target) else {
                log::debug!("{} not present in the target", target.display());
                continue;
            };
            if metadata.is_dir() {
                let occupied = std::fs::read_dir(&target)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(true);
                if occupied {
                    log::debug!("preserving non-empty directory {}", target.display());
                    continue;
                }
                if let Err(e) = std::fs::remove_dir(&target) {
                    log::warn!("failed removing directory {}: {e}", target.display());
                }
            } else if let Err(e) = std::fs::remove_file(&target) {
                log::warn!("failed removing file {}: {e}", target.display());
            }
        }

        system.database.remove_package_files(package)?;
        system.database.remove_package(package)?;
        self.bus.publish(&Event::UninstallCompleted {
            package: package.clone(),
        });
        log::info!("{} removed", package.fingerprint());
        Ok(())
    }

    /// Match each package to an artifact from the highest-priority
    /// repository carrying it, adopting the artifact's build revision.
    fn match_artifacts(
        &self,
        repos: &Repositories,
        packages: &Packages,
        system: &System,
    ) -> Result<Vec<ArtifactMatch>> {
        let mut matches = Vec::new();
        for p in packages.iter() {
            let repo_matches = repos.package_matches(&Packages::single(p.clone()));
            let Some(best) = repo_matches.first() else {
                return Err(CinderError::Repository(format!(
                    "no repository provides {}",
                    p.human_readable_string()
                )));
            };
            for artifact in best.repository.index() {
                if best.package.matches(artifact.package()) {
                    let mut current = p.clone();
                    current.build_timestamp = artifact.package().build_timestamp.clone();
                    if system.database.find_package(&current).is_err() {
                        log::info!(
                            "planned {} from {}",
                            current.human_readable_string(),
                            best.repository.name()
                        );
                        matches.push(ArtifactMatch {
                            package: current,
                            artifact: Arc::clone(&artifact),
                            repository: Arc::clone(&best.repository),
                        });
                    }
                    break;
                }
            }
        }
        Ok(matches)
    }

    fn download_all(&self, matches: &[ArtifactMatch]) -> Result<()> {
        let outcomes = self.run_pool(matches, |m| {
            let artifact = m.repository.client().download(m.artifact.as_ref())?;
            artifact.verify()?;
            log::info!("{} downloaded", m.package.human_readable_string());
            Ok(())
        });
        self.collect_outcomes(outcomes, "download")
    }

    /// Fan `f` out over the matches across the worker pool. Workers
    /// drain a shared queue and stop when it closes or cancellation is
    /// requested; a single collector gathers the outcomes.
    fn run_pool<F>(&self, matches: &[ArtifactMatch], f: F) -> Vec<(String, Result<()>)>
    where
        F: Fn(&ArtifactMatch) -> Result<()> + Sync,
    {
        let width = self.width().max(1);
        let queue: Mutex<VecDeque<ArtifactMatch>> =
            Mutex::new(matches.iter().cloned().collect());
        let (tx, rx) = mpsc::channel();

        std::thread::scope(|scope| {
            for _ in 0..width {
                let tx = tx.clone();
                let queue = &queue;
                let f = &f;
                let cancel = &self.cancel;
                scope.spawn(move || loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let job = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some(m) = job else {
                        break;
                    };
                    if tx.send((m.package.fingerprint(), f(&m))).is_err() {
                        break;
                    }
                });
            }
            drop(tx);
            rx.iter().collect()
        })
    }

    fn collect_outcomes(&self, outcomes: Vec<(String, Result<()>)>, what: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CinderError::Cancelled);
        }
        for (fingerprint, outcome) in outcomes {
            if let Err(e) = outcome {
                if e.is_fatal() || !self.options.force {
                    return Err(e);
                }
                log::warn!("{what} of {fingerprint} failed, continuing under force: {e}");
            }
        }
        Ok(())
    }
}

/// Partition `files` into those present under `target` and those not,
/// ordering the present ones so children come before their parent
/// directories.
pub fn order_files(target: &Path, files: &[String]) -> (Vec<String>, Vec<String>) {
    let mut present = Vec::new();
    let mut not_present = Vec::new();

    for f in files {
        if std::fs::symlink_metadata(target.join(f)).is_ok() {
            present.push(f.clone());
        } else {
            not_present.push(f.clone());
        }
    }

    fn depth(path: &str) -> usize {
        path.split('/').filter(|c| !c.is_empty()).count()
    }

    present.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));
    (present, not_present)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventListener;
    use crate::installer::repository::{Artifact, Client, Repository};
    use crate::package::PackageFile;

    struct FakeArtifact {
        package: Package,
        files: Vec<String>,
        corrupt: bool,
    }

    impl Artifact for FakeArtifact {
        fn package(&self) -> &Package {
            &self.package
        }

        fn files(&self) -> Result<Vec<String>> {
            Ok(self.files.clone())
        }

        fn verify(&self) -> Result<()> {
            if self.corrupt {
                Err(CinderError::IntegrityFailure(self.package.fingerprint()))
            } else {
                Ok(())
            }
        }

        fn unpack(&self, target: &Path) -> Result<()> {
            for f in &self.files {
                let path = target.join(f);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, self.package.fingerprint())?;
            }
            Ok(())
        }
    }

    struct FakeClient {
        artifacts: Vec<Arc<dyn Artifact>>,
    }

    impl Client for FakeClient {
        fn download(&self, artifact: &dyn Artifact) -> Result<Arc<dyn Artifact>> {
            self.artifacts
                .iter()
                .find(|a| a.package().fingerprint() == artifact.package().fingerprint())
                .cloned()
                .ok_or_else(|| {
                    CinderError::NotFound(artifact.package().human_readable_string())
                })
        }
    }

    struct FakeRepository {
        name: String,
        priority: i32,
        database: Arc<MemoryDatabase>,
        artifacts: Vec<Arc<dyn Artifact>>,
    }

    impl Repository for FakeRepository {
        fn name(&self) -> &str {
            &self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn enabled(&self) -> bool {
            true
        }

        fn url(&self) -> &str {
            "memory://test"
        }

        fn index(&self) -> Vec<Arc<dyn Artifact>> {
            self.artifacts.clone()
        }

        fn database(&self) -> Arc<dyn PackageDatabase> {
            self.database.clone()
        }

        fn client(&self) -> Arc<dyn Client> {
            Arc::new(FakeClient {
                artifacts: self.artifacts.clone(),
            })
        }
    }

    fn artifact_file(p: &Package) -> String {
        format!("usr/bin/{}", p.name)
    }

    fn repo_with(packages: Vec<Package>) -> Repositories {
        repo_with_corrupt(packages, &[])
    }

    fn repo_with_corrupt(packages: Vec<Package>, corrupt: &[&str]) -> Repositories {
        let database = Arc::new(MemoryDatabase::new());
        let mut artifacts: Vec<Arc<dyn Artifact>> = Vec::new();
        for p in &packages {
            database.create_package(p).unwrap();
            artifacts.push(Arc::new(FakeArtifact {
                package: p.clone(),
                files: vec![artifact_file(p)],
                corrupt: corrupt.contains(&p.name.as_str()),
            }));
        }
        Repositories::new(vec![Arc::new(FakeRepository {
            name: "main".to_string(),
            priority: 1,
            database,
            artifacts,
        })])
    }

    fn temp_system() -> (tempfile::TempDir, System) {
        let dir = tempfile::tempdir().unwrap();
        let system = System::new(Arc::new(MemoryDatabase::new()), dir.path());
        (dir, system)
    }

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<Event>>,
    }

    impl EventListener for EventLog {
        fn handle(&self, event: &Event) {
            self.events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(event.clone());
        }
    }

    #[derive(Default)]
    struct RecordingFinalizer {
        ran: Mutex<Vec<String>>,
    }

    impl FinalizerRunner for RecordingFinalizer {
        fn run(&self, package: &Package) -> Result<()> {
            self.ran
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(package.fingerprint());
            Ok(())
        }
    }

    fn pkg(name: &str, version: &str) -> Package {
        Package::new("app", name, version)
    }

    #[test]
    fn test_install_end_to_end() {
        let repos = repo_with(vec![
            pkg("a", "1.0").with_requires(vec![pkg("b", "")]),
            pkg("b", "1.0"),
        ]);
        let finalizer = Arc::new(RecordingFinalizer::default());
        let installer = Installer::new(repos, InstallerOptions::default())
            .with_finalizer_runner(finalizer.clone());

        let log = Arc::new(EventLog::default());
        installer.events().subscribe(log.clone());

        let (_dir, system) = temp_system();
        installer
            .install(&Packages::single(pkg("a", "1.0")), &system)
            .unwrap();

        assert_eq!(installer.state(), TransactionState::Done);

        // Both packages landed in the database with their manifests.
        assert!(system.database.find_package(&pkg("a", "1.0")).is_ok());
        assert!(system.database.find_package(&pkg("b", "1.0")).is_ok());
        assert_eq!(
            system.database.get_package_files(&pkg("a", "1.0")).unwrap(),
            vec!["usr/bin/a"]
        );

        // Files were unpacked into the target root.
        assert!(system.target.join("usr/bin/a").exists());
        assert!(system.target.join("usr/bin/b").exists());

        // One completion event per package.
        let events = log.events.lock().unwrap();
        let installs = events
            .iter()
            .filter(|e| matches!(e, Event::InstallCompleted { .. }))
            .count();
        assert_eq!(installs, 2);

        // Finalizers ran dependency-first.
        let ran = finalizer.ran.lock().unwrap();
        assert_eq!(*ran, vec!["app/b-1.0", "app/a-1.0"]);
    }

    #[test]
    fn test_install_already_installed_is_noop() {
        let repos = repo_with(vec![pkg("a", "1.0")]);
        let installer = Installer::new(repos, InstallerOptions::default());
        let (_dir, system) = temp_system();
        system.database.create_package(&pkg("a", "1.0")).unwrap();

        installer
            .install(&Packages::single(pkg("a", "1.0")), &system)
            .unwrap();
        assert_eq!(system.database.world().len(), 1);
        assert!(!system.target.join("usr/bin/a").exists());
    }

    #[test]
    fn test_install_unknown_package_aborts() {
        let repos = repo_with(vec![pkg("a", "1.0")]);
        let installer = Installer::new(repos, InstallerOptions::default());
        let (_dir, system) = temp_system();

        let result = installer.install(&Packages::single(pkg("ghost", "1.0")), &system);
        assert!(result.is_err());
        assert!(matches!(installer.state(), TransactionState::Aborted(_)));
    }

    #[test]
    fn test_integrity_failure_aborts_unless_forced() {
        let (_dir, system) = temp_system();

        let repos = repo_with_corrupt(vec![pkg("a", "1.0")], &["a"]);
        let installer = Installer::new(repos.clone(), InstallerOptions::default());
        let result = installer.install(&Packages::single(pkg("a", "1.0")), &system);
        assert!(matches!(result, Err(CinderError::IntegrityFailure(_))));
        assert!(system.database.find_package(&pkg("a", "1.0")).is_err());

        let forced = Installer::new(
            repos,
            InstallerOptions {
                force: true,
                ..Default::default()
            },
        );
        forced
            .install(&Packages::single(pkg("a", "1.0")), &system)
            .unwrap();
        assert!(system.database.find_package(&pkg("a", "1.0")).is_ok());
    }

    #[test]
    fn test_uninstall_removes_files_and_database_entry() {
        let repos = repo_with(vec![pkg("a", "1.0")]);
        let installer = Installer::new(repos, InstallerOptions::default());
        let log = Arc::new(EventLog::default());
        installer.events().subscribe(log.clone());

        let (_dir, system) = temp_system();
        installer
            .install(&Packages::single(pkg("a", "1.0")), &system)
            .unwrap();
        assert!(system.target.join("usr/bin/a").exists());

        installer.uninstall(&pkg("a", "1.0"), &system).unwrap();

        assert!(!system.target.join("usr/bin/a").exists());
        assert!(system.database.find_package(&pkg("a", "1.0")).is_err());
        assert!(system.database.get_package_files(&pkg("a", "1.0")).is_err());

        let events = log.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::UninstallCompleted { .. })));
    }

    #[test]
    fn test_uninstall_respects_config_protect() {
        struct ProtectEtc;
        impl ConfigProtect for ProtectEtc {
            fn protected(&self, path: &str) -> bool {
                path.starts_with("etc/")
            }
        }

        let (_dir, system) = temp_system();
        let p = pkg("a", "1.0");
        system.database.create_package(&p).unwrap();
        system
            .database
            .set_package_files(&PackageFile {
                package_fingerprint: p.fingerprint(),
                files: vec!["usr/bin/a".to_string(), "etc/a.conf".to_string()],
            })
            .unwrap();
        for f in ["usr/bin/a", "etc/a.conf"] {
            let path = system.target.join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "x").unwrap();
        }

        let installer = Installer::new(Repositories::default(), InstallerOptions::default())
            .with_config_protect(Arc::new(ProtectEtc));
        installer.uninstall(&p, &system).unwrap();

        assert!(!system.target.join("usr/bin/a").exists());
        assert!(system.target.join("etc/a.conf").exists());
    }

    #[test]
    fn test_uninstall_revdep_blocked_unless_forced() {
        let (_dir, system) = temp_system();
        let a = pkg("a", "1.0");
        let b = pkg("b", "1.0").with_requires(vec![pkg("a", "")]);
        for p in [&a, &b] {
            system.database.create_package(p).unwrap();
            system
                .database
                .set_package_files(&PackageFile {
                    package_fingerprint: p.fingerprint(),
                    files: vec![],
                })
                .unwrap();
        }

        let installer = Installer::new(Repositories::default(), InstallerOptions::default());
        let result = installer.uninstall(&a, &system);
        assert!(matches!(result, Err(CinderError::ConflictBlocked { .. })));
        assert!(matches!(installer.state(), TransactionState::Aborted(_)));

        let forced = Installer::new(
            Repositories::default(),
            InstallerOptions {
                force: true,
                ..Default::default()
            },
        );
        forced.uninstall(&a, &system).unwrap();
        assert!(system.database.find_package(&a).is_err());
    }

    #[test]
    fn test_upgrade_swaps_versions() {
        let repos = repo_with(vec![pkg("a", "1.1")]);
        let installer = Installer::new(repos, InstallerOptions::default());

        let (_dir, system) = temp_system();
        let old = pkg("a", "1.0");
        system.database.create_package(&old).unwrap();
        system
            .database
            .set_package_files(&PackageFile {
                package_fingerprint: old.fingerprint(),
                files: vec!["usr/bin/a".to_string()],
            })
            .unwrap();
        let path = system.target.join("usr/bin/a");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "old").unwrap();

        installer.upgrade(&system).unwrap();

        assert!(system.database.find_package(&pkg("a", "1.1")).is_ok());
        assert!(system.database.find_package(&pkg("a", "1.0")).is_err());
        assert_eq!(
            std::fs::read_to_string(system.target.join("usr/bin/a")).unwrap(),
            "app/a-1.1"
        );
    }

    #[test]
    fn test_upgrade_new_revisions() {
        // Same version, different build timestamp: only picked up when
        // the sync option asks for it.
        let rebuilt = pkg("a", "1.0").with_build_timestamp("2");
        let repos = repo_with(vec![rebuilt.clone()]);
        let (_dir, system) = temp_system();
        let current = pkg("a", "1.0").with_build_timestamp("1");
        system.database.create_package(&current).unwrap();
        system
            .database
            .set_package_files(&PackageFile {
                package_fingerprint: current.fingerprint(),
                files: vec![],
            })
            .unwrap();

        let plain = Installer::new(repos.clone(), InstallerOptions::default());
        plain.upgrade(&system).unwrap();
        assert_eq!(
            system
                .database
                .find_package(&pkg("a", "1.0"))
                .unwrap()
                .build_timestamp,
            "1"
        );

        let syncing = Installer::new(
            repos,
            InstallerOptions {
                upgrade_new_revisions: true,
                ..Default::default()
            },
        );
        syncing.upgrade(&system).unwrap();
        assert_eq!(
            system
                .database
                .find_package(&pkg("a", "1.0"))
                .unwrap()
                .build_timestamp,
            "2"
        );
    }

    #[test]
    fn test_reclaim() {
        let repos = repo_with(vec![pkg("a", "1.0"), pkg("b", "1.0")]);
        let installer = Installer::new(repos, InstallerOptions::default());

        let (_dir, system) = temp_system();
        // Only package a's files exist in the target.
        let path = system.target.join("usr/bin/a");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "x").unwrap();

        installer.reclaim(&system).unwrap();

        assert!(system.database.find_package(&pkg("a", "1.0")).is_ok());
        assert!(system.database.find_package(&pkg("b", "1.0")).is_err());
        assert_eq!(
            system.database.get_package_files(&pkg("a", "1.0")).unwrap(),
            vec!["usr/bin/a"]
        );

        // A second pass filters out what was already reclaimed.
        installer.reclaim(&system).unwrap();
        assert_eq!(system.database.world().len(), 1);
    }

    #[test]
    fn test_order_files() {
        let dir = tempfile::tempdir().unwrap();
        for f in ["usr/share/doc/a/readme", "usr/bin/a"] {
            let path = dir.path().join(f);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, "x").unwrap();
        }

        let files = vec![
            "usr/bin/a".to_string(),
            "usr/share/doc/a/readme".to_string(),
            "usr/share/doc/a".to_string(),
            "missing/file".to_string(),
        ];
        let (present, not_present) = order_files(dir.path(), &files);

        assert_eq!(not_present, vec!["missing/file"]);
        // Children come before their parent directories.
        let readme = present
            .iter()
            .position(|f| f == "usr/share/doc/a/readme")
            .unwrap();
        let parent = present.iter().position(|f| f == "usr/share/doc/a").unwrap();
        assert!(readme < parent);
    }
}

