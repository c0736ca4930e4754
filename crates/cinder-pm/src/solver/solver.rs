use std::collections::HashSet;
use std::sync::Arc;

use crate::database::{MemoryDatabase, PackageDatabase};
use crate::error::{CinderError, Result};
use crate::package::{Package, Packages};

use super::assertion::{PackageAssert, PackagesAssertions};
use super::formula::{Clause, Encoder, Formula};
use super::parallel::{self, UpgradeDelta};
use super::resolver::PackageResolver;
use super::sat;
use super::{CancellationToken, PackageSolver, SolverKind};

/// The SAT resolver.
///
/// Holds the definition database (the world), the installed database,
/// and the per-transaction encoding database behind the encoder. The
/// sequential and parallel variants share this type; the kind tag
/// selects whether formula construction, list resolution and upgrade
/// scans run inline or across the worker pool.
pub struct Solver {
    kind: SolverKind,
    concurrency: usize,
    definition_db: Arc<dyn PackageDatabase>,
    installed_db: Arc<dyn PackageDatabase>,
    encoder: Encoder,
    wanted: Packages,
    resolver: Arc<dyn PackageResolver>,
    cancel: CancellationToken,
}

impl Solver {
    pub fn with_resolver(
        kind: SolverKind,
        concurrency: usize,
        installed: Arc<dyn PackageDatabase>,
        definitions: Arc<dyn PackageDatabase>,
        solver_db: Arc<dyn PackageDatabase>,
        resolver: Arc<dyn PackageResolver>,
    ) -> Self {
        Solver {
            kind,
            concurrency,
            definition_db: definitions,
            installed_db: installed,
            encoder: Encoder::new(solver_db),
            wanted: Packages::new(),
            resolver,
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.cancel = token;
    }

    /// A fresh solver over the same definitions and resolver, with its
    /// own installed state and encoding namespace.
    fn sibling(&self, installed: Arc<dyn PackageDatabase>) -> Solver {
        let mut sibling = Solver::with_resolver(
            self.kind,
            self.concurrency,
            installed,
            Arc::clone(&self.definition_db),
            Arc::new(MemoryDatabase::new()),
            Arc::clone(&self.resolver),
        );
        sibling.cancel = self.cancel.clone();
        sibling
    }

    fn no_rules(set: &Packages) -> bool {
        set.iter()
            .all(|p| p.requires.is_empty() && p.conflicts.is_empty())
    }

    fn no_rules_world(&self) -> bool {
        Self::no_rules(&self.world())
    }

    fn no_rules_installed(&self) -> bool {
        Self::no_rules(&self.installed())
    }

    /// Per-package clauses for a set, inline or pooled by kind.
    fn clauses_for(&self, packages: &Packages) -> Result<Vec<Clause>> {
        match self.kind {
            SolverKind::SingleCore => {
                let mut clauses = Vec::new();
                for p in packages.iter() {
                    clauses.extend(p.build_formula(self.definition_db.as_ref(), &self.encoder)?);
                }
                Ok(clauses)
            }
            SolverKind::Parallel => parallel::build_clauses_pool(
                packages,
                self.definition_db.as_ref(),
                &self.encoder,
                self.concurrency,
                &self.cancel,
            ),
        }
    }

    /// Resolve a reference list to concrete candidates against `db`,
    /// relaxing missing entries to the best stored version and then to
    /// the reference itself.
    fn get_list(&self, db: &dyn PackageDatabase, list: &Packages) -> Result<Packages> {
        match self.kind {
            SolverKind::SingleCore => {
                let mut resolved = Packages::new();
                for p in list.iter() {
                    resolved.put(db.find_package_candidate(p)?);
                }
                Ok(resolved)
            }
            SolverKind::Parallel => {
                parallel::resolve_list_pool(db, list, self.concurrency, &self.cancel)
            }
        }
    }

    /// Clauses describing the installed set and everything it relates
    /// to in the world; conjoined when the definitions may have
    /// drifted from the system state.
    fn build_installed(&self) -> Result<Vec<Clause>> {
        let world = self.world();
        let mut packages = Packages::new();
        for p in self.installed().iter() {
            for dep in p.related(&world).iter() {
                packages.put(dep.clone());
            }
        }
        self.clauses_for(&packages)
    }

    /// Clauses over every package in the definition database.
    fn build_world(&self, include_installed: bool) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();
        if include_installed {
            clauses.extend(self.build_installed()?);
        }
        clauses.extend(self.clauses_for(&self.world())?);
        Ok(clauses)
    }

    /// Clauses only over packages reachable from the wanted set via
    /// the requires-closure. The default scope for install requests.
    fn build_partial_world(&self, include_installed: bool) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();
        if include_installed {
            clauses.extend(self.build_installed()?);
        }

        let world = self.world();
        let packages = match self.kind {
            SolverKind::SingleCore => {
                let mut packages = Packages::new();
                for w in self.wanted.iter() {
                    for dep in w.related(&world).iter() {
                        if !packages.contains(dep) {
                            packages.put(dep.clone());
                        }
                    }
                }
                packages
            }
            SolverKind::Parallel => parallel::expand_related_pool(
                &self.wanted,
                &world,
                self.concurrency,
                &self.cancel,
            )?,
        };

        clauses.extend(self.clauses_for(&packages)?);
        Ok(clauses)
    }

    /// The main request formula: every wanted atom must hold, every
    /// installed atom must stay selected, conjoined with the partial
    /// world.
    fn build_request_formula(&self) -> Result<Formula> {
        let mut formula = Formula::new();
        let installed = self.installed();

        for wanted in self.wanted.iter() {
            let w = self.encoder.encode(wanted)?;
            formula.and(vec![w]);
            for i in installed.iter() {
                let atom = self.encoder.encode(i)?;
                formula.and(vec![atom]);
            }
        }

        formula.and_all(self.build_partial_world(false)?);
        Ok(formula)
    }

    /// Clauses for the related closure of each package in `packs`.
    fn generate_clauses(&self, packs: &Packages) -> Result<Vec<Clause>> {
        let world = self.world();
        let mut packages = Packages::new();
        for p in packs.iter() {
            for dep in p.related(&world).iter() {
                packages.put(dep.clone());
            }
        }
        self.clauses_for(&packages)
    }

    fn scan_upgrades(
        &self,
        universe: &dyn PackageDatabase,
        installed_copy: Option<&dyn PackageDatabase>,
        missing_from: Option<&dyn PackageDatabase>,
    ) -> Result<Vec<UpgradeDelta>> {
        let installed = self.installed();
        match self.kind {
            SolverKind::SingleCore => installed
                .iter()
                .map(|p| parallel::scan_one(p, universe, installed_copy, missing_from))
                .collect(),
            SolverKind::Parallel => parallel::upgrade_scan_pool(
                &installed,
                universe,
                installed_copy,
                missing_from,
                self.concurrency,
                &self.cancel,
            ),
        }
    }
}

impl PackageSolver for Solver {
    fn set_definition_database(&mut self, db: Arc<dyn PackageDatabase>) {
        self.definition_db = db;
    }

    fn set_resolver(&mut self, resolver: Arc<dyn PackageResolver>) {
        self.resolver = resolver;
    }

    fn world(&self) -> Packages {
        self.definition_db.world()
    }

    fn installed(&self) -> Packages {
        self.installed_db.world()
    }

    fn install(&mut self, wanted: &Packages) -> Result<PackagesAssertions> {
        self.wanted = self.get_list(self.definition_db.as_ref(), wanted)?;

        if self.no_rules_world() {
            // No package in the world carries any constraint: the
            // target state is simply installed plus wanted.
            let mut assertions = PackagesAssertions::new();
            for p in self.installed().iter() {
                assertions.push(PackageAssert {
                    package: p.clone(),
                    value: true,
                });
            }
            for p in self.wanted.iter() {
                assertions.push(PackageAssert {
                    package: p.clone(),
                    value: true,
                });
            }
            return Ok(assertions);
        }

        self.solve()
    }

    fn uninstall(
        &mut self,
        c: &Package,
        check_conflicts: bool,
        full: bool,
    ) -> Result<Packages> {
        // Relax the lookup so packages missing from the installed
        // definitions can still be computed against.
        let candidate = match self.installed_db.find_package(c) {
            Ok(found) => found,
            Err(_) => match self.installed_db.find_package_versions(c) {
                Ok(versions) if !versions.is_empty() => {
                    versions.best(None).unwrap_or_else(|| c.clone())
                }
                _ => c.clone(),
            },
        };

        let installed = self.installed();

        // Only asked whether the candidate itself can go: gate on its
        // reverse dependencies and stop.
        if !full && check_conflicts {
            self.conflicts(&candidate, &installed)?;
            return Ok(Packages::single(candidate));
        }

        // The hypothetical system state without the candidate and its
        // requires-closure.
        let installed_minus_candidate = installed.search(|p| {
            !p.matches(&candidate) && !candidate.requires_contains(&installed, p)
        });

        // The requires-closure of the candidate, computed by a sibling
        // resolver installing it against an empty system.
        let mut sibling = self.sibling(Arc::new(MemoryDatabase::new()));
        let asserts = sibling.install(&Packages::single(candidate.clone()))?;

        let mut result = Packages::new();
        for assert in asserts.iter().filter(|a| a.value) {
            if !check_conflicts {
                result.put(assert.package.clone());
                continue;
            }

            if !self.conflicts_with_installed(&assert.package)? {
                result.put(assert.package.clone());
                continue;
            }

            // Still conflicting: check again as if the candidate and
            // its tree were already gone.
            if !self.conflicts_with(&assert.package, &installed_minus_candidate)? {
                result.put(assert.package.clone());
            }
        }

        Ok(result)
    }

    fn uninstall_universe(&mut self, to_remove: &Packages) -> Result<Packages> {
        if self.no_rules_installed() {
            return self.get_list(self.installed_db.as_ref(), to_remove);
        }

        let to_remove = self.get_list(self.installed_db.as_ref(), to_remove)?;

        let mut formula = Formula::new();
        for p in to_remove.unique().iter() {
            let atom = self.encoder.encode(p)?;
            formula.and(vec![-atom]);
        }
        formula.and_all(self.build_installed()?);

        let model = sat::solve(&formula).ok_or(CinderError::Unsolvable)?;
        let assertions = PackagesAssertions::decode_model(&model, &self.encoder)?;

        let mut marked = Packages::new();
        for assert in assertions.iter().filter(|a| !a.value) {
            if let Ok(p) = self.installed_db.find_package(&assert.package) {
                marked.put(p);
            }
        }
        Ok(marked)
    }

    fn upgrade(
        &mut self,
        check_conflicts: bool,
        _full: bool,
    ) -> Result<(Packages, PackagesAssertions)> {
        // Work against an in-memory copy of the definitions so the
        // provides index is available for version lookups.
        let universe = Arc::new(MemoryDatabase::new());
        self.definition_db.clone_to(universe.as_ref())?;

        let installed_copy: Arc<dyn PackageDatabase> = Arc::new(MemoryDatabase::new());

        let mut to_uninstall = Packages::new();
        let mut to_install = Packages::new();
        for delta in self.scan_upgrades(universe.as_ref(), Some(installed_copy.as_ref()), None)? {
            if let UpgradeDelta::Outdated(installed, best) = delta {
                to_uninstall.put(installed);
                to_install.put(best);
            }
        }

        log::debug!(
            "upgrade: {} outdated, {} candidates",
            to_uninstall.len(),
            to_install.len()
        );

        // Simulate removing each outdated package from the copy.
        for p in to_uninstall.iter() {
            let removed = self.uninstall(p, check_conflicts, false)?;
            for z in removed.iter() {
                installed_copy.remove_package(z)?;
            }
        }

        if to_install.is_empty() {
            return Ok((to_uninstall, PackagesAssertions::new()));
        }

        let mut sibling = self.sibling(installed_copy);
        let assertions = sibling.install(&to_install)?;
        Ok((to_uninstall, assertions))
    }

    fn upgrade_universe(
        &mut self,
        drop_removed: bool,
    ) -> Result<(Packages, PackagesAssertions)> {
        // The universe merges the definitions and the installed world
        // and is authoritative for what exists.
        let universe = Arc::new(MemoryDatabase::new());
        self.definition_db.clone_to(universe.as_ref())?;
        self.installed_db.clone_to(universe.as_ref())?;

        let mut not_up_to_date = Packages::new();
        let mut removed = Packages::new();
        let mut to_upgrade = Packages::new();
        let definitions = Arc::clone(&self.definition_db);
        for delta in self.scan_upgrades(universe.as_ref(), None, Some(definitions.as_ref()))? {
            match delta {
                UpgradeDelta::Outdated(installed, best) => {
                    not_up_to_date.put(installed);
                    to_upgrade.put(best);
                }
                UpgradeDelta::Removed(p) => removed.put(p),
                UpgradeDelta::UpToDate => {}
            }
        }

        if drop_removed {
            not_up_to_date.put_all(&removed);
        }

        let mut formula = Formula::new();
        for p in not_up_to_date.iter() {
            let atom = self.encoder.encode(p)?;
            formula.and(vec![-atom]);
        }
        for p in to_upgrade.iter() {
            let atom = self.encoder.encode(p)?;
            formula.and(vec![atom]);
        }
        if formula.is_empty() {
            return Ok((Packages::new(), PackagesAssertions::new()));
        }

        formula.and_all(self.generate_clauses(&not_up_to_date)?);
        formula.and_all(self.generate_clauses(&to_upgrade)?);

        let model = sat::solve(&formula).ok_or(CinderError::Unsolvable)?;
        let assertions = PackagesAssertions::decode_model(&model, &self.encoder)?;

        let mut marked = Packages::new();
        for assert in assertions.iter().filter(|a| !a.value) {
            if let Ok(p) = self.installed_db.find_package(&assert.package) {
                marked.put(p);
            }
        }
        Ok((marked, assertions))
    }

    fn conflicts(&self, pack: &Package, set: &Packages) -> Result<bool> {
        let p = self
            .definition_db
            .find_package(pack)
            .unwrap_or_else(|_| pack.clone());
        let list = self.get_list(self.definition_db.as_ref(), set)?;

        if self.no_rules_world() {
            return Ok(false);
        }

        let mut visited = HashSet::new();
        let revdeps = p.expanded_revdeps(&list, &mut visited);
        if revdeps.is_empty() {
            Ok(false)
        } else {
            Err(CinderError::ConflictBlocked {
                blockers: revdeps
                    .iter()
                    .map(|r| r.human_readable_string())
                    .collect(),
            })
        }
    }

    fn conflicts_with(&self, pack: &Package, set: &Packages) -> Result<bool> {
        // Relax the lookup so solutions exist for packages missing
        // from the definitions.
        let p = self
            .definition_db
            .find_package(pack)
            .unwrap_or_else(|_| pack.clone());
        let list = self.get_list(self.definition_db.as_ref(), set)?;

        if self.no_rules_world() {
            return Ok(false);
        }

        let mut formula = Formula::new();
        let p_atom = self.encoder.encode(&p)?;
        formula.and(vec![-p_atom]);

        for i in list.iter() {
            if i.matches(&p) {
                continue;
            }
            let atom = self.encoder.encode(i)?;
            formula.and(vec![atom]);
        }

        formula.and_all(self.build_world(false)?);

        // No model without the package: the set cannot stand alone.
        Ok(sat::solve(&formula).is_none())
    }

    fn conflicts_with_installed(&self, pack: &Package) -> Result<bool> {
        self.conflicts_with(pack, &self.installed())
    }

    fn solve(&mut self) -> Result<PackagesAssertions> {
        let formula = self.build_request_formula()?;
        log::debug!(
            "solving {} clauses over {} atoms",
            formula.len(),
            self.encoder.len()
        );

        match sat::solve(&formula) {
            Some(model) => {
                if self.cancel.is_cancelled() {
                    return Err(CinderError::Cancelled);
                }
                PackagesAssertions::decode_model(&model, &self.encoder)
            }
            None => {
                log::debug!("no model found, delegating to the fallback resolver");
                let resolver = Arc::clone(&self.resolver);
                resolver.solve(&formula, self)
            }
        }
    }
}
