//! Worker-pool primitives for the parallel solver variant.
//!
//! Work items go into a shared queue, a scoped worker per slot drains
//! it and sends results over a channel, and a single collector gathers
//! them after the join barrier. Results are re-ordered by item index so
//! the parallel variant emits clauses and lists in the same order as
//! the sequential one.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Mutex;

use crate::database::PackageDatabase;
use crate::error::{CinderError, Result};
use crate::package::{Package, Packages};

use super::formula::{Clause, Encoder};
use super::CancellationToken;

/// Apply `f` to every package across `width` workers, preserving input
/// order in the output. Workers check the cancellation token at each
/// queue-receive boundary.
fn pooled_map<T, F>(
    items: Vec<Package>,
    width: usize,
    cancel: &CancellationToken,
    f: F,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&Package) -> Result<T> + Sync,
{
    let width = width.max(1);
    let queue: Mutex<VecDeque<(usize, Package)>> =
        Mutex::new(items.into_iter().enumerate().collect());
    let (tx, rx) = mpsc::channel::<(usize, Result<T>)>();

    let mut collected: Vec<(usize, Result<T>)> = std::thread::scope(|scope| {
        for _ in 0..width {
            let tx = tx.clone();
            let queue = &queue;
            let f = &f;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    break;
                }
                let job = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                let Some((index, package)) = job else {
                    break;
                };
                if tx.send((index, f(&package))).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    });

    if cancel.is_cancelled() {
        return Err(CinderError::Cancelled);
    }

    collected.sort_by_key(|(index, _)| *index);
    collected.into_iter().map(|(_, result)| result).collect()
}

/// Fan per-package formula construction out over the pool.
pub(super) fn build_clauses_pool(
    packages: &Packages,
    definition_db: &dyn PackageDatabase,
    encoder: &Encoder,
    width: usize,
    cancel: &CancellationToken,
) -> Result<Vec<Clause>> {
    let items: Vec<Package> = packages.iter().cloned().collect();
    let per_package = pooled_map(items, width, cancel, |p| {
        p.build_formula(definition_db, encoder)
    })?;
    Ok(per_package.into_iter().flatten().collect())
}

/// Expand the requires-closure of every wanted package over the pool.
pub(super) fn expand_related_pool(
    wanted: &Packages,
    world: &Packages,
    width: usize,
    cancel: &CancellationToken,
) -> Result<Packages> {
    let items: Vec<Package> = wanted.iter().cloned().collect();
    let closures = pooled_map(items, width, cancel, |w| Ok(w.related(world)))?;

    let mut merged = Packages::new();
    for closure in &closures {
        for p in closure.iter() {
            if !merged.contains(p) {
                merged.put(p.clone());
            }
        }
    }
    Ok(merged)
}

/// Resolve a package list to concrete candidates over the pool.
pub(super) fn resolve_list_pool(
    db: &dyn PackageDatabase,
    list: &Packages,
    width: usize,
    cancel: &CancellationToken,
) -> Result<Packages> {
    let items: Vec<Package> = list.iter().cloned().collect();
    let resolved = pooled_map(items, width, cancel, |p| db.find_package_candidate(p))?;
    Ok(Packages::from(resolved))
}

/// The per-package outcome of an upgrade delta scan.
pub(super) enum UpgradeDelta {
    /// Already at the best available version.
    UpToDate,
    /// A better version exists: (installed, best).
    Outdated(Package, Package),
    /// The package has no versions left in the universe.
    Removed(Package),
}

/// Scan the installed set for upgrade candidates over the pool.
///
/// When `installed_copy` is given, every scanned package is also
/// recorded there (the scratch state `upgrade` prunes afterwards).
/// When `missing_from` is given, packages without any version in that
/// database report `Removed`. The result vector preserves installed
/// order, so accumulating from it is deterministic; workers never
/// share a result set.
pub(super) fn upgrade_scan_pool(
    installed: &Packages,
    universe: &dyn PackageDatabase,
    installed_copy: Option<&dyn PackageDatabase>,
    missing_from: Option<&dyn PackageDatabase>,
    width: usize,
    cancel: &CancellationToken,
) -> Result<Vec<UpgradeDelta>> {
    let items: Vec<Package> = installed.iter().cloned().collect();
    pooled_map(items, width, cancel, |p| {
        scan_one(p, universe, installed_copy, missing_from)
    })
}

/// One delta-scan step, shared with the sequential variant.
pub(super) fn scan_one(
    p: &Package,
    universe: &dyn PackageDatabase,
    installed_copy: Option<&dyn PackageDatabase>,
    missing_from: Option<&dyn PackageDatabase>,
) -> Result<UpgradeDelta> {
    if let Some(copy) = installed_copy {
        copy.create_package(p)?;
    }

    if let Some(db) = missing_from {
        let gone = match db.find_package_versions(p) {
            Ok(available) => available.is_empty(),
            Err(_) => true,
        };
        if gone {
            return Ok(UpgradeDelta::Removed(p.clone()));
        }
    }

    let available = match universe.find_package_versions(p) {
        Ok(available) => available,
        Err(_) => return Ok(UpgradeDelta::UpToDate),
    };
    if available.is_empty() {
        return Ok(UpgradeDelta::UpToDate);
    }
    match available.best(None) {
        Some(best) if !best.matches(p) => Ok(UpgradeDelta::Outdated(p.clone(), best)),
        _ => Ok(UpgradeDelta::UpToDate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryDatabase;
    use std::sync::Arc;

    #[test]
    fn test_pooled_map_preserves_order() {
        let items: Vec<Package> = (0..32)
            .map(|i| Package::new("app", &format!("p{i}"), "1.0"))
            .collect();
        let names = pooled_map(items, 4, &CancellationToken::new(), |p| Ok(p.name.clone()))
            .unwrap();
        let expected: Vec<String> = (0..32).map(|i| format!("p{i}")).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_pooled_map_propagates_errors() {
        let items = vec![Package::new("app", "a", "1.0")];
        let result: Result<Vec<()>> = pooled_map(items, 2, &CancellationToken::new(), |p| {
            Err(CinderError::NotFound(p.fingerprint()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_pooled_map_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let items = vec![Package::new("app", "a", "1.0")];
        let result = pooled_map(items, 2, &token, |p| Ok(p.name.clone()));
        assert!(matches!(result, Err(CinderError::Cancelled)));
    }

    #[test]
    fn test_build_clauses_pool_matches_sequential() {
        let db = MemoryDatabase::new();
        let d = Package::new("app", "d", "1.0");
        let b = Package::new("app", "b", "1.0")
            .with_requires(vec![Package::new("app", "d", "")]);
        let a = Package::new("app", "a", "1.0")
            .with_requires(vec![Package::new("app", "b", "")]);
        for p in [&a, &b, &d] {
            db.create_package(p).unwrap();
        }
        let packages = Packages::from(vec![a, b, d]);

        let sequential_encoder = Encoder::new(Arc::new(MemoryDatabase::new()));
        let mut sequential = Vec::new();
        for p in packages.iter() {
            sequential.extend(p.build_formula(&db, &sequential_encoder).unwrap());
        }

        let pooled_encoder = Encoder::new(Arc::new(MemoryDatabase::new()));
        let pooled = build_clauses_pool(
            &packages,
            &db,
            &pooled_encoder,
            4,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(sequential.len(), pooled.len());
    }

    #[test]
    fn test_resolve_list_pool() {
        let db = MemoryDatabase::new();
        db.create_package(&Package::new("app", "d", "1.4")).unwrap();
        db.create_package(&Package::new("app", "d", "1.9")).unwrap();

        let list = Packages::single(Package::new("app", "d", "2.0"));
        let resolved = resolve_list_pool(&db, &list, 2, &CancellationToken::new()).unwrap();
        assert_eq!(resolved.len(), 1);
        assert!(resolved.contains(&Package::new("app", "d", "1.9")));
    }
}
