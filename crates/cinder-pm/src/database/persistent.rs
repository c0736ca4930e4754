use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use redb::{Database, ReadableTable, TableDefinition};

use cinder_version::{is_selector, selector_match_version, Selector};

use crate::error::{CinderError, Result};
use crate::package::{Package, PackageFile, Packages};

use super::PackageDatabase;

const PACKAGES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("packages");
const FILES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("files");

/// Persistent package database on an embedded key-value store.
///
/// Packages and file manifests live in two tables keyed by
/// fingerprint, JSON-encoded. The provides and no-version indexes are
/// kept in memory under the database mutex and rebuilt from the
/// packages table on open.
pub struct PersistentDatabase {
    db: Database,
    indexes: Mutex<Indexes>,
}

#[derive(Debug, Default)]
struct Indexes {
    cache_no_version: HashMap<String, HashSet<String>>,
    provides: HashMap<String, HashMap<String, Package>>,
}

fn storage<E: std::fmt::Display>(e: E) -> CinderError {
    CinderError::Storage(e.to_string())
}

impl PersistentDatabase {
    /// Open (or create) the database at `path` and rebuild the
    /// in-memory indexes from the stored packages.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(storage)?;

        let txn = db.begin_write().map_err(storage)?;
        {
            txn.open_table(PACKAGES_TABLE).map_err(storage)?;
            txn.open_table(FILES_TABLE).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;

        let database = PersistentDatabase {
            db,
            indexes: Mutex::new(Indexes::default()),
        };
        database.rebuild_indexes()?;
        Ok(database)
    }

    fn indexes(&self) -> MutexGuard<'_, Indexes> {
        self.indexes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn rebuild_indexes(&self) -> Result<()> {
        let mut indexes = self.indexes();
        indexes.cache_no_version.clear();
        indexes.provides.clear();

        for p in self.scan()?.iter() {
            indexes.index(p);
        }
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Package> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(PACKAGES_TABLE).map_err(storage)?;
        let guard = table
            .get(id)
            .map_err(storage)?
            .ok_or_else(|| CinderError::NotFound(format!("no key found for {id}")))?;
        Ok(serde_json::from_slice(guard.value())?)
    }

    fn scan(&self) -> Result<Packages> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(PACKAGES_TABLE).map_err(storage)?;

        let mut all = Packages::new();
        for entry in table.iter().map_err(storage)? {
            let (_, value) = entry.map_err(storage)?;
            let p: Package = serde_json::from_slice(value.value())?;
            all.put(p);
        }
        Ok(all)
    }

    fn put(&self, table: TableDefinition<&str, &[u8]>, key: &str, value: &[u8]) -> Result<()> {
        let txn = self.db.begin_write().map_err(storage)?;
        {
            let mut table = txn.open_table(table).map_err(storage)?;
            table.insert(key, value).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;
        Ok(())
    }

    fn delete(&self, table: TableDefinition<&str, &[u8]>, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(storage)?;
        let removed = {
            let mut table = txn.open_table(table).map_err(storage)?;
            let removed = table.remove(key).map_err(storage)?.is_some();
            removed
        };
        txn.commit().map_err(storage)?;
        Ok(removed)
    }
}

impl Indexes {
    fn index(&mut self, p: &Package) {
        for provide in &p.provides {
            self.provides
                .entry(provide.package_name())
                .or_default()
                .insert(provide.version.clone(), p.clone());
        }
        self.cache_no_version
            .entry(p.package_name())
            .or_default()
            .insert(p.version.clone());
    }

    fn unindex(&mut self, p: &Package) {
        let fingerprint = p.fingerprint();
        if let Some(versions) = self.cache_no_version.get_mut(&p.package_name()) {
            versions.remove(&p.version);
            if versions.is_empty() {
                self.cache_no_version.remove(&p.package_name());
            }
        }
        for providers in self.provides.values_mut() {
            providers.retain(|_, provider| provider.fingerprint() != fingerprint);
        }
        self.provides.retain(|_, providers| !providers.is_empty());
    }

    fn provider_for(&self, p: &Package) -> Option<&Package> {
        let providers = self.provides.get(&p.package_name())?;

        if let Some(provider) = providers.get(&p.version) {
            return Some(provider);
        }

        for (provided_version, provider) in providers {
            let matched = if is_selector(&p.version) {
                selector_match_version(&p.version, provided_version).unwrap_or(false)
            } else {
                false
            };
            if matched {
                return Some(provider);
            }
        }
        None
    }
}

impl PackageDatabase for PersistentDatabase {
    fn create_package(&self, p: &Package) -> Result<String> {
        let mut indexes = self.indexes();
        let fingerprint = p.fingerprint();
        let encoded = serde_json::to_vec(p)?;
        self.put(PACKAGES_TABLE, &fingerprint, &encoded)?;
        indexes.index(p);
        Ok(fingerprint)
    }

    fn get_package(&self, id: &str) -> Result<Package> {
        self.fetch(id)
    }

    fn get_packages(&self) -> Vec<String> {
        self.scan()
            .map(|all| all.iter().map(|p| p.fingerprint()).collect())
            .unwrap_or_default()
    }

    fn find_package(&self, p: &Package) -> Result<Package> {
        let indexes = self.indexes();
        if let Some(provider) = indexes.provider_for(p) {
            let id = provider.fingerprint();
            drop(indexes);
            return self.fetch(&id);
        }
        drop(indexes);
        self.fetch(&p.fingerprint())
    }

    fn find_package_versions(&self, p: &Package) -> Result<Packages> {
        let indexes = self.indexes();
        let target = indexes.provider_for(p).cloned().unwrap_or_else(|| p.clone());

        let Some(versions) = indexes.cache_no_version.get(&target.package_name()) else {
            return Err(CinderError::NotFound(format!(
                "no versions found for {}",
                target.package_name()
            )));
        };
        let mut sorted: Vec<String> = versions.iter().cloned().collect();
        drop(indexes);
        sorted.sort();

        let mut found = Packages::new();
        for version in sorted {
            let candidate = Package::new(&target.category, &target.name, &version);
            let stored = self.fetch(&candidate.fingerprint()).map_err(|_| {
                CinderError::Fatal(format!(
                    "no-version index lists {} but the store has no entry",
                    candidate.fingerprint()
                ))
            })?;
            found.put(stored);
        }
        Ok(found)
    }

    fn find_packages(&self, p: &Package) -> Result<Packages> {
        {
            let indexes = self.indexes();
            if let Some(provider) = indexes.provider_for(p) {
                let id = provider.fingerprint();
                drop(indexes);
                return Ok(Packages::single(self.fetch(&id)?));
            }
        }

        let selector = Selector::parse(&p.version)?;
        let versions = self.find_package_versions(p)?;
        let mut found = Packages::new();
        for candidate in versions.iter() {
            let Ok(version) = candidate.parsed_version() else {
                continue;
            };
            if selector.matches(&version) {
                found.put(candidate.clone());
            }
        }
        Ok(found)
    }

    fn update_package(&self, p: &Package) -> Result<()> {
        let mut indexes = self.indexes();
        if !self.delete(PACKAGES_TABLE, &p.fingerprint())? {
            return Err(CinderError::NotFound(format!(
                "package not found: {}",
                p.human_readable_string()
            )));
        }
        indexes.unindex(p);

        let encoded = serde_json::to_vec(p)?;
        self.put(PACKAGES_TABLE, &p.fingerprint(), &encoded)?;
        indexes.index(p);
        Ok(())
    }

    fn remove_package(&self, p: &Package) -> Result<()> {
        let mut indexes = self.indexes();
        if !self.delete(PACKAGES_TABLE, &p.fingerprint())? {
            return Err(CinderError::NotFound(format!(
                "package not found: {}",
                p.human_readable_string()
            )));
        }
        indexes.unindex(p);
        Ok(())
    }

    fn get_package_files(&self, p: &Package) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(storage)?;
        let table = txn.open_table(FILES_TABLE).map_err(storage)?;
        let guard = table
            .get(p.fingerprint().as_str())
            .map_err(storage)?
            .ok_or_else(|| {
                CinderError::NotFound(format!(
                    "no files recorded for {}",
                    p.human_readable_string()
                ))
            })?;
        let manifest: PackageFile = serde_json::from_slice(guard.value())?;
        Ok(manifest.files)
    }

    fn set_package_files(&self, f: &PackageFile) -> Result<()> {
        let encoded = serde_json::to_vec(f)?;
        self.put(FILES_TABLE, &f.package_fingerprint, &encoded)
    }

    fn remove_package_files(&self, p: &Package) -> Result<()> {
        if !self.delete(FILES_TABLE, &p.fingerprint())? {
            return Err(CinderError::NotFound(format!(
                "no files recorded for {}",
                p.human_readable_string()
            )));
        }
        Ok(())
    }

    fn world(&self) -> Packages {
        match self.scan() {
            Ok(all) => all,
            Err(e) => {
                log::warn!("failed scanning package store: {e}");
                Packages::new()
            }
        }
    }

    fn clean(&self) -> Result<()> {
        let mut indexes = self.indexes();
        let txn = self.db.begin_write().map_err(storage)?;
        txn.delete_table(PACKAGES_TABLE).map_err(storage)?;
        txn.delete_table(FILES_TABLE).map_err(storage)?;
        txn.commit().map_err(storage)?;

        let txn = self.db.begin_write().map_err(storage)?;
        {
            txn.open_table(PACKAGES_TABLE).map_err(storage)?;
            txn.open_table(FILES_TABLE).map_err(storage)?;
        }
        txn.commit().map_err(storage)?;

        indexes.cache_no_version.clear();
        indexes.provides.clear();
        Ok(())
    }
}
