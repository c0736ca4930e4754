use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, OnceLock};

use cinder_version::{is_selector, selector_match_version, Selector};

use crate::error::{CinderError, Result};
use crate::package::{Package, PackageFile, Packages};

use super::PackageDatabase;

/// In-memory package database.
///
/// Packages are stored JSON-serialized under their fingerprint, next to
/// a file-manifest map, a no-version index (package name -> versions)
/// and a provides index. Every operation locks the single store mutex.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: Mutex<MemoryStore>,
}

#[derive(Debug, Default)]
struct MemoryStore {
    database: HashMap<String, String>,
    files: HashMap<String, Vec<String>>,
    cache_no_version: HashMap<String, HashSet<String>>,
    provides: HashMap<String, HashMap<String, Package>>,
}

static GLOBAL: OnceLock<MemoryDatabase> = OnceLock::new();

impl MemoryDatabase {
    pub fn new() -> Self {
        MemoryDatabase::default()
    }

    /// The process-wide shared instance.
    ///
    /// A compatibility shim for callers that predate explicit database
    /// injection: initialized at first use, reset between tests with
    /// `clean()`. New code should construct its own instance.
    pub fn global() -> &'static MemoryDatabase {
        GLOBAL.get_or_init(MemoryDatabase::new)
    }

    fn store(&self) -> MutexGuard<'_, MemoryStore> {
        // Recover the guard if a writer panicked; the maps stay usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MemoryStore {
    fn decode(&self, id: &str) -> Result<Package> {
        let raw = self
            .database
            .get(id)
            .ok_or_else(|| CinderError::NotFound(format!("no key found for {id}")))?;
        Ok(serde_json::from_str(raw)?)
    }

    fn insert(&mut self, p: &Package) -> Result<String> {
        let fingerprint = p.fingerprint();
        let encoded = serde_json::to_string(p)?;
        self.database.insert(fingerprint.clone(), encoded);

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

        Ok(fingerprint)
    }

    fn delete(&mut self, p: &Package) -> Result<()> {
        let fingerprint = p.fingerprint();
        if self.database.remove(&fingerprint).is_none() {
            return Err(CinderError::NotFound(format!(
                "package not found: {}",
                p.human_readable_string()
            )));
        }

        if let Some(versions) = self.cache_no_version.get_mut(&p.package_name()) {
            versions.remove(&p.version);
            if versions.is_empty() {
                self.cache_no_version.remove(&p.package_name());
            }
        }

        // The provides index must only point at resident packages.
        for providers in self.provides.values_mut() {
            providers.retain(|_, provider| provider.fingerprint() != fingerprint);
        }
        self.provides.retain(|_, providers| !providers.is_empty());

        Ok(())
    }

    /// Resolve a reference through the provides index: exact provided
    /// version first, then any provided version accepted by the
    /// reference's selector.
    fn get_provide(&self, p: &Package) -> Option<Package> {
        let providers = self.provides.get(&p.package_name())?;

        if let Some(provider) = providers.get(&p.version) {
            return self.decode(&provider.fingerprint()).ok();
        }

        for (provided_version, provider) in providers {
            let matched = if is_selector(&p.version) {
                selector_match_version(&p.version, provided_version).unwrap_or(false)
            } else {
                false
            };
            if matched {
                return self.decode(&provider.fingerprint()).ok();
            }
        }

        None
    }

    fn versions_of(&self, p: &Package) -> Result<Packages> {
        let target = match self.get_provide(p) {
            Some(provider) => provider,
            None => p.clone(),
        };

        let mut found = Packages::new();
        let Some(versions) = self.cache_no_version.get(&target.package_name()) else {
            return Err(CinderError::NotFound(format!(
                "no versions found for {}",
                target.package_name()
            )));
        };

        let mut sorted: Vec<&String> = versions.iter().collect();
        sorted.sort();
        for version in sorted {
            let candidate = Package::new(&target.category, &target.name, version);
            let stored = self.decode(&candidate.fingerprint()).map_err(|_| {
                CinderError::Fatal(format!(
                    "no-version index lists {} but the store has no entry",
                    candidate.fingerprint()
                ))
            })?;
            found.put(stored);
        }
        Ok(found)
    }
}

impl PackageDatabase for MemoryDatabase {
    fn create_package(&self, p: &Package) -> Result<String> {
        self.store().insert(p)
    }

    fn get_package(&self, id: &str) -> Result<Package> {
        self.store().decode(id)
    }

    fn get_packages(&self) -> Vec<String> {
        let store = self.store();
        let mut keys: Vec<String> = store.database.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn find_package(&self, p: &Package) -> Result<Package> {
        let store = self.store();
        if let Some(provided) = store.get_provide(p) {
            return Ok(provided);
        }
        store.decode(&p.fingerprint())
    }

    fn find_package_versions(&self, p: &Package) -> Result<Packages> {
        self.store().versions_of(p)
    }

    fn find_packages(&self, p: &Package) -> Result<Packages> {
        let store = self.store();
        let target = match store.get_provide(p) {
            Some(provider) => return Ok(Packages::single(provider)),
            None => p,
        };

        let selector = Selector::parse(&target.version)?;
        let versions = store.versions_of(target)?;
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
        let mut store = self.store();
        store.delete(p)?;
        store.insert(p)?;
        Ok(())
    }

    fn remove_package(&self, p: &Package) -> Result<()> {
        self.store().delete(p)
    }

    fn get_package_files(&self, p: &Package) -> Result<Vec<String>> {
        self.store()
            .files
            .get(&p.fingerprint())
            .cloned()
            .ok_or_else(|| {
                CinderError::NotFound(format!(
                    "no files recorded for {}",
                    p.human_readable_string()
                ))
            })
    }

    fn set_package_files(&self, f: &PackageFile) -> Result<()> {
        self.store()
            .files
            .insert(f.package_fingerprint.clone(), f.files.clone());
        Ok(())
    }

    fn remove_package_files(&self, p: &Package) -> Result<()> {
        self.store().files.remove(&p.fingerprint());
        Ok(())
    }

    fn world(&self) -> Packages {
        let store = self.store();
        let mut keys: Vec<&String> = store.database.keys().collect();
        keys.sort();

        let mut all = Packages::new();
        for key in keys {
            if let Ok(p) = store.decode(key) {
                all.put(p);
            }
        }
        all
    }

    fn clean(&self) -> Result<()> {
        let mut store = self.store();
        store.database.clear();
        store.files.clear();
        store.cache_no_version.clear();
        store.provides.clear();
        Ok(())
    }
}
