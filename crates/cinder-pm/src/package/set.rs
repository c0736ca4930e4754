use indexmap::IndexMap;

use cinder_version::{Selector, Version};

use super::package::Package;

/// An insertion-ordered set of packages, keyed by fingerprint.
///
/// Re-inserting a fingerprint replaces the entry and refreshes its
/// insertion position, which is what gives `best` its latest-insertion
/// tie-break.
#[derive(Debug, Clone, Default)]
pub struct Packages {
    items: IndexMap<String, Package>,
}

impl Packages {
    pub fn new() -> Self {
        Packages {
            items: IndexMap::new(),
        }
    }

    pub fn from(packages: Vec<Package>) -> Self {
        let mut set = Packages::new();
        for p in packages {
            set.put(p);
        }
        set
    }

    pub fn single(package: Package) -> Self {
        Self::from(vec![package])
    }

    pub fn put(&mut self, package: Package) {
        let fingerprint = package.fingerprint();
        // Refresh insertion order on replacement.
        self.items.shift_remove(&fingerprint);
        self.items.insert(fingerprint, package);
    }

    pub fn put_all(&mut self, other: &Packages) {
        for p in other.iter() {
            self.put(p.clone());
        }
    }

    /// The set is already unique per fingerprint; kept for call sites
    /// that make the deduplication explicit.
    pub fn unique(&self) -> Packages {
        self.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Package> {
        self.items.values()
    }

    pub fn each<F>(&self, mut f: F)
    where
        F: FnMut(&Package),
    {
        for p in self.items.values() {
            f(p);
        }
    }

    pub fn search<F>(&self, pred: F) -> Packages
    where
        F: Fn(&Package) -> bool,
    {
        Packages::from(self.iter().filter(|p| pred(p)).cloned().collect())
    }

    /// All entries sharing `q`'s (category, name).
    pub fn find_package_versions(&self, q: &Package) -> Packages {
        self.search(|p| p.category == q.category && p.name == q.name)
    }

    pub fn contains(&self, p: &Package) -> bool {
        self.items.contains_key(&p.fingerprint())
    }

    pub fn get(&self, fingerprint: &str) -> Option<&Package> {
        self.items.get(fingerprint)
    }

    pub fn remove(&mut self, p: &Package) {
        self.items.shift_remove(&p.fingerprint());
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The highest version matching the selector, or the overall
    /// highest when no selector is given. Entries whose version does
    /// not parse are skipped; equal versions resolve to the latest
    /// inserted.
    pub fn best(&self, selector: Option<&Selector>) -> Option<Package> {
        let mut best: Option<(Version, &Package)> = None;

        for p in self.iter() {
            let Ok(version) = p.parsed_version() else {
                continue;
            };
            if let Some(sel) = selector {
                if !sel.matches(&version) {
                    continue;
                }
            }
            match &best {
                Some((current, _)) if *current > version => {}
                _ => best = Some((version, p)),
            }
        }

        best.map(|(_, p)| p.clone())
    }
}

impl<'a> IntoIterator for &'a Packages {
    type Item = &'a Package;
    type IntoIter = indexmap::map::Values<'a, String, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.values()
    }
}
