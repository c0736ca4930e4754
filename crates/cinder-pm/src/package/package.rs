use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::hash::{Hash, Hasher};

use regex::Regex;
use serde::{Deserialize, Serialize};

use cinder_version::{is_selector, selector_match_version, Selector, Version};

use crate::error::Result;

use super::set::Packages;

/// A package definition.
///
/// The identity triple is (category, name, version). The `version`
/// field of a package stored in a database is always concrete; inside
/// `requires`, `conflicts` and `provides` entries it may instead hold a
/// selector string (`>=1.0`, empty for "any version").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Package {
    pub category: String,
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<Package>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<Package>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<Package>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,

    /// Opaque build revision marker, compared by equality only. Two
    /// artifacts at the same version with different timestamps are
    /// different revisions.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub build_timestamp: String,
}

impl Package {
    pub fn new(category: &str, name: &str, version: &str) -> Self {
        Package {
            category: category.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            ..Default::default()
        }
    }

    pub fn with_requires(mut self, requires: Vec<Package>) -> Self {
        self.requires = requires;
        self
    }

    pub fn with_conflicts(mut self, conflicts: Vec<Package>) -> Self {
        self.conflicts = conflicts;
        self
    }

    pub fn with_provides(mut self, provides: Vec<Package>) -> Self {
        self.provides = provides;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_annotations(mut self, annotations: BTreeMap<String, String>) -> Self {
        self.annotations = annotations;
        self
    }

    pub fn with_build_timestamp(mut self, ts: &str) -> Self {
        self.build_timestamp = ts.to_string();
        self
    }

    /// `category/name`, the version-less identity.
    pub fn package_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// The canonical `category/name-version` key.
    pub fn fingerprint(&self) -> String {
        format!("{}/{}-{}", self.category, self.name, self.version)
    }

    pub fn human_readable_string(&self) -> String {
        format!("{}/{}-{}", self.category, self.name, self.version)
    }

    /// Whether the version field holds a selector rather than a
    /// concrete version.
    pub fn is_selector(&self) -> bool {
        is_selector(&self.version)
    }

    pub fn selector(&self) -> Result<Selector> {
        Ok(Selector::parse(&self.version)?)
    }

    pub fn parsed_version(&self) -> Result<Version> {
        Ok(Version::parse(&self.version)?)
    }

    /// Whether this concrete package satisfies `other`: same category
    /// and name, and this version is accepted by `other`'s selector or
    /// compares equal to `other`'s version.
    pub fn matches(&self, other: &Package) -> bool {
        if self.category != other.category || self.name != other.name {
            return false;
        }
        if self.version == other.version {
            return true;
        }
        if is_selector(&other.version) {
            return selector_match_version(&other.version, &self.version).unwrap_or(false);
        }
        match (
            Version::parse(&self.version),
            Version::parse(&other.version),
        ) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    /// Whether any label key or value matches the pattern.
    pub fn match_label(&self, re: &Regex) -> bool {
        self.labels
            .iter()
            .any(|(k, v)| re.is_match(k) || re.is_match(v))
    }

    pub fn has_annotation(&self, key: &str) -> bool {
        self.annotations.contains_key(key)
    }

    /// Transitively collect packages in `world` whose requirements are
    /// satisfied by this package, breadth-first in first-seen order.
    /// The visited set carries fingerprints to keep cyclic requirement
    /// graphs from recursing forever.
    pub fn expanded_revdeps(&self, world: &Packages, visited: &mut HashSet<String>) -> Packages {
        let mut revdeps = Packages::new();
        let mut queue: VecDeque<Package> = VecDeque::new();
        queue.push_back(self.clone());
        visited.insert(self.fingerprint());

        while let Some(current) = queue.pop_front() {
            for candidate in world.iter() {
                if candidate
                    .requires
                    .iter()
                    .any(|req| current.satisfies(req))
                {
                    if visited.insert(candidate.fingerprint()) {
                        revdeps.put(candidate.clone());
                        queue.push_back(candidate.clone());
                    }
                }
            }
        }

        revdeps
    }

    /// Whether this package satisfies the reference `req`, either
    /// directly or through one of its provides declarations.
    pub fn satisfies(&self, req: &Package) -> bool {
        self.matches(req) || self.provides.iter().any(|prov| prov.matches(req))
    }

    /// The transitive requires-closure of this package within `world`,
    /// including the package itself. Selector requirements expand to
    /// every matching version, which is what scopes partial formula
    /// construction.
    pub fn related(&self, world: &Packages) -> Packages {
        let mut closure = Packages::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<Package> = VecDeque::new();

        closure.put(self.clone());
        seen.insert(self.fingerprint());
        queue.push_back(self.clone());

        while let Some(current) = queue.pop_front() {
            for req in &current.requires {
                for dep in world.search(|q| q.satisfies(req)).iter() {
                    if seen.insert(dep.fingerprint()) {
                        closure.put(dep.clone());
                        queue.push_back(dep.clone());
                    }
                }
            }
        }

        closure
    }

    /// Whether `other` appears in this package's requires-closure
    /// within `world`.
    pub fn requires_contains(&self, world: &Packages, other: &Package) -> bool {
        let fingerprint = other.fingerprint();
        self.related(world)
            .iter()
            .any(|p| p.fingerprint() == fingerprint && p.fingerprint() != self.fingerprint())
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.human_readable_string())
    }
}

/// The recorded file manifest of an installed package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFile {
    pub package_fingerprint: String,
    pub files: Vec<String>,
}
