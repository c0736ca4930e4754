use std::collections::HashSet;
use std::fmt;

use crate::database::PackageDatabase;
use crate::error::Result;
use crate::package::{Package, Packages};

use super::formula::Encoder;
use super::sat::Model;

/// One decoded atom: a package and whether the model selects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageAssert {
    pub package: Package,
    pub value: bool,
}

impl fmt::Display for PackageAssert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            self.package.human_readable_string(),
            if self.value { "installed" } else { "not installed" }
        )
    }
}

/// The ordered decoding of a SAT model.
#[derive(Debug, Clone, Default)]
pub struct PackagesAssertions {
    asserts: Vec<PackageAssert>,
}

impl PackagesAssertions {
    pub fn new() -> Self {
        PackagesAssertions::default()
    }

    /// Invert a model through the encoding database. Output follows
    /// atom-id order, which is first-registration order and therefore
    /// stable across runs.
    pub fn decode_model(model: &Model, encoder: &Encoder) -> Result<Self> {
        let mut assertions = PackagesAssertions::new();
        for (&atom, &value) in model {
            let package = encoder.package_of(atom)?;
            assertions.push(PackageAssert { package, value });
        }
        Ok(assertions)
    }

    pub fn push(&mut self, assert: PackageAssert) {
        self.asserts.push(assert);
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageAssert> {
        self.asserts.iter()
    }

    pub fn len(&self) -> usize {
        self.asserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.asserts.is_empty()
    }

    pub fn search(&self, fingerprint: &str) -> Option<&PackageAssert> {
        self.asserts
            .iter()
            .find(|a| a.package.fingerprint() == fingerprint)
    }

    pub fn contains(&self, package: &Package, value: bool) -> bool {
        self.asserts
            .iter()
            .any(|a| a.value == value && a.package == *package)
    }

    /// The selected packages, in assertion order.
    pub fn to_packages(&self) -> Packages {
        let mut packages = Packages::new();
        for a in self.asserts.iter().filter(|a| a.value) {
            packages.put(a.package.clone());
        }
        packages
    }

    /// Topologically order the selected assertions along the requires
    /// DAG rooted at `root_fingerprint`: dependencies come first, the
    /// root last. Requirements resolve against the selected set itself
    /// (falling back to the definition database for provides
    /// indirection), sibling order follows assertion order, and a
    /// visited set keeps requirement cycles finite.
    pub fn order(
        &self,
        definition_db: &dyn PackageDatabase,
        root_fingerprint: &str,
    ) -> Result<PackagesAssertions> {
        let selected: Vec<&PackageAssert> = self.asserts.iter().filter(|a| a.value).collect();

        let mut ordered = PackagesAssertions::new();
        let mut visited: HashSet<String> = HashSet::new();
        self.visit(
            root_fingerprint,
            &selected,
            definition_db,
            &mut visited,
            &mut ordered,
        );
        Ok(ordered)
    }

    fn visit(
        &self,
        fingerprint: &str,
        selected: &[&PackageAssert],
        definition_db: &dyn PackageDatabase,
        visited: &mut HashSet<String>,
        ordered: &mut PackagesAssertions,
    ) {
        if !visited.insert(fingerprint.to_string()) {
            return;
        }
        let Some(assert) = selected
            .iter()
            .find(|a| a.package.fingerprint() == fingerprint)
        else {
            return;
        };

        for req in &assert.package.requires {
            let mut matched = false;
            for dep in selected.iter() {
                if dep.package.matches(req) {
                    matched = true;
                    self.visit(
                        &dep.package.fingerprint(),
                        selected,
                        definition_db,
                        visited,
                        ordered,
                    );
                }
            }
            if !matched {
                // A provided name: resolve the provider and order it.
                if let Ok(provider) = definition_db.find_package(req) {
                    self.visit(
                        &provider.fingerprint(),
                        selected,
                        definition_db,
                        visited,
                        ordered,
                    );
                }
            }
        }

        ordered.push((*assert).clone());
    }
}

impl IntoIterator for PackagesAssertions {
    type Item = PackageAssert;
    type IntoIter = std::vec::IntoIter<PackageAssert>;

    fn into_iter(self) -> Self::IntoIter {
        self.asserts.into_iter()
    }
}

impl fmt::Display for PackagesAssertions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for a in &self.asserts {
            writeln!(f, "{a}")?;
        }
        Ok(())
    }
}
