use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::database::PackageDatabase;
use crate::error::{CinderError, Result};
use crate::package::{Package, Packages};

/// A propositional literal: the magnitude is an atom id, the sign the
/// polarity. A positive atom means "this package version is selected".
pub type Literal = i32;

/// A disjunction of literals.
pub type Clause = Vec<Literal>;

/// A conjunction of clauses, ready for the SAT backend.
#[derive(Debug, Clone, Default)]
pub struct Formula {
    pub clauses: Vec<Clause>,
}

impl Formula {
    pub fn new() -> Self {
        Formula::default()
    }

    pub fn and(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn and_all(&mut self, clauses: Vec<Clause>) {
        self.clauses.extend(clauses);
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }
}

/// Assigns stable atom ids to package fingerprints.
///
/// Every package referenced by a formula is registered in the
/// per-transaction encoding database so the same atom reused across
/// clauses maps to the same variable, and so the SAT model can be
/// inverted back into packages. Formula-builder workers share the
/// encoder; writes serialize on the internal mutex. Ids follow
/// first-registration order, never hash iteration order.
pub struct Encoder {
    db: Arc<dyn PackageDatabase>,
    state: Mutex<EncoderState>,
}

#[derive(Default)]
struct EncoderState {
    ids: HashMap<String, Literal>,
    names: Vec<String>,
}

impl Encoder {
    pub fn new(db: Arc<dyn PackageDatabase>) -> Self {
        Encoder {
            db,
            state: Mutex::new(EncoderState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, EncoderState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a package and return its atom.
    pub fn encode(&self, p: &Package) -> Result<Literal> {
        let fingerprint = p.fingerprint();
        let mut state = self.state();
        if let Some(&id) = state.ids.get(&fingerprint) {
            return Ok(id);
        }

        self.db.create_package(p)?;
        let id = (state.names.len() + 1) as Literal;
        state.ids.insert(fingerprint.clone(), id);
        state.names.push(fingerprint);
        Ok(id)
    }

    /// Invert an atom back into the registered package.
    pub fn package_of(&self, atom: Literal) -> Result<Package> {
        let index = atom.unsigned_abs() as usize;
        let name = {
            let state = self.state();
            state
                .names
                .get(index.wrapping_sub(1))
                .cloned()
                .ok_or_else(|| CinderError::NotFound(format!("no atom with id {atom}")))?
        };
        self.db.get_package(&name)
    }

    pub fn len(&self) -> usize {
        self.state().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Package {
    /// Emit the clauses describing this package's constraints.
    ///
    /// With A as this package's atom:
    /// - at most one version of (category, name) may be selected:
    ///   `¬A ∨ ¬Y` for every sibling version Y in the definitions;
    /// - each requirement R: `¬A ∨ R` when R resolves to a single
    ///   concrete package, otherwise an at-least-one clause over every
    ///   matching version (ordered best-first) plus pairwise
    ///   at-most-one clauses;
    /// - each conflict C: `¬A ∨ ¬Cᵢ` for every matching version.
    ///
    /// Requirement references resolve through the definition database,
    /// so a provided name lands on its provider atom and the provided
    /// name itself never becomes an atom.
    pub fn build_formula(
        &self,
        definition_db: &dyn PackageDatabase,
        encoder: &Encoder,
    ) -> Result<Vec<Clause>> {
        let a = encoder.encode(self)?;
        let mut clauses: Vec<Clause> = Vec::new();

        if let Ok(versions) = definition_db.find_package_versions(self) {
            for sibling in versions.iter() {
                if sibling.version == self.version {
                    continue;
                }
                let y = encoder.encode(sibling)?;
                clauses.push(vec![-a, -y]);
            }
        }

        for req in &self.requires {
            if !req.is_selector() {
                if let Ok(required) = definition_db.find_package(req) {
                    let b = encoder.encode(&required)?;
                    clauses.push(vec![-a, b]);
                    continue;
                }
            }

            let matching = expand(definition_db, req)?;
            if matching.is_empty() {
                // Nothing in the definitions satisfies this; encode the
                // reference verbatim so the solver surfaces Unsolvable
                // rather than silently dropping the constraint.
                let b = encoder.encode(req)?;
                clauses.push(vec![-a, b]);
                continue;
            }

            let mut atoms = Vec::with_capacity(matching.len());
            for candidate in best_first(&matching) {
                atoms.push(encoder.encode(candidate)?);
            }

            let mut at_least_one = Vec::with_capacity(atoms.len() + 1);
            at_least_one.push(-a);
            at_least_one.extend(&atoms);
            clauses.push(at_least_one);

            for i in 0..atoms.len() {
                for j in (i + 1)..atoms.len() {
                    clauses.push(vec![-a, -atoms[i], -atoms[j]]);
                }
            }
        }

        for conflict in &self.conflicts {
            if !conflict.is_selector() {
                if let Ok(found) = definition_db.find_package(conflict) {
                    let c = encoder.encode(&found)?;
                    clauses.push(vec![-a, -c]);
                    continue;
                }
            }

            for candidate in expand(definition_db, conflict)?.iter() {
                let c = encoder.encode(candidate)?;
                clauses.push(vec![-a, -c]);
            }
        }

        Ok(clauses)
    }
}

/// Expand a selector reference to every matching definition. A missing
/// package is an empty expansion, not an error; a malformed selector
/// still propagates.
fn expand(definition_db: &dyn PackageDatabase, reference: &Package) -> Result<Packages> {
    match definition_db.find_packages(reference) {
        Ok(matching) => Ok(matching),
        Err(CinderError::NotFound(_)) => Ok(Packages::new()),
        Err(e) => Err(e),
    }
}

/// Matching versions ordered highest-first, so the backend's branching
/// prefers the best version deterministically.
fn best_first(matching: &Packages) -> Vec<&Package> {
    let mut sorted: Vec<&Package> = matching.iter().collect();
    sorted.sort_by(|x, y| match (x.parsed_version(), y.parsed_version()) {
        (Ok(vx), Ok(vy)) => vy.cmp(&vx),
        _ => std::cmp::Ordering::Equal,
    });
    sorted
}
