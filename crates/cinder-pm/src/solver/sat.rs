use std::collections::BTreeMap;

use super::formula::{Formula, Literal};

/// A truth assignment for every atom referenced by a formula, keyed by
/// atom id.
pub type Model = BTreeMap<Literal, bool>;

/// Tracks assignments made during solving.
///
/// The flat map stores 0 for undecided and ±(level + 1) otherwise, the
/// sign carrying the assigned polarity. The trail records assignment
/// order for backtracking.
#[derive(Debug, Default)]
struct Decisions {
    map: Vec<i32>,
    trail: Vec<TrailEntry>,
    level: u32,
}

#[derive(Debug, Clone, Copy)]
struct TrailEntry {
    literal: Literal,
    is_decision: bool,
    flipped: bool,
}

impl Decisions {
    fn new(num_vars: usize) -> Self {
        Decisions {
            map: vec![0; num_vars + 1],
            trail: Vec::with_capacity(num_vars),
            level: 0,
        }
    }

    fn value(&self, var: Literal) -> Option<bool> {
        match self.map[var as usize] {
            0 => None,
            v => Some(v > 0),
        }
    }

    /// Truth value of a literal under the current assignment.
    fn literal_value(&self, literal: Literal) -> Option<bool> {
        self.value(literal.abs())
            .map(|assigned| assigned == (literal > 0))
    }

    fn assign(&mut self, literal: Literal, is_decision: bool, flipped: bool) {
        if is_decision {
            self.level += 1;
        }
        let level_value = (self.level + 1) as i32;
        self.map[literal.unsigned_abs() as usize] =
            if literal > 0 { level_value } else { -level_value };
        self.trail.push(TrailEntry {
            literal,
            is_decision,
            flipped,
        });
    }

    /// Undo assignments up to the most recent un-flipped decision and
    /// assert its negation. Returns false when the search space is
    /// exhausted.
    fn backtrack(&mut self) -> bool {
        while let Some(entry) = self.trail.pop() {
            self.map[entry.literal.unsigned_abs() as usize] = 0;
            if entry.is_decision {
                self.level -= 1;
                if !entry.flipped {
                    self.assign(-entry.literal, true, true);
                    return true;
                }
            }
        }
        false
    }
}

enum Propagation {
    Stable,
    Conflict,
}

/// Solve a CNF formula.
///
/// Iterative DPLL: exhaustive unit propagation, then a branch on the
/// first unassigned literal of the first unsatisfied clause, asserted
/// with its own polarity. Clause disjunctions arrive best-version-first
/// from the encoder, so that branching rule is what makes decoded
/// models deterministic and version-preferring. Conflicts backtrack
/// chronologically, flipping the most recent untried decision.
///
/// Returns `None` when no assignment satisfies the formula. Atoms
/// referenced by the formula but never forced are reported `false`: an
/// unconstrained package is not selected.
pub fn solve(formula: &Formula) -> Option<Model> {
    let num_vars = formula
        .clauses
        .iter()
        .flatten()
        .map(|l| l.unsigned_abs() as usize)
        .max()
        .unwrap_or(0);

    let mut decisions = Decisions::new(num_vars);

    loop {
        match propagate(formula, &mut decisions) {
            Propagation::Conflict => {
                if !decisions.backtrack() {
                    return None;
                }
            }
            Propagation::Stable => match pick_branch(formula, &decisions) {
                Some(literal) => decisions.assign(literal, true, false),
                None => break,
            },
        }
    }

    let mut model = Model::new();
    for clause in &formula.clauses {
        for literal in clause {
            let var = literal.abs();
            model
                .entry(var)
                .or_insert_with(|| decisions.value(var).unwrap_or(false));
        }
    }
    Some(model)
}

/// Run unit propagation to a fixpoint.
fn propagate(formula: &Formula, decisions: &mut Decisions) -> Propagation {
    loop {
        let mut changed = false;

        for clause in &formula.clauses {
            let mut satisfied = false;
            let mut unassigned: Option<Literal> = None;
            let mut unassigned_count = 0;

            for &literal in clause {
                match decisions.literal_value(literal) {
                    Some(true) => {
                        satisfied = true;
                        break;
                    }
                    Some(false) => {}
                    None => {
                        unassigned_count += 1;
                        if unassigned.is_none() {
                            unassigned = Some(literal);
                        }
                    }
                }
            }

            if satisfied {
                continue;
            }
            match unassigned_count {
                0 => return Propagation::Conflict,
                1 => {
                    decisions.assign(unassigned.unwrap_or_default(), false, false);
                    changed = true;
                }
                _ => {}
            }
        }

        if !changed {
            return Propagation::Stable;
        }
    }
}

/// The first unassigned literal of the first clause not yet satisfied.
/// After a stable propagation every fully-assigned clause holds a true
/// literal, so `None` means the formula is satisfied.
fn pick_branch(formula: &Formula, decisions: &Decisions) -> Option<Literal> {
    for clause in &formula.clauses {
        if clause
            .iter()
            .any(|&l| decisions.literal_value(l) == Some(true))
        {
            continue;
        }
        for &literal in clause {
            if decisions.literal_value(literal).is_none() {
                return Some(literal);
            }
        }
    }
    None
}
