//! The partial solution: an ordered stack of assignments

use std::collections::BTreeMap;

use pyx_pep440::PackageName;

use super::incompatibility::{Incompatibility, IncompatibilityId};
use super::term::{Relation, Term, VersionSet};

/// One entry on the decision stack
#[derive(Debug, Clone)]
pub struct Assignment {
    pub package: PackageName,
    pub term: Term,
    pub level: usize,
    /// `None` for decisions, otherwise the incompatibility that forced it
    pub cause: Option<IncompatibilityId>,
}

impl Assignment {
    pub fn is_decision(&self) -> bool {
        self.cause.is_none()
    }
}

/// Tracks decisions and derivations made while solving.
///
/// Level 0 holds everything derived from the root requirements; every
/// decision opens a new level.
#[derive(Debug, Clone, Default)]
pub struct Decisions {
    assignments: Vec<Assignment>,
    /// Intersection of every assignment per package
    terms: BTreeMap<PackageName, Term>,
    /// Decided candidate index per package
    decided: BTreeMap<PackageName, usize>,
    level: usize,
}

impl Decisions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current decision level
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn assignments(&self) -> &[Assignment] {
        &self.assignments
    }

    /// Select a candidate, opening a new decision level
    pub fn decide(&mut self, package: PackageName, index: usize, universe: usize) {
        self.level += 1;
        self.decided.insert(package.clone(), index);
        self.push(Assignment {
            package,
            term: Term::positive(VersionSet::singleton(universe, index)),
            level: self.level,
            cause: None,
        });
    }

    /// Record a term forced by an incompatibility
    pub fn derive(&mut self, package: PackageName, term: Term, cause: IncompatibilityId) {
        self.push(Assignment {
            package,
            term,
            level: self.level,
            cause: Some(cause),
        });
    }

    fn push(&mut self, assignment: Assignment) {
        let combined = match self.terms.remove(&assignment.package) {
            Some(existing) => existing.intersection(&assignment.term),
            None => assignment.term.clone(),
        };
        self.terms.insert(assignment.package.clone(), combined);
        self.assignments.push(assignment);
    }

    /// Drop every assignment made above `level`
    pub fn revert_to_level(&mut self, level: usize) {
        self.assignments.retain(|a| a.level <= level);
        self.level = level;

        self.terms.clear();
        self.decided.clear();
        for assignment in &self.assignments {
            let combined = match self.terms.remove(&assignment.package) {
                Some(existing) => existing.intersection(&assignment.term),
                None => assignment.term.clone(),
            };
            self.terms.insert(assignment.package.clone(), combined);
            if assignment.is_decision() {
                if let Some(index) = assignment.term.set().iter().next() {
                    self.decided.insert(assignment.package.clone(), index);
                }
            }
        }
    }

    /// Accumulated term for a package, if it was ever assigned
    pub fn term(&self, package: &PackageName) -> Option<&Term> {
        self.terms.get(package)
    }

    pub fn decided(&self, package: &PackageName) -> Option<usize> {
        self.decided.get(package).copied()
    }

    pub fn decisions(&self) -> &BTreeMap<PackageName, usize> {
        &self.decided
    }

    /// Packages that must be selected but have no decision yet
    pub fn undecided(&self) -> Vec<(&PackageName, &Term)> {
        self.terms
            .iter()
            .filter(|(package, term)| term.is_positive() && !self.decided.contains_key(*package))
            .collect()
    }

    fn relation_of(&self, package: &PackageName, term: &Term) -> Relation<()> {
        match self.terms.get(package) {
            Some(assigned) => assigned.relation(term),
            None => Term::any(term.set().universe()).relation(term),
        }
    }

    /// Whether the solution already implies `term`
    pub fn satisfies(&self, package: &PackageName, term: &Term) -> bool {
        self.relation_of(package, term) == Relation::Satisfied
    }

    /// How the partial solution stands against an incompatibility
    pub fn relation(&self, incompatibility: &Incompatibility) -> Relation<PackageName> {
        let mut unsatisfied = None;
        for (package, term) in incompatibility.terms() {
            match self.relation_of(package, term) {
                Relation::Satisfied => {}
                Relation::Contradicted => return Relation::Contradicted,
                _ => {
                    if unsatisfied.is_some() {
                        return Relation::Inconclusive;
                    }
                    unsatisfied = Some(package.clone());
                }
            }
        }
        match unsatisfied {
            Some(package) => Relation::AlmostSatisfied(package),
            None => Relation::Satisfied,
        }
    }

    /// Position of the earliest assignment after which `term` is implied
    pub fn satisfier(&self, package: &PackageName, term: &Term) -> Option<usize> {
        let mut accumulated = Term::any(term.set().universe());
        for (position, assignment) in self.assignments.iter().enumerate() {
            if assignment.package != *package {
                continue;
            }
            accumulated = accumulated.intersection(&assignment.term);
            if accumulated.is_subset_of(term) {
                return Some(position);
            }
        }
        None
    }

    pub fn assignment(&self, position: usize) -> &Assignment {
        &self.assignments[position]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::incompatibility::Cause;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn set(universe: usize, indices: &[usize]) -> VersionSet {
        VersionSet::from_indices(universe, indices.iter().copied())
    }

    #[test]
    fn test_decide_and_revert() {
        let mut decisions = Decisions::new();
        decisions.derive(name("a"), Term::positive(set(3, &[1, 2])), 0);
        assert_eq!(decisions.level(), 0);
        assert_eq!(decisions.undecided().len(), 1);

        decisions.decide(name("a"), 2, 3);
        assert_eq!(decisions.level(), 1);
        assert_eq!(decisions.decided(&name("a")), Some(2));
        assert!(decisions.undecided().is_empty());

        decisions.derive(name("b"), Term::positive(set(2, &[0])), 1);
        decisions.decide(name("b"), 0, 2);
        assert_eq!(decisions.level(), 2);

        decisions.revert_to_level(0);
        assert_eq!(decisions.level(), 0);
        assert_eq!(decisions.decided(&name("a")), None);
        assert!(decisions.term(&name("b")).is_none());
        assert_eq!(
            decisions.term(&name("a")),
            Some(&Term::positive(set(3, &[1, 2])))
        );
    }

    #[test]
    fn test_relation() {
        let mut decisions = Decisions::new();
        decisions.derive(name("a"), Term::positive(set(2, &[1])), 0);

        let almost = Incompatibility::new(
            vec![
                (name("a"), Term::positive(set(2, &[1]))),
                (name("b"), Term::negative(set(3, &[0]))),
            ],
            Cause::NoVersions,
        );
        assert_eq!(decisions.relation(&almost), Relation::AlmostSatisfied(name("b")));

        let contradicted = Incompatibility::new(
            vec![(name("a"), Term::positive(set(2, &[0])))],
            Cause::NoVersions,
        );
        assert_eq!(decisions.relation(&contradicted), Relation::Contradicted);

        decisions.derive(name("b"), Term::positive(set(3, &[1, 2])), 0);
        assert_eq!(decisions.relation(&almost), Relation::Satisfied);
    }

    #[test]
    fn test_satisfier_is_earliest_implying_assignment() {
        let mut decisions = Decisions::new();
        decisions.derive(name("a"), Term::negative(set(3, &[0])), 0);
        decisions.derive(name("b"), Term::positive(set(1, &[0])), 0);
        decisions.derive(name("a"), Term::positive(set(3, &[1, 2])), 0);
        decisions.decide(name("a"), 1, 3);

        let term = Term::positive(set(3, &[1, 2]));
        assert_eq!(decisions.satisfier(&name("a"), &term), Some(2));
        let exact = Term::positive(set(3, &[1]));
        assert_eq!(decisions.satisfier(&name("a"), &exact), Some(3));
        assert_eq!(decisions.assignment(3).level, 1);
    }
}
