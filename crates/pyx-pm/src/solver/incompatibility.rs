//! Incompatibilities: sets of terms that must never all hold together

use std::collections::{BTreeMap, HashMap};

use pyx_pep440::PackageName;

use super::term::Term;

pub type IncompatibilityId = usize;

/// Why an incompatibility is known
#[derive(Debug, Clone, PartialEq)]
pub enum Cause {
    /// A top-level requirement, identified by a human readable label
    Root { label: String },
    /// A pin carried over from another category's resolution
    Floor { label: String },
    /// A candidate's declared dependency
    Dependency { dependent: String, requirement: String },
    /// No candidate is left in a required range
    NoVersions,
    /// Learned during conflict resolution from two earlier incompatibilities
    Derived(IncompatibilityId, IncompatibilityId),
}

#[derive(Debug, Clone)]
pub struct Incompatibility {
    terms: BTreeMap<PackageName, Term>,
    cause: Cause,
}

impl Incompatibility {
    /// Build an incompatibility, intersecting terms on the same package and
    /// dropping terms that always hold
    pub fn new(terms: impl IntoIterator<Item = (PackageName, Term)>, cause: Cause) -> Self {
        let mut merged: BTreeMap<PackageName, Term> = BTreeMap::new();
        for (package, term) in terms {
            let combined = match merged.remove(&package) {
                Some(existing) => existing.intersection(&term),
                None => term,
            };
            merged.insert(package, combined);
        }
        merged.retain(|_, term| !term.is_any());
        Incompatibility {
            terms: merged,
            cause,
        }
    }

    pub fn terms(&self) -> &BTreeMap<PackageName, Term> {
        &self.terms
    }

    pub fn term(&self, package: &PackageName) -> Option<&Term> {
        self.terms.get(package)
    }

    pub fn cause(&self) -> &Cause {
        &self.cause
    }

    /// The empty incompatibility: no solution exists
    pub fn is_failure(&self) -> bool {
        self.terms.is_empty()
    }

    /// Contains a term that can never hold, so it can never be satisfied
    pub fn is_vacuous(&self) -> bool {
        self.terms.values().any(Term::is_empty)
    }
}

/// Owns every incompatibility of a solve and indexes them by package
#[derive(Debug, Default)]
pub(crate) struct IncompatibilityStore {
    all: Vec<Incompatibility>,
    by_package: HashMap<PackageName, Vec<IncompatibilityId>>,
}

impl IncompatibilityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an incompatibility without making it visible to propagation
    pub fn alloc(&mut self, incompatibility: Incompatibility) -> IncompatibilityId {
        self.all.push(incompatibility);
        self.all.len() - 1
    }

    /// Make a stored incompatibility visible to propagation
    pub fn index(&mut self, id: IncompatibilityId) {
        for package in self.all[id].terms.keys() {
            self.by_package.entry(package.clone()).or_default().push(id);
        }
    }

    pub fn add(&mut self, incompatibility: Incompatibility) -> IncompatibilityId {
        let id = self.alloc(incompatibility);
        self.index(id);
        id
    }

    pub fn get(&self, id: IncompatibilityId) -> &Incompatibility {
        &self.all[id]
    }

    pub fn for_package(&self, package: &PackageName) -> &[IncompatibilityId] {
        self.by_package.get(package).map(Vec::as_slice).unwrap_or(&[])
    }

    /// How many indexed incompatibilities mention a package
    pub fn references(&self, package: &PackageName) -> usize {
        self.for_package(package).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::term::VersionSet;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    #[test]
    fn test_merges_terms_on_same_package() {
        let incompat = Incompatibility::new(
            vec![
                (name("a"), Term::positive(VersionSet::from_indices(3, [0, 1]))),
                (name("a"), Term::positive(VersionSet::from_indices(3, [1, 2]))),
                (name("b"), Term::negative(VersionSet::singleton(2, 0))),
            ],
            Cause::NoVersions,
        );
        assert_eq!(incompat.terms().len(), 2);
        assert_eq!(
            incompat.term(&name("a")),
            Some(&Term::positive(VersionSet::singleton(3, 1)))
        );
    }

    #[test]
    fn test_drops_terms_that_always_hold() {
        let incompat = Incompatibility::new(
            vec![
                (name("a"), Term::positive(VersionSet::singleton(2, 0))),
                (name("b"), Term::any(0)),
            ],
            Cause::Dependency {
                dependent: "a==1.0".to_string(),
                requirement: "b>=9".to_string(),
            },
        );
        assert_eq!(incompat.terms().len(), 1);
        assert!(!incompat.is_failure());

        let root = Incompatibility::new(
            vec![(name("missing"), Term::negative(VersionSet::empty(0)))],
            Cause::Root {
                label: "missing".to_string(),
            },
        );
        assert!(root.is_failure());
    }

    #[test]
    fn test_store_indexes_only_on_request() {
        let mut store = IncompatibilityStore::new();
        let a = name("a");
        let id = store.alloc(Incompatibility::new(
            vec![(a.clone(), Term::positive(VersionSet::full(1)))],
            Cause::NoVersions,
        ));
        assert_eq!(store.references(&a), 0);
        store.index(id);
        assert_eq!(store.for_package(&a), &[id]);
    }
}
