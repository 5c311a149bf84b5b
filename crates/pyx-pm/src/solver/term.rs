//! Version sets and terms

use std::fmt;

/// A subset of one package's candidates, by candidate index.
///
/// Sets are always relative to a fixed universe (the number of candidates
/// the pool holds for that package), which makes complement exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSet {
    universe: usize,
    bits: Vec<u64>,
}

impl VersionSet {
    pub fn empty(universe: usize) -> Self {
        VersionSet {
            universe,
            bits: vec![0; universe.div_ceil(64)],
        }
    }

    pub fn full(universe: usize) -> Self {
        Self::empty(universe).complement()
    }

    pub fn singleton(universe: usize, index: usize) -> Self {
        Self::from_indices(universe, [index])
    }

    pub fn from_indices(universe: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut set = Self::empty(universe);
        for index in indices {
            if index < universe {
                set.bits[index / 64] |= 1 << (index % 64);
            }
        }
        set
    }

    pub fn universe(&self) -> usize {
        self.universe
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.universe && self.bits[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.universe
    }

    pub fn complement(&self) -> Self {
        let mut bits: Vec<u64> = self.bits.iter().map(|w| !w).collect();
        let tail = self.universe % 64;
        if tail != 0 {
            if let Some(last) = bits.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
        VersionSet {
            universe: self.universe,
            bits,
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a & b)
    }

    pub fn union(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a | b)
    }

    pub fn difference(&self, other: &Self) -> Self {
        self.zip(other, |a, b| a & !b)
    }

    fn zip(&self, other: &Self, op: impl Fn(u64, u64) -> u64) -> Self {
        debug_assert_eq!(self.universe, other.universe);
        VersionSet {
            universe: self.universe,
            bits: self
                .bits
                .iter()
                .zip(other.bits.iter())
                .map(|(a, b)| op(*a, *b))
                .collect(),
        }
    }

    /// Member indices, ascending
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.universe).filter(move |i| self.contains(*i))
    }
}

/// How the partial solution stands with respect to a term or incompatibility
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relation<P> {
    /// Every term holds
    Satisfied,
    /// At least one term can no longer hold
    Contradicted,
    /// All terms hold except this package's, which is still open
    AlmostSatisfied(P),
    Inconclusive,
}

/// A statement about one package: it is selected at a version in the set
/// (positive), or it is not selected at any version in the set (negative).
///
/// A negative term is also satisfied when the package is not selected at
/// all, which is what lets unrequired packages stay out of a solution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Term {
    positive: bool,
    set: VersionSet,
}

impl Term {
    pub fn positive(set: VersionSet) -> Self {
        Term { positive: true, set }
    }

    pub fn negative(set: VersionSet) -> Self {
        Term {
            positive: false,
            set,
        }
    }

    /// The term that holds no matter what: "not any of nothing"
    pub fn any(universe: usize) -> Self {
        Term::negative(VersionSet::empty(universe))
    }

    pub fn is_positive(&self) -> bool {
        self.positive
    }

    pub fn set(&self) -> &VersionSet {
        &self.set
    }

    /// Trivially true; such terms carry no information
    pub fn is_any(&self) -> bool {
        !self.positive && self.set.is_empty()
    }

    /// Can never hold
    pub fn is_empty(&self) -> bool {
        self.positive && self.set.is_empty()
    }

    pub fn negate(&self) -> Self {
        Term {
            positive: !self.positive,
            set: self.set.clone(),
        }
    }

    pub fn intersection(&self, other: &Term) -> Term {
        match (self.positive, other.positive) {
            (true, true) => Term::positive(self.set.intersection(&other.set)),
            (true, false) => Term::positive(self.set.difference(&other.set)),
            (false, true) => Term::positive(other.set.difference(&self.set)),
            (false, false) => Term::negative(self.set.union(&other.set)),
        }
    }

    /// Every assignment satisfying `self` also satisfies `other`
    pub fn is_subset_of(&self, other: &Term) -> bool {
        self.intersection(other) == *self
    }

    pub fn is_disjoint(&self, other: &Term) -> bool {
        self.intersection(other).is_empty()
    }

    /// Relation of a partial-solution term (`self`) to `other`
    pub fn relation(&self, other: &Term) -> Relation<()> {
        if self.is_subset_of(other) {
            Relation::Satisfied
        } else if self.is_disjoint(other) {
            Relation::Contradicted
        } else {
            Relation::Inconclusive
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let members: Vec<String> = self.set.iter().map(|i| i.to_string()).collect();
        write!(
            f,
            "{}{{{}}}",
            if self.positive { "" } else { "not " },
            members.join(",")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(universe: usize, indices: &[usize]) -> VersionSet {
        VersionSet::from_indices(universe, indices.iter().copied())
    }

    #[test]
    fn test_set_operations() {
        let a = set(70, &[0, 1, 65]);
        let b = set(70, &[1, 2, 65, 69]);
        assert_eq!(a.intersection(&b), set(70, &[1, 65]));
        assert_eq!(a.union(&b), set(70, &[0, 1, 2, 65, 69]));
        assert_eq!(a.difference(&b), set(70, &[0]));
        assert_eq!(a.complement().len(), 67);
        assert!(!a.complement().contains(65));
        assert!(!a.complement().contains(70));
        assert!(VersionSet::full(70).is_full());
        assert!(VersionSet::full(0).is_empty());
    }

    #[test]
    fn test_term_intersection_rules() {
        let s = set(4, &[0, 1, 2]);
        let t = set(4, &[1, 2, 3]);

        let pos_pos = Term::positive(s.clone()).intersection(&Term::positive(t.clone()));
        assert_eq!(pos_pos, Term::positive(set(4, &[1, 2])));

        let pos_neg = Term::positive(s.clone()).intersection(&Term::negative(t.clone()));
        assert_eq!(pos_neg, Term::positive(set(4, &[0])));

        let neg_pos = Term::negative(s.clone()).intersection(&Term::positive(t.clone()));
        assert_eq!(neg_pos, Term::positive(set(4, &[3])));

        let neg_neg = Term::negative(s).intersection(&Term::negative(t));
        assert_eq!(neg_neg, Term::negative(set(4, &[0, 1, 2, 3])));
    }

    #[test]
    fn test_subset_and_relation() {
        let exact = Term::positive(set(3, &[1]));
        let range = Term::positive(set(3, &[1, 2]));
        let not_zero = Term::negative(set(3, &[0]));

        assert!(exact.is_subset_of(&range));
        assert!(exact.is_subset_of(&not_zero));
        assert!(!range.is_subset_of(&exact));
        assert_eq!(exact.relation(&Term::negative(set(3, &[1]))), Relation::Contradicted);
        assert_eq!(range.relation(&exact), Relation::Inconclusive);

        let unconstrained = Term::any(3);
        assert!(unconstrained.is_any());
        assert!(!unconstrained.is_subset_of(&range));
        assert!(exact.is_subset_of(&unconstrained));
        assert_eq!(unconstrained.relation(&not_zero), Relation::Inconclusive);
    }
}
