//! Conjunction of version clauses

use std::fmt;
use std::str::FromStr;

use super::{Constraint, ConstraintError};
use crate::version::Version;

/// A comma separated set of clauses that must all hold (`>=1.4,<2.0`).
///
/// The empty set (written `*` or `""`) matches every version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MultiConstraint {
    clauses: Vec<Constraint>,
}

impl MultiConstraint {
    /// Matches any version
    pub fn any() -> Self {
        MultiConstraint { clauses: Vec::new() }
    }

    pub fn from_clauses(clauses: Vec<Constraint>) -> Self {
        MultiConstraint { clauses }
    }

    /// `==version`
    pub fn exact(version: Version) -> Self {
        MultiConstraint {
            clauses: vec![Constraint::exact(version)],
        }
    }

    pub fn clauses(&self) -> &[Constraint] {
        &self.clauses
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    pub fn mentions_prerelease(&self) -> bool {
        self.clauses.iter().any(Constraint::mentions_prerelease)
    }

    /// Both sets of clauses at once
    pub fn and(&self, other: &MultiConstraint) -> MultiConstraint {
        let mut clauses = self.clauses.clone();
        for clause in &other.clauses {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        MultiConstraint { clauses }
    }

    /// Order-independent rendering: clauses normalized, deduplicated and
    /// sorted.
    ///
    /// Two constraints that differ only in clause order, spacing or
    /// insignificant zeros (`>=1.0` and `>=1.0.0`) render identically.
    pub fn canonical(&self) -> String {
        if self.clauses.is_empty() {
            return "*".to_string();
        }
        let mut rendered: Vec<String> = self.clauses.iter().map(Constraint::canonical).collect();
        rendered.sort();
        rendered.dedup();
        rendered.join(",")
    }
}

impl FromStr for MultiConstraint {
    type Err = ConstraintError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(MultiConstraint::any());
        }

        let mut clauses = Vec::new();
        for part in trimmed.split(',') {
            if part.trim().is_empty() {
                return Err(ConstraintError::InvalidClause(trimmed.to_string()));
            }
            clauses.push(part.parse::<Constraint>()?);
        }
        Ok(MultiConstraint { clauses })
    }
}

impl fmt::Display for MultiConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("*");
        }
        let rendered: Vec<String> = self.clauses.iter().map(|c| c.to_string()).collect();
        f.write_str(&rendered.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_any() {
        for raw in ["*", "", "  "] {
            let constraint: MultiConstraint = raw.parse().unwrap();
            assert!(constraint.is_any());
            assert!(constraint.matches(&v("0.0.1")));
            assert_eq!(constraint.to_string(), "*");
        }
    }

    #[test]
    fn test_conjunction() {
        let constraint: MultiConstraint = ">=1.4, <2.0".parse().unwrap();
        assert!(constraint.matches(&v("1.4")));
        assert!(constraint.matches(&v("1.99")));
        assert!(!constraint.matches(&v("2.0")));
        assert!(!constraint.matches(&v("1.3")));
        assert_eq!(constraint.to_string(), ">=1.4,<2.0");
    }

    #[test]
    fn test_canonical_is_order_independent() {
        let a: MultiConstraint = "<2.0,>=1.4".parse().unwrap();
        let b: MultiConstraint = ">= 1.4 , < 2.0, <2.0".parse().unwrap();
        assert_eq!(a.canonical(), b.canonical());
        assert_eq!(a.canonical(), "<2,>=1.4");

        let c: MultiConstraint = ">=1.4.0,<2.0.0,<2".parse().unwrap();
        assert_eq!(a.canonical(), c.canonical());
    }

    #[test]
    fn test_empty_clause_rejected() {
        assert!(">=1.0,".parse::<MultiConstraint>().is_err());
        assert!(",<2".parse::<MultiConstraint>().is_err());
    }

    #[test]
    fn test_round_trip_through_display() {
        let constraint: MultiConstraint = "~=1.4.2,!=1.4.5".parse().unwrap();
        let again: MultiConstraint = constraint.to_string().parse().unwrap();
        assert_eq!(constraint, again);
    }

    #[test]
    fn test_and_merges_clauses() {
        let a: MultiConstraint = ">=1.0".parse().unwrap();
        let b: MultiConstraint = "<2.0,>=1.0".parse().unwrap();
        assert_eq!(a.and(&b).to_string(), ">=1.0,<2.0");
    }
}
