//! Single version clause implementation

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

use super::{ConstraintError, Operator};
use crate::version::{compare_release, Version};

lazy_static! {
    static ref CLAUSE_RE: Regex =
        Regex::new(r"^\s*(===|~=|==|!=|<=|>=|<|>)?\s*([^\s,;]+)\s*$").unwrap();
}

/// A single version clause (e.g. `>=1.0`, `==1.4.*`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Constraint {
    operator: Operator,
    version: Version,
    wildcard: bool,
    /// Verbatim operand of an `===` clause
    arbitrary: Option<String>,
}

impl Constraint {
    /// Create a new clause without a wildcard.
    ///
    /// A `~=` clause needs at least two release segments.
    pub fn new(operator: Operator, version: Version) -> Result<Self, ConstraintError> {
        if operator == Operator::Compatible && version.release().len() < 2 {
            return Err(ConstraintError::CompatibleTooShort(format!("~={}", version)));
        }
        Ok(Constraint {
            operator,
            version,
            wildcard: false,
            arbitrary: None,
        })
    }

    /// `==version`
    pub fn exact(version: Version) -> Self {
        Constraint {
            operator: Operator::Equal,
            version,
            wildcard: false,
            arbitrary: None,
        }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn is_wildcard(&self) -> bool {
        self.wildcard
    }

    /// Whether this clause names a pre-release, which opts the package into
    /// pre-release candidates
    pub fn mentions_prerelease(&self) -> bool {
        self.arbitrary.is_none() && self.version.is_prerelease()
    }

    /// Check whether a version satisfies this clause
    pub fn matches(&self, candidate: &Version) -> bool {
        let target = &self.version;
        match self.operator {
            Operator::Arbitrary => self
                .arbitrary
                .as_deref()
                .map(|raw| raw.eq_ignore_ascii_case(&candidate.to_string()))
                .unwrap_or(false),
            Operator::Equal => self.equals(candidate),
            Operator::NotEqual => !self.equals(candidate),
            Operator::Compatible => {
                let release = target.release();
                let prefix = &release[..release.len().saturating_sub(1)];
                candidate.without_local() >= *target && prefix_matches(candidate, target.epoch(), prefix)
            }
            Operator::LessThanOrEqual => candidate.without_local() <= *target,
            Operator::GreaterThanOrEqual => candidate.without_local() >= *target,
            Operator::LessThan => {
                let candidate = candidate.without_local();
                candidate < *target
                    && !(!target.is_prerelease()
                        && candidate.is_prerelease()
                        && candidate.base() == target.base())
            }
            Operator::GreaterThan => {
                *candidate > *target
                    && !(!target.is_postrelease()
                        && candidate.is_postrelease()
                        && candidate.base() == target.base())
                    && !(candidate.is_local() && candidate.without_local() == *target)
            }
        }
    }

    fn equals(&self, candidate: &Version) -> bool {
        let target = &self.version;
        if self.wildcard {
            return prefix_matches(candidate, target.epoch(), target.release());
        }
        if target.is_local() {
            candidate == target
        } else {
            candidate.without_local() == *target
        }
    }
}

/// Release-segment prefix match used by `==X.Y.*` and `~=`
fn prefix_matches(candidate: &Version, epoch: u64, prefix: &[u64]) -> bool {
    if candidate.epoch() != epoch {
        return false;
    }
    let mut head: Vec<u64> = candidate.release().iter().copied().take(prefix.len()).collect();
    head.resize(prefix.len(), 0);
    compare_release(&head, prefix).is_eq()
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(clause: &str) -> Result<Self, Self::Err> {
        let caps = CLAUSE_RE
            .captures(clause)
            .ok_or_else(|| ConstraintError::InvalidClause(clause.trim().to_string()))?;

        let operator = match caps.get(1) {
            Some(op) => op.as_str().parse::<Operator>()?,
            None => Operator::Equal,
        };
        let operand = &caps[2];

        if operator == Operator::Arbitrary {
            return Ok(Constraint {
                operator,
                version: operand.parse().unwrap_or_else(|_| Version::new(vec![0])),
                wildcard: false,
                arbitrary: Some(operand.to_string()),
            });
        }

        let (operand, wildcard) = match operand.strip_suffix(".*") {
            Some(stripped) => (stripped, true),
            None => (operand, false),
        };
        if wildcard && !matches!(operator, Operator::Equal | Operator::NotEqual) {
            return Err(ConstraintError::WildcardNotAllowed(clause.trim().to_string()));
        }

        let version = operand
            .parse::<Version>()
            .map_err(|source| ConstraintError::InvalidVersion {
                clause: clause.trim().to_string(),
                source,
            })?;

        if operator == Operator::Compatible && version.release().len() < 2 {
            return Err(ConstraintError::CompatibleTooShort(clause.trim().to_string()));
        }

        Ok(Constraint {
            operator,
            version,
            wildcard,
            arbitrary: None,
        })
    }
}

impl Constraint {
    /// Rendering shared by every equivalent spelling of the clause:
    /// trailing zero release segments are dropped except where they are
    /// significant (`~=` and `.*` prefixes, `===` operands).
    pub fn canonical(&self) -> String {
        if self.arbitrary.is_some() || self.wildcard || self.operator == Operator::Compatible {
            return self.to_string();
        }
        format!("{}{}", self.operator, self.version.trimmed())
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(raw) = &self.arbitrary {
            return write!(f, "==={}", raw);
        }
        write!(f, "{}{}", self.operator, self.version)?;
        if self.wildcard {
            f.write_str(".*")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> Constraint {
        s.parse().unwrap()
    }

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_equality_ignores_candidate_local() {
        assert!(c("==1.0").matches(&v("1.0")));
        assert!(c("==1.0").matches(&v("1.0.0")));
        assert!(c("==1.0").matches(&v("1.0+cpu")));
        assert!(!c("==1.0+gpu").matches(&v("1.0+cpu")));
        assert!(!c("==1.0").matches(&v("1.0.1")));
    }

    #[test]
    fn test_bare_version_means_equal() {
        let clause = c("2.3");
        assert_eq!(clause.operator(), Operator::Equal);
        assert_eq!(clause.to_string(), "==2.3");
    }

    #[test]
    fn test_wildcard() {
        let clause = c("==1.4.*");
        assert!(clause.matches(&v("1.4")));
        assert!(clause.matches(&v("1.4.9")));
        assert!(clause.matches(&v("1.4rc1")));
        assert!(!clause.matches(&v("1.5")));
        assert!(c("!=1.4.*").matches(&v("1.5.0")));
        assert!(matches!(
            ">=1.4.*".parse::<Constraint>(),
            Err(ConstraintError::WildcardNotAllowed(_))
        ));
    }

    #[test]
    fn test_compatible_release() {
        let clause = c("~=2.2");
        assert!(clause.matches(&v("2.2")));
        assert!(clause.matches(&v("2.9.1")));
        assert!(!clause.matches(&v("3.0")));
        assert!(!clause.matches(&v("2.1")));

        let clause = c("~=1.4.5");
        assert!(clause.matches(&v("1.4.7")));
        assert!(!clause.matches(&v("1.5.0")));

        assert!(matches!(
            "~=1".parse::<Constraint>(),
            Err(ConstraintError::CompatibleTooShort(_))
        ));
    }

    #[test]
    fn test_exclusive_ordering_excludes_pre_and_post_of_target() {
        assert!(c("<2.0").matches(&v("1.9")));
        assert!(!c("<2.0").matches(&v("2.0rc1")));
        assert!(c("<2.0rc2").matches(&v("2.0rc1")));

        assert!(c(">1.0").matches(&v("1.1")));
        assert!(!c(">1.0").matches(&v("1.0.post1")));
        assert!(!c(">1.0").matches(&v("1.0+local")));
        assert!(c(">1.0.post1").matches(&v("1.0.post2")));
    }

    #[test]
    fn test_inclusive_ordering() {
        assert!(c(">=1.0").matches(&v("1.0")));
        assert!(c(">=1.0").matches(&v("1.0+local")));
        assert!(c("<=1.0").matches(&v("1.0+local")));
        assert!(!c("<=1.0").matches(&v("1.0.1")));
    }

    #[test]
    fn test_canonical_drops_insignificant_zeros() {
        assert_eq!(c(">=1.0.0").canonical(), c(">=1.0").canonical());
        assert_eq!(c("==1.0.0").canonical(), "==1");
        assert_eq!(c("<2.0+cpu").canonical(), "<2+cpu");
        assert_eq!(c("==1.0.*").canonical(), "==1.0.*");
        assert_eq!(c("~=1.4.0").canonical(), "~=1.4.0");
        assert_ne!(c("~=1.4.0").canonical(), c("~=1.4").canonical());
        assert_eq!(c("===1.0.0").canonical(), "===1.0.0");
    }

    #[test]
    fn test_new_rejects_short_compatible_release() {
        assert!(matches!(
            Constraint::new(Operator::Compatible, Version::new(vec![1u64])),
            Err(ConstraintError::CompatibleTooShort(_))
        ));
        let clause = Constraint::new(Operator::Compatible, Version::new(vec![1u64, 4])).unwrap();
        assert!(clause.matches(&v("1.9")));
        assert!(!clause.matches(&v("2.0")));
    }

    #[test]
    fn test_arbitrary_equality() {
        let clause = c("===1.0-custom");
        assert_eq!(clause.to_string(), "===1.0-custom");
        assert!(!clause.matches(&v("1.0")));
    }

    #[test]
    fn test_invalid_clauses() {
        assert!("=>1.0".parse::<Constraint>().is_err());
        assert!(">=".parse::<Constraint>().is_err());
        assert!(">=banana".parse::<Constraint>().is_err());
    }

    #[test]
    fn test_mentions_prerelease() {
        assert!(c(">=2.0b1").mentions_prerelease());
        assert!(!c(">=2.0").mentions_prerelease());
    }
}
