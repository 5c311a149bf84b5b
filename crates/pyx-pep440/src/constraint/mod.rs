//! Version specifiers
//!
//! A [`Constraint`] is a single clause such as `>=1.4` or `==2.1.*`; a
//! [`MultiConstraint`] is the comma separated conjunction of clauses that
//! appears in requirement strings and Pipfile entries.

#[allow(clippy::module_inception)]
mod constraint;
mod multi;

pub use constraint::Constraint;
pub use multi::MultiConstraint;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::version::VersionError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("Invalid operator \"{operator}\", expected one of: {expected}")]
    InvalidOperator { operator: String, expected: String },
    #[error("Invalid version in constraint \"{clause}\": {source}")]
    InvalidVersion {
        clause: String,
        #[source]
        source: VersionError,
    },
    #[error("Invalid constraint \"{0}\"")]
    InvalidClause(String),
    #[error("Wildcards are only allowed with == and != in \"{0}\"")]
    WildcardNotAllowed(String),
    #[error("Compatible release clause \"{0}\" needs at least two release segments")]
    CompatibleTooShort(String),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Compatible,
    Arbitrary,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
            Operator::Compatible => "~=",
            Operator::Arbitrary => "===",
        }
    }

    pub fn supported_operators() -> Vec<&'static str> {
        vec!["==", "!=", "<", "<=", ">", ">=", "~=", "==="]
    }
}

impl FromStr for Operator {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Operator::Equal),
            "!=" => Ok(Operator::NotEqual),
            "<" => Ok(Operator::LessThan),
            "<=" => Ok(Operator::LessThanOrEqual),
            ">" => Ok(Operator::GreaterThan),
            ">=" => Ok(Operator::GreaterThanOrEqual),
            "~=" => Ok(Operator::Compatible),
            "===" => Ok(Operator::Arbitrary),
            other => Err(ConstraintError::InvalidOperator {
                operator: other.to_string(),
                expected: Operator::supported_operators().join(", "),
            }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
