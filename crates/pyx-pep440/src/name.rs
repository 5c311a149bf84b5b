//! PEP 503 package name normalization

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"(?i)^([a-z0-9]|[a-z0-9][a-z0-9._-]*[a-z0-9])$").unwrap();
    static ref SEPARATOR_RE: Regex = Regex::new(r"[-_.]+").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid package name \"{0}\"")]
pub struct NameError(pub String);

/// A normalized package name.
///
/// Lowercased, with every run of `-`, `_` and `.` folded into a single `-`,
/// so `Flask_SQLAlchemy` and `flask-sqlalchemy` are the same package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(raw: &str) -> Result<Self, NameError> {
        let trimmed = raw.trim();
        if !NAME_RE.is_match(trimmed) {
            return Err(NameError(raw.to_string()));
        }
        Ok(PackageName(
            SEPARATOR_RE.replace_all(&trimmed.to_ascii_lowercase(), "-").into_owned(),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageName {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageName::new(s)
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(PackageName::new("Flask_SQLAlchemy").unwrap().as_str(), "flask-sqlalchemy");
        assert_eq!(PackageName::new("zope.interface").unwrap().as_str(), "zope-interface");
        assert_eq!(PackageName::new("a-_.b").unwrap().as_str(), "a-b");
        assert_eq!(PackageName::new("Requests").unwrap(), PackageName::new("requests").unwrap());
    }

    #[test]
    fn test_invalid_names() {
        assert!(PackageName::new("").is_err());
        assert!(PackageName::new("-leading").is_err());
        assert!(PackageName::new("trailing.").is_err());
        assert!(PackageName::new("has space").is_err());
    }
}
