//! PEP 508 dependency specifications (`requests[socks] >=2.0 ; python_version >= "3.8"`)

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use crate::constraint::{ConstraintError, MultiConstraint};
use crate::marker::{MarkerError, MarkerTree};
use crate::name::{NameError, PackageName};

lazy_static! {
    static ref REQUIREMENT_RE: Regex =
        Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([^\]]*)\])?\s*(.*?)\s*$").unwrap();
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequirementError {
    #[error("Invalid requirement \"{0}\"")]
    Invalid(String),
    #[error(transparent)]
    Name(#[from] NameError),
    #[error(transparent)]
    Constraint(#[from] ConstraintError),
    #[error(transparent)]
    Marker(#[from] MarkerError),
}

/// A dependency declaration as found in package metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: PackageName,
    pub extras: Vec<String>,
    pub constraint: MultiConstraint,
    /// Direct reference (`name @ https://...`)
    pub url: Option<String>,
    pub marker: Option<MarkerTree>,
}

impl Requirement {
    pub fn new(name: PackageName, constraint: MultiConstraint) -> Self {
        Requirement {
            name,
            extras: Vec::new(),
            constraint,
            url: None,
            marker: None,
        }
    }

    pub fn with_marker(mut self, marker: MarkerTree) -> Self {
        self.marker = Some(marker);
        self
    }
}

impl FromStr for Requirement {
    type Err = RequirementError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (body, marker) = match input.split_once(';') {
            Some((body, marker)) => (body, Some(marker.trim())),
            None => (input, None),
        };

        let caps = REQUIREMENT_RE
            .captures(body)
            .ok_or_else(|| RequirementError::Invalid(input.to_string()))?;

        let name = PackageName::new(&caps[1])?;
        let extras = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rest = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let (constraint, url) = if let Some(url) = rest.strip_prefix('@') {
            let url = url.trim();
            if url.is_empty() {
                return Err(RequirementError::Invalid(input.to_string()));
            }
            (MultiConstraint::any(), Some(url.to_string()))
        } else {
            let spec = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .unwrap_or(rest);
            (spec.parse::<MultiConstraint>()?, None)
        };

        let marker = match marker {
            Some(m) if !m.is_empty() => Some(m.parse::<MarkerTree>()?),
            _ => None,
        };

        Ok(Requirement {
            name,
            extras,
            constraint,
            url,
            marker,
        })
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.extras.is_empty() {
            write!(f, "[{}]", self.extras.join(","))?;
        }
        if let Some(url) = &self.url {
            write!(f, " @ {}", url)?;
        } else if !self.constraint.is_any() {
            write!(f, "{}", self.constraint)?;
        }
        if let Some(marker) = &self.marker {
            write!(f, " ; {}", marker)?;
        }
        Ok(())
    }
}
