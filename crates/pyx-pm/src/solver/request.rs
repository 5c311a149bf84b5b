use pyx_pep440::{MarkerTree, MultiConstraint, PackageName, Version};

use crate::error::{Error, Result};

/// A top-level requirement of a solve
#[derive(Debug, Clone, PartialEq)]
pub struct RootRequirement {
    pub name: PackageName,
    pub constraint: MultiConstraint,
    pub marker: Option<MarkerTree>,
    /// Shown in conflict explanations
    pub label: String,
}

/// A package that, if selected, must be at exactly this version
#[derive(Debug, Clone, PartialEq)]
pub struct FloorPin {
    pub name: PackageName,
    pub version: Version,
    pub label: String,
}

impl FloorPin {
    /// How the pin is named in conflict explanations
    pub fn conflict_label(&self) -> String {
        format!("{}=={} ({})", self.name, self.version, self.label)
    }
}

/// What to solve for.
///
/// Floor pins carry another category's resolution into this one: they
/// never pull a package in, but constrain it when something else does.
#[derive(Debug, Clone, Default)]
pub struct Request {
    requirements: Vec<RootRequirement>,
    pins: Vec<FloorPin>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a package by name and constraint string
    pub fn require(&mut self, name: &str, constraint: &str) -> Result<&mut Self> {
        let package = PackageName::new(name).map_err(|e| Error::malformed(e.to_string()))?;
        let constraint: MultiConstraint = constraint
            .parse()
            .map_err(|e| Error::malformed(format!("{}: {}", name, e)))?;
        let label = root_label(&package, &constraint);
        self.requirements.push(RootRequirement {
            name: package,
            constraint,
            marker: None,
            label,
        });
        Ok(self)
    }

    pub fn add_requirement(&mut self, requirement: RootRequirement) -> &mut Self {
        self.requirements.push(requirement);
        self
    }

    pub fn pin(&mut self, name: PackageName, version: Version, label: impl Into<String>) -> &mut Self {
        self.pins.push(FloorPin {
            name,
            version,
            label: label.into(),
        });
        self
    }

    pub fn requirements(&self) -> &[RootRequirement] {
        &self.requirements
    }

    pub fn pins(&self) -> &[FloorPin] {
        &self.pins
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// The requirements and pins named in `labels`, everything else dropped
    pub fn retain_labels(&self, labels: &[String]) -> Request {
        let named = |label: &String| labels.contains(label);
        Request {
            requirements: self
                .requirements
                .iter()
                .filter(|r| named(&r.label))
                .cloned()
                .collect(),
            pins: self
                .pins
                .iter()
                .filter(|p| named(&p.conflict_label()))
                .cloned()
                .collect(),
        }
    }
}

/// `name constraint` as a user would write it
pub fn root_label(name: &PackageName, constraint: &MultiConstraint) -> String {
    if constraint.is_any() {
        name.to_string()
    } else {
        format!("{}{}", name, constraint)
    }
}
