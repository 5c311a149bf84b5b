//! Python packaging version primitives
//!
//! PEP 440 versions and specifiers, PEP 508 markers and requirement
//! strings, and PEP 503 name normalization.

pub mod constraint;
pub mod marker;
mod name;
mod requirement;
mod version;

pub use constraint::{Constraint, ConstraintError, MultiConstraint, Operator};
pub use marker::{
    MarkerEnvironment, MarkerError, MarkerExpression, MarkerOperator, MarkerTree, MarkerValue,
    MarkerVariable,
};
pub use name::{NameError, PackageName};
pub use requirement::{Requirement, RequirementError};
pub use version::{LocalSegment, PreKind, Version, VersionError};
