//! PEP 508 environment markers
//!
//! Markers are parsed into a [`MarkerTree`] and evaluated against a
//! [`MarkerEnvironment`]; nothing is ever executed.

mod environment;
mod parser;

pub use environment::MarkerEnvironment;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::constraint::{Constraint, Operator};
use crate::version::Version;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerError {
    #[error("Unknown marker variable \"{0}\"")]
    UnknownVariable(String),
    #[error("Unexpected {found} at position {position} in marker \"{marker}\"")]
    Unexpected {
        marker: String,
        found: String,
        position: usize,
    },
    #[error("Unterminated string in marker \"{0}\"")]
    UnterminatedString(String),
    #[error("Unexpected end of marker \"{0}\"")]
    UnexpectedEnd(String),
}

/// Variables a marker may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerVariable {
    OsName,
    SysPlatform,
    PlatformSystem,
    PlatformMachine,
    PlatformPythonImplementation,
    ImplementationName,
    ImplementationVersion,
    PlatformRelease,
    PlatformVersion,
    PythonVersion,
    PythonFullVersion,
    Extra,
}

impl MarkerVariable {
    pub fn parse(name: &str) -> Option<Self> {
        let variable = match name {
            "os_name" | "os.name" => MarkerVariable::OsName,
            "sys_platform" | "sys.platform" => MarkerVariable::SysPlatform,
            "platform_system" => MarkerVariable::PlatformSystem,
            "platform_machine" | "platform.machine" => MarkerVariable::PlatformMachine,
            "platform_python_implementation" | "platform.python_implementation" => {
                MarkerVariable::PlatformPythonImplementation
            }
            "implementation_name" => MarkerVariable::ImplementationName,
            "implementation_version" => MarkerVariable::ImplementationVersion,
            "platform_release" => MarkerVariable::PlatformRelease,
            "platform_version" | "platform.version" => MarkerVariable::PlatformVersion,
            "python_version" => MarkerVariable::PythonVersion,
            "python_full_version" => MarkerVariable::PythonFullVersion,
            "extra" => MarkerVariable::Extra,
            _ => return None,
        };
        Some(variable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerVariable::OsName => "os_name",
            MarkerVariable::SysPlatform => "sys_platform",
            MarkerVariable::PlatformSystem => "platform_system",
            MarkerVariable::PlatformMachine => "platform_machine",
            MarkerVariable::PlatformPythonImplementation => "platform_python_implementation",
            MarkerVariable::ImplementationName => "implementation_name",
            MarkerVariable::ImplementationVersion => "implementation_version",
            MarkerVariable::PlatformRelease => "platform_release",
            MarkerVariable::PlatformVersion => "platform_version",
            MarkerVariable::PythonVersion => "python_version",
            MarkerVariable::PythonFullVersion => "python_full_version",
            MarkerVariable::Extra => "extra",
        }
    }

    /// Variables compared with version semantics
    pub fn is_version(&self) -> bool {
        matches!(
            self,
            MarkerVariable::PythonVersion
                | MarkerVariable::PythonFullVersion
                | MarkerVariable::ImplementationVersion
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerValue {
    Variable(MarkerVariable),
    Literal(String),
}

impl MarkerValue {
    fn resolve<'a>(&'a self, env: &'a MarkerEnvironment) -> &'a str {
        match self {
            MarkerValue::Variable(variable) => env.get(*variable),
            MarkerValue::Literal(value) => value,
        }
    }

    fn is_version_variable(&self) -> bool {
        matches!(self, MarkerValue::Variable(v) if v.is_version())
    }
}

impl fmt::Display for MarkerValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerValue::Variable(variable) => f.write_str(variable.as_str()),
            MarkerValue::Literal(value) if value.contains('\'') => write!(f, "\"{}\"", value),
            MarkerValue::Literal(value) => write!(f, "'{}'", value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MarkerOperator {
    Version(Operator),
    In,
    NotIn,
}

impl MarkerOperator {
    /// The operator seen from the other side (`a < b` is `b > a`)
    fn flipped(&self) -> Option<MarkerOperator> {
        let flipped = match self {
            MarkerOperator::Version(Operator::LessThan) => Operator::GreaterThan,
            MarkerOperator::Version(Operator::LessThanOrEqual) => Operator::GreaterThanOrEqual,
            MarkerOperator::Version(Operator::GreaterThan) => Operator::LessThan,
            MarkerOperator::Version(Operator::GreaterThanOrEqual) => Operator::LessThanOrEqual,
            MarkerOperator::Version(op @ (Operator::Equal | Operator::NotEqual)) => *op,
            _ => return None,
        };
        Some(MarkerOperator::Version(flipped))
    }
}

impl fmt::Display for MarkerOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerOperator::Version(op) => f.write_str(op.as_str()),
            MarkerOperator::In => f.write_str("in"),
            MarkerOperator::NotIn => f.write_str("not in"),
        }
    }
}

/// A single comparison such as `sys_platform == 'win32'`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MarkerExpression {
    pub lhs: MarkerValue,
    pub operator: MarkerOperator,
    pub rhs: MarkerValue,
}

impl MarkerExpression {
    pub fn new(lhs: MarkerValue, operator: MarkerOperator, rhs: MarkerValue) -> Self {
        MarkerExpression { lhs, operator, rhs }
    }

    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        let lhs = self.lhs.resolve(env);
        let rhs = self.rhs.resolve(env);

        match self.operator {
            MarkerOperator::In => return rhs.contains(lhs),
            MarkerOperator::NotIn => return !rhs.contains(lhs),
            MarkerOperator::Version(_) => {}
        }

        if self.lhs.is_version_variable() {
            if let Some(result) = compare_versions(lhs, self.operator, rhs) {
                return result;
            }
        } else if self.rhs.is_version_variable() {
            if let Some(result) = self
                .operator
                .flipped()
                .and_then(|op| compare_versions(rhs, op, lhs))
            {
                return result;
            }
        }

        compare_strings(lhs, self.operator, rhs)
    }
}

/// Version comparison of `value <op> operand`, `None` when either side is
/// not a version
fn compare_versions(value: &str, operator: MarkerOperator, operand: &str) -> Option<bool> {
    let MarkerOperator::Version(op) = operator else {
        return None;
    };
    let value = value.parse::<Version>().ok()?;
    let clause = format!("{}{}", op.as_str(), operand).parse::<Constraint>().ok()?;
    Some(clause.matches(&value))
}

fn compare_strings(lhs: &str, operator: MarkerOperator, rhs: &str) -> bool {
    match operator {
        MarkerOperator::Version(Operator::Equal)
        | MarkerOperator::Version(Operator::Arbitrary)
        | MarkerOperator::Version(Operator::Compatible) => lhs == rhs,
        MarkerOperator::Version(Operator::NotEqual) => lhs != rhs,
        MarkerOperator::Version(Operator::LessThan) => lhs < rhs,
        MarkerOperator::Version(Operator::LessThanOrEqual) => lhs <= rhs,
        MarkerOperator::Version(Operator::GreaterThan) => lhs > rhs,
        MarkerOperator::Version(Operator::GreaterThanOrEqual) => lhs >= rhs,
        MarkerOperator::In => rhs.contains(lhs),
        MarkerOperator::NotIn => !rhs.contains(lhs),
    }
}

impl fmt::Display for MarkerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.operator, self.rhs)
    }
}

/// Boolean combination of marker expressions.
///
/// Built through [`MarkerTree::and`] / [`MarkerTree::or`] (or the parser),
/// nested nodes of the same kind are always flattened so the rendered form
/// parses back to an identical tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MarkerTree {
    Expression(MarkerExpression),
    And(Vec<MarkerTree>),
    Or(Vec<MarkerTree>),
}

impl MarkerTree {
    pub fn and(children: Vec<MarkerTree>) -> MarkerTree {
        let mut flat = Vec::new();
        for child in children {
            match child {
                MarkerTree::And(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(MarkerTree::And(Vec::new()))
        } else {
            MarkerTree::And(flat)
        }
    }

    pub fn or(children: Vec<MarkerTree>) -> MarkerTree {
        let mut flat = Vec::new();
        for child in children {
            match child {
                MarkerTree::Or(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            flat.pop().unwrap_or(MarkerTree::Or(Vec::new()))
        } else {
            MarkerTree::Or(flat)
        }
    }

    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        match self {
            MarkerTree::Expression(expression) => expression.evaluate(env),
            MarkerTree::And(children) => children.iter().all(|c| c.evaluate(env)),
            MarkerTree::Or(children) => children.iter().any(|c| c.evaluate(env)),
        }
    }

    /// True if the marker holds in at least one of the environments
    pub fn evaluate_any(&self, envs: &[MarkerEnvironment]) -> bool {
        envs.iter().any(|env| self.evaluate(env))
    }

    /// Disjunctive normal form: an OR of AND-ed expressions
    pub fn to_dnf(&self) -> Vec<Vec<MarkerExpression>> {
        match self {
            MarkerTree::Expression(expression) => vec![vec![expression.clone()]],
            MarkerTree::Or(children) => children.iter().flat_map(|c| c.to_dnf()).collect(),
            MarkerTree::And(children) => {
                let mut product: Vec<Vec<MarkerExpression>> = vec![Vec::new()];
                for child in children {
                    let child_dnf = child.to_dnf();
                    let mut next = Vec::with_capacity(product.len() * child_dnf.len());
                    for left in &product {
                        for right in &child_dnf {
                            let mut conjunction = left.clone();
                            conjunction.extend(right.iter().cloned());
                            next.push(conjunction);
                        }
                    }
                    product = next;
                }
                product
            }
        }
    }
}

impl FromStr for MarkerTree {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse(s)
    }
}

impl fmt::Display for MarkerTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkerTree::Expression(expression) => write!(f, "{}", expression),
            MarkerTree::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" and ")?;
                    }
                    match child {
                        MarkerTree::Or(_) => write!(f, "({})", child)?,
                        _ => write!(f, "{}", child)?,
                    }
                }
                Ok(())
            }
            MarkerTree::Or(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" or ")?;
                    }
                    write!(f, "{}", child)?;
                }
                Ok(())
            }
        }
    }
}
