use std::collections::{BTreeSet, HashMap};
use std::fmt;

use pyx_pep440::PackageName;

use super::incompatibility::{Cause, IncompatibilityId, IncompatibilityStore};
use super::pool::Pool;
use super::term::Term;

/// No selection of versions satisfies the request.
///
/// `conflicting` names the root requirements (and pins) that take part in
/// the derivation of the failure; `explanation` walks that derivation one
/// numbered step at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiableError {
    pub conflicting: Vec<String>,
    pub explanation: String,
}

impl fmt::Display for UnsatisfiableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Could not find a version that satisfies: {}",
            self.conflicting.join(", ")
        )?;
        write!(f, "{}", self.explanation)
    }
}

impl std::error::Error for UnsatisfiableError {}

impl UnsatisfiableError {
    /// Explain why `failure`, an incompatibility in `store`, was derived
    pub(crate) fn explain(store: &IncompatibilityStore, pool: &Pool, failure: IncompatibilityId) -> Self {
        let mut report = Report {
            store,
            pool,
            lines: Vec::new(),
            numbers: HashMap::new(),
            roots: BTreeSet::new(),
        };
        report.visit(failure);
        if report.lines.is_empty() {
            // the failure is itself an external fact
            let reason = report.reason(failure);
            report.lines.push(format!("1. {}, so version solving failed.", capitalize(&reason)));
        }

        UnsatisfiableError {
            conflicting: report.roots.into_iter().collect(),
            explanation: report.lines.join("\n"),
        }
    }
}

struct Report<'a> {
    store: &'a IncompatibilityStore,
    pool: &'a Pool,
    lines: Vec<String>,
    numbers: HashMap<IncompatibilityId, usize>,
    roots: BTreeSet<String>,
}

impl Report<'_> {
    /// Number every derived incompatibility, children first
    fn visit(&mut self, id: IncompatibilityId) {
        if self.numbers.contains_key(&id) {
            return;
        }
        match self.store.get(id).cause().clone() {
            Cause::Derived(left, right) => {
                self.visit(left);
                self.visit(right);
                let line = format!(
                    "Because {} and {}, {}.",
                    self.reason(left),
                    self.reason(right),
                    self.statement(id)
                );
                self.lines.push(format!("{}. {}", self.lines.len() + 1, line));
                self.numbers.insert(id, self.lines.len());
            }
            Cause::Root { label } | Cause::Floor { label } => {
                self.roots.insert(label);
            }
            Cause::Dependency { .. } | Cause::NoVersions => {}
        }
    }

    /// How an incompatibility is referred to from a later line
    fn reason(&self, id: IncompatibilityId) -> String {
        let incompatibility = self.store.get(id);
        match incompatibility.cause() {
            Cause::Root { label } => {
                if incompatibility.is_failure() {
                    format!("no release matches {}", label)
                } else {
                    format!("the project requires {}", label)
                }
            }
            Cause::Floor { label } => format!("{} is already locked", label),
            Cause::Dependency {
                dependent,
                requirement,
            } => format!("{} depends on {}", dependent, requirement),
            Cause::NoVersions => self.statement(id),
            Cause::Derived(..) => match self.numbers.get(&id) {
                Some(number) => format!("{} ({})", self.statement(id), number),
                None => self.statement(id),
            },
        }
    }

    /// What an incompatibility says, in words
    fn statement(&self, id: IncompatibilityId) -> String {
        let incompatibility = self.store.get(id);
        let terms: Vec<(&PackageName, &Term)> = incompatibility.terms().iter().collect();
        match terms.as_slice() {
            [] => "version solving failed".to_string(),
            [(package, term)] if term.is_positive() => {
                if matches!(incompatibility.cause(), Cause::NoVersions) {
                    format!("no usable version of {} exists", self.describe(package, term))
                } else {
                    format!("{} is forbidden", self.describe(package, term))
                }
            }
            [(package, term)] => {
                format!("{} is required", self.describe(package, &term.negate()))
            }
            [(a, ta), (b, tb)] if ta.is_positive() != tb.is_positive() => {
                let ((dependent, positive), (dependency, negative)) = if ta.is_positive() {
                    ((a, ta), (b, tb))
                } else {
                    ((b, tb), (a, ta))
                };
                format!(
                    "{} requires {}",
                    self.describe(dependent, positive),
                    self.describe(dependency, &negative.negate())
                )
            }
            _ => {
                let parts: Vec<String> = terms
                    .iter()
                    .map(|(package, term)| {
                        if term.is_positive() {
                            self.describe(package, term)
                        } else {
                            format!("not {}", self.describe(package, &term.negate()))
                        }
                    })
                    .collect();
                format!("{} are incompatible", parts.join(" and "))
            }
        }
    }

    /// A positive term as a version list
    fn describe(&self, package: &PackageName, term: &Term) -> String {
        let set = term.set();
        if set.is_full() {
            return package.to_string();
        }
        let versions: Vec<String> = set
            .iter()
            .filter_map(|i| self.pool.candidate(package, i))
            .map(|c| c.version.to_string())
            .collect();
        match versions.as_slice() {
            [] => format!("{} (no versions)", package),
            [version] => format!("{}=={}", package, version),
            _ => format!("{} ({})", package, versions.join(" | ")),
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
