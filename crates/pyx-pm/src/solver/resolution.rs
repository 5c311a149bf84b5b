use std::collections::{BTreeMap, BTreeSet, VecDeque};

use pyx_pep440::{MarkerEnvironment, MarkerExpression, MarkerTree, PackageName, Version};

/// A dependency edge kept for diagnostics and upgrade locality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEdge {
    pub name: PackageName,
    /// Canonical constraint of the edge
    pub constraint: String,
    pub marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    pub name: PackageName,
    pub version: Version,
    pub hashes: BTreeSet<String>,
    pub source: String,
    /// Environments the package is needed in; `None` means all of them
    pub marker: Option<String>,
    pub dependencies: Vec<ResolvedEdge>,
}

/// Outcome of a successful solve: one package per selected name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    packages: BTreeMap<PackageName, ResolvedPackage>,
}

impl Resolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: ResolvedPackage) {
        self.packages.insert(package.name.clone(), package);
    }

    pub fn get(&self, name: &PackageName) -> Option<&ResolvedPackage> {
        self.packages.get(name)
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    /// Packages sorted by name
    pub fn packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

type Conjunction = BTreeSet<MarkerExpression>;

/// Environment predicates in disjunctive normal form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Dnf(BTreeSet<Conjunction>);

impl Dnf {
    pub fn always() -> Self {
        Dnf(BTreeSet::from([Conjunction::new()]))
    }

    pub fn from_marker(marker: Option<&MarkerTree>) -> Self {
        match marker {
            None => Self::always(),
            Some(tree) => Dnf(tree
                .to_dnf()
                .into_iter()
                .map(|c| c.into_iter().collect())
                .collect()),
        }
    }

    pub fn and(&self, other: &Dnf) -> Dnf {
        let mut out = BTreeSet::new();
        for left in &self.0 {
            for right in &other.0 {
                out.insert(left.union(right).cloned().collect());
            }
        }
        Dnf(out)
    }

    /// Holds in no environment
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Add every conjunction of `other`; true if anything changed
    pub fn absorb(&mut self, other: &Dnf) -> bool {
        let before = self.0.clone();
        self.0.extend(other.0.iter().cloned());
        self.simplify();
        self.0 != before
    }

    /// Drop conjunctions implied by a smaller one
    fn simplify(&mut self) {
        let all: Vec<Conjunction> = self.0.iter().cloned().collect();
        self.0.retain(|c| !all.iter().any(|other| other != c && other.is_subset(c)));
    }

    /// Drop conjunctions that hold in none of the environments
    pub fn restrict(&mut self, environments: &[MarkerEnvironment]) {
        if environments.is_empty() {
            return;
        }
        self.0.retain(|conjunction| {
            environments
                .iter()
                .any(|env| conjunction.iter().all(|e| e.evaluate(env)))
        });
    }

    /// Canonical rendering, `None` when unconditional
    pub fn render(&self) -> Option<String> {
        if self.0.iter().any(BTreeSet::is_empty) {
            return None;
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|conjunction| {
                let terms: Vec<String> = conjunction.iter().map(|e| e.to_string()).collect();
                if conjunction.len() > 1 && self.0.len() > 1 {
                    format!("({})", terms.join(" and "))
                } else {
                    terms.join(" and ")
                }
            })
            .collect();
        Some(parts.join(" or "))
    }
}

/// Compute each package's environment predicate: the disjunction, over
/// every path from a root, of the conjunction of edge markers on the path.
pub(crate) fn propagate_markers(
    roots: &[(PackageName, Dnf)],
    edges: &BTreeMap<PackageName, Vec<(PackageName, Dnf)>>,
    environments: &[MarkerEnvironment],
) -> BTreeMap<PackageName, Dnf> {
    let mut markers: BTreeMap<PackageName, Dnf> = BTreeMap::new();
    let mut queue = VecDeque::new();

    for (name, dnf) in roots {
        let entry = markers.entry(name.clone()).or_default();
        entry.absorb(dnf);
        queue.push_back(name.clone());
    }

    while let Some(parent) = queue.pop_front() {
        let Some(parent_dnf) = markers.get(&parent).cloned() else {
            continue;
        };
        for (child, edge) in edges.get(&parent).map(Vec::as_slice).unwrap_or(&[]) {
            let mut reach = parent_dnf.and(edge);
            reach.restrict(environments);
            let entry = markers.entry(child.clone()).or_default();
            if entry.absorb(&reach) && !queue.contains(child) {
                queue.push_back(child.clone());
            }
        }
    }
    markers
}
