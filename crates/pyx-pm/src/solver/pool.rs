use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use pyx_pep440::{MultiConstraint, PackageName, Requirement, Version};

use super::term::VersionSet;
use crate::repository::Release;

/// One concrete version of a package that the solver may select
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: PackageName,
    pub version: Version,
    pub dependencies: Vec<Requirement>,
    pub hashes: BTreeSet<String>,
    /// Name of the source the candidate was fetched from
    pub source: String,
    pub requires_python: Option<MultiConstraint>,
}

impl Candidate {
    pub fn new(name: PackageName, version: Version, source: impl Into<String>) -> Self {
        Candidate {
            name,
            version,
            dependencies: Vec::new(),
            hashes: BTreeSet::new(),
            source: source.into(),
            requires_python: None,
        }
    }

    pub fn from_release(name: PackageName, release: Release, source: impl Into<String>) -> Self {
        Candidate {
            name,
            version: release.version,
            dependencies: release.dependencies,
            hashes: release.hashes,
            source: source.into(),
            requires_python: release.requires_python,
        }
    }
}

/// Every candidate known to a resolution, grouped by package.
///
/// Candidates of a package are kept sorted ascending by version; their
/// position in that list is the index used by [`VersionSet`].
#[derive(Debug, Clone, Default)]
pub struct Pool {
    packages: BTreeMap<PackageName, Vec<Arc<Candidate>>>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> PoolBuilder {
        PoolBuilder::new()
    }

    /// Add a candidate; a second candidate with an equal version is ignored
    pub fn add_candidate(&mut self, candidate: Candidate) {
        let list = self.packages.entry(candidate.name.clone()).or_default();
        match list.binary_search_by(|c| c.version.cmp(&candidate.version)) {
            Ok(_) => {
                log::debug!(
                    "Ignoring duplicate candidate {} {} from {}",
                    candidate.name,
                    candidate.version,
                    candidate.source
                );
            }
            Err(pos) => list.insert(pos, Arc::new(candidate)),
        }
    }

    /// Register a package name with no candidates
    pub fn add_empty(&mut self, name: PackageName) {
        self.packages.entry(name).or_default();
    }

    pub fn contains(&self, name: &PackageName) -> bool {
        self.packages.contains_key(name)
    }

    /// Number of candidates for a package
    pub fn universe(&self, name: &PackageName) -> usize {
        self.packages.get(name).map(Vec::len).unwrap_or(0)
    }

    pub fn candidates(&self, name: &PackageName) -> &[Arc<Candidate>] {
        self.packages.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn candidate(&self, name: &PackageName, index: usize) -> Option<&Arc<Candidate>> {
        self.packages.get(name).and_then(|list| list.get(index))
    }

    pub fn find(&self, name: &PackageName, version: &Version) -> Option<usize> {
        self.packages
            .get(name)
            .and_then(|list| list.binary_search_by(|c| c.version.cmp(version)).ok())
    }

    /// Candidates of `name` allowed by `constraint`
    pub fn matching(&self, name: &PackageName, constraint: &MultiConstraint) -> VersionSet {
        let candidates = self.candidates(name);
        VersionSet::from_indices(
            candidates.len(),
            candidates
                .iter()
                .enumerate()
                .filter(|(_, c)| constraint.matches(&c.version))
                .map(|(i, _)| i),
        )
    }

    pub fn package_names(&self) -> impl Iterator<Item = &PackageName> {
        self.packages.keys()
    }

    /// Total number of candidates
    pub fn len(&self) -> usize {
        self.packages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fluent construction of a pool, mostly for tests and fixtures
#[derive(Debug, Default)]
pub struct PoolBuilder {
    pool: Pool,
    source: String,
}

impl PoolBuilder {
    pub fn new() -> Self {
        PoolBuilder {
            pool: Pool::new(),
            source: "pypi".to_string(),
        }
    }

    /// Source name recorded on subsequently added candidates
    pub fn source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    /// Add `name==version` depending on PEP 508 requirement strings.
    ///
    /// # Panics
    ///
    /// On an invalid name, version or requirement.
    pub fn package(mut self, name: &str, version: &str, dependencies: &[&str]) -> Self {
        let name = PackageName::new(name).unwrap_or_else(|e| panic!("{}", e));
        let version: Version = version.parse().unwrap_or_else(|e| panic!("{}", e));
        let mut candidate = Candidate::new(name.clone(), version.clone(), self.source.clone());
        candidate.dependencies = dependencies
            .iter()
            .map(|d| d.parse::<Requirement>().unwrap_or_else(|e| panic!("{}", e)))
            .collect();
        candidate
            .hashes
            .insert(format!("sha256:{}", crate::util::sha256_hex(format!("{}=={}", name, version).as_bytes())));
        self.pool.add_candidate(candidate);
        self
    }

    pub fn candidate(mut self, candidate: Candidate) -> Self {
        self.pool.add_candidate(candidate);
        self
    }

    pub fn build(self) -> Pool {
        self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    #[test]
    fn test_candidates_sorted_by_version() {
        let pool = PoolBuilder::new()
            .package("a", "2.0", &[])
            .package("a", "1.0", &[])
            .package("a", "1.10", &[])
            .package("a", "1.2", &[])
            .build();

        let versions: Vec<String> = pool
            .candidates(&name("a"))
            .iter()
            .map(|c| c.version.to_string())
            .collect();
        assert_eq!(versions, vec!["1.0", "1.2", "1.10", "2.0"]);
        assert_eq!(pool.find(&name("a"), &"1.10".parse().unwrap()), Some(2));
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_duplicate_version_keeps_first() {
        let pool = PoolBuilder::new()
            .package("a", "1.0", &["b"])
            .source("other")
            .package("a", "1.0.0", &[])
            .build();
        let candidates = pool.candidates(&name("a"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].source, "pypi");
    }

    #[test]
    fn test_matching() {
        let pool = PoolBuilder::new()
            .package("a", "1.0", &[])
            .package("a", "1.5", &[])
            .package("a", "2.0", &[])
            .build();
        let set = pool.matching(&name("a"), &">=1.5".parse().unwrap());
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2]);

        let unknown = pool.matching(&name("zzz"), &MultiConstraint::any());
        assert!(unknown.is_empty());
    }
}
