use std::collections::{BTreeMap, BTreeSet};

use pyx_pep440::{PackageName, Version};

use super::pool::Pool;

/// Orders the candidates of a package the solver may pick from.
///
/// Implementations only reorder or filter: whatever they return must be a
/// subset of `candidates`, and an empty result for a non-empty input means
/// "pick nothing" to the solver.
pub trait VersionPreference {
    /// Candidate indices sorted best first. `allow_prereleases` is set when
    /// the request itself opted this package into pre-releases.
    fn select_preferred(
        &self,
        pool: &Pool,
        package: &PackageName,
        candidates: &[usize],
        allow_prereleases: bool,
    ) -> Vec<usize>;

    fn select_best(
        &self,
        pool: &Pool,
        package: &PackageName,
        candidates: &[usize],
        allow_prereleases: bool,
    ) -> Option<usize> {
        self.select_preferred(pool, package, candidates, allow_prereleases)
            .into_iter()
            .next()
    }
}

/// Default version preference: newest stable release first.
///
/// Pre-releases are only offered when opted in globally, per package, or
/// when nothing else is left in range. Preferred versions (usually the ones
/// in an existing lock) win over newer candidates while they stay in range.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Prefer lowest versions (for testing)
    pub prefer_lowest: bool,
    pub allow_prereleases: bool,
    pub prerelease_packages: BTreeSet<PackageName>,
    pub preferred: BTreeMap<PackageName, Version>,
}

impl Policy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefer_lowest(mut self, prefer: bool) -> Self {
        self.prefer_lowest = prefer;
        self
    }

    pub fn allow_prereleases(mut self, allow: bool) -> Self {
        self.allow_prereleases = allow;
        self
    }

    /// Allow pre-releases of a single package
    pub fn allow_prerelease_of(mut self, package: PackageName) -> Self {
        self.prerelease_packages.insert(package);
        self
    }

    /// Soft preference for a specific version
    pub fn prefer(mut self, package: PackageName, version: Version) -> Self {
        self.preferred.insert(package, version);
        self
    }
}

impl VersionPreference for Policy {
    fn select_preferred(
        &self,
        pool: &Pool,
        package: &PackageName,
        candidates: &[usize],
        allow_prereleases: bool,
    ) -> Vec<usize> {
        let version = |index: usize| pool.candidate(package, index).map(|c| &c.version);

        let mut sorted: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|i| version(*i).is_some())
            .collect();

        let prereleases_allowed = allow_prereleases
            || self.allow_prereleases
            || self.prerelease_packages.contains(package);
        if !prereleases_allowed {
            let stable: Vec<usize> = sorted
                .iter()
                .copied()
                .filter(|i| version(*i).is_some_and(|v| !v.is_prerelease()))
                .collect();
            if !stable.is_empty() {
                sorted = stable;
            }
        }

        sorted.sort_by(|a, b| {
            let ordering = version(*a).cmp(&version(*b));
            if self.prefer_lowest {
                ordering
            } else {
                ordering.reverse()
            }
        });

        if let Some(preferred) = self.preferred.get(package) {
            if let Some(position) = sorted.iter().position(|i| version(*i) == Some(preferred)) {
                let index = sorted.remove(position);
                sorted.insert(0, index);
            }
        }

        sorted
    }
}
