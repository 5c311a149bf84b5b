use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pyx_pep440::{MarkerEnvironment, PackageName, Requirement};
use thiserror::Error;

use super::decisions::Decisions;
use super::incompatibility::{Cause, Incompatibility, IncompatibilityId, IncompatibilityStore};
use super::policy::VersionPreference;
use super::pool::{Candidate, Pool};
use super::problem::UnsatisfiableError;
use super::request::{root_label, FloorPin, Request, RootRequirement};
use super::resolution::{propagate_markers, Dnf, Resolution, ResolvedEdge, ResolvedPackage};
use super::term::{Relation, Term, VersionSet};
use crate::config::DEFAULT_PYTHON_VERSION;

/// Shared flag a caller sets to abort a running resolution
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error(transparent)]
    Unsatisfiable(#[from] UnsatisfiableError),
    #[error("Resolution was cancelled")]
    Cancelled,
}

impl From<SolverError> for crate::Error {
    fn from(err: SolverError) -> Self {
        match err {
            SolverError::Unsatisfiable(err) => crate::Error::Unsatisfiable(err),
            SolverError::Cancelled => crate::Error::Cancelled,
        }
    }
}

/// Resolves a [`Request`] against a [`Pool`].
///
/// The solver is synchronous and never touches the network: everything it
/// may select must already be in the pool.
pub struct Solver<'a> {
    pool: &'a Pool,
    policy: &'a dyn VersionPreference,
    environments: Vec<MarkerEnvironment>,
    cancel: Option<CancelFlag>,
}

impl<'a> Solver<'a> {
    /// Create a solver targeting every supported platform
    pub fn new(pool: &'a Pool, policy: &'a dyn VersionPreference) -> Self {
        Solver {
            pool,
            policy,
            environments: MarkerEnvironment::all_platforms(DEFAULT_PYTHON_VERSION),
            cancel: None,
        }
    }

    /// Environments markers are evaluated against
    pub fn environments(mut self, environments: Vec<MarkerEnvironment>) -> Self {
        self.environments = environments;
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Solve `request`.
    ///
    /// On failure the reported conflict is shrunk until dropping any one
    /// of the requirements it names leaves the others solvable.
    pub fn solve(&self, request: &Request) -> Result<Resolution, SolverError> {
        match self.solve_once(request) {
            Err(SolverError::Unsatisfiable(err)) => Err(self.minimize(request, err).into()),
            other => other,
        }
    }

    fn solve_once(&self, request: &Request) -> Result<Resolution, SolverError> {
        let mut state = SolveState {
            solver: self,
            store: IncompatibilityStore::new(),
            decisions: Decisions::new(),
            expanded: HashMap::new(),
            prereleases: BTreeSet::new(),
            roots: Vec::new(),
        };
        state.run(request)
    }

    /// Drop every requirement of the conflict that is not needed for it.
    ///
    /// The derivation may lean on requirements it never names (one that
    /// only widened where a package is reached), so the named set is
    /// checked first and the whole request is shrunk when it is solvable.
    fn minimize(&self, request: &Request, first: UnsatisfiableError) -> UnsatisfiableError {
        let mut core = first.conflicting.clone();
        let mut conflict = first;
        match self.solve_once(&request.retain_labels(&core)) {
            Err(SolverError::Unsatisfiable(err)) => conflict = err,
            Err(SolverError::Cancelled) => return conflict,
            Ok(_) => {
                let mut all: Vec<String> = request.requirements().iter().map(|r| r.label.clone()).collect();
                all.extend(request.pins().iter().map(FloorPin::conflict_label));
                all.sort();
                all.dedup();
                core = all;
            }
        }

        for label in core.clone() {
            if self.is_cancelled() {
                break;
            }
            let rest: Vec<String> = core.iter().filter(|l| **l != label).cloned().collect();
            if let Err(SolverError::Unsatisfiable(err)) = self.solve_once(&request.retain_labels(&rest)) {
                log::debug!("{} is not needed for the conflict", label);
                core = rest;
                conflict = err;
            }
        }
        conflict.conflicting = core;
        conflict
    }

    fn applies(&self, requirement: &Requirement) -> bool {
        requirement
            .marker
            .as_ref()
            .map(|m| m.evaluate_any(&self.environments))
            .unwrap_or(true)
    }

    /// Dependencies of a candidate that take part in resolution, with their
    /// position in the candidate's list
    fn active_dependencies<'c>(&self, candidate: &'c Candidate) -> Vec<(usize, &'c Requirement)> {
        candidate
            .dependencies
            .iter()
            .enumerate()
            .filter(|(_, dep)| {
                if dep.url.is_some() {
                    log::debug!("Skipping direct reference {} of {}", dep, candidate.name);
                    return false;
                }
                dep.name != candidate.name && self.applies(dep)
            })
            .collect()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

struct SolveState<'s, 'a> {
    solver: &'s Solver<'a>,
    store: IncompatibilityStore,
    decisions: Decisions,
    /// Dependencies already added per candidate, by position
    expanded: HashMap<(PackageName, usize), BTreeSet<usize>>,
    /// Packages whose root constraint names a pre-release
    prereleases: BTreeSet<PackageName>,
    roots: Vec<RootRequirement>,
}

impl SolveState<'_, '_> {
    fn run(&mut self, request: &Request) -> Result<Resolution, SolverError> {
        let pool = self.solver.pool;
        let mut changed = BTreeSet::new();

        for root in request.requirements() {
            let applies = root
                .marker
                .as_ref()
                .map(|m| m.evaluate_any(&self.solver.environments))
                .unwrap_or(true);
            if !applies {
                log::debug!("Skipping {}: marker excludes every target environment", root.label);
                continue;
            }
            if root.constraint.mentions_prerelease() {
                self.prereleases.insert(root.name.clone());
            }

            let allowed = pool.matching(&root.name, &root.constraint);
            let incompatibility = Incompatibility::new(
                [(root.name.clone(), Term::negative(allowed))],
                Cause::Root {
                    label: root.label.clone(),
                },
            );
            let failure = incompatibility.is_failure();
            let id = self.store.add(incompatibility);
            if failure {
                return Err(UnsatisfiableError::explain(&self.store, pool, id).into());
            }
            changed.insert(root.name.clone());
            self.roots.push(root.clone());
        }

        for pin in request.pins() {
            if !pool.contains(&pin.name) {
                continue;
            }
            let universe = pool.universe(&pin.name);
            let mut excluded = VersionSet::full(universe);
            if let Some(index) = pool.find(&pin.name, &pin.version) {
                excluded = excluded.difference(&VersionSet::singleton(universe, index));
            }
            let incompatibility = Incompatibility::new(
                [(pin.name.clone(), Term::positive(excluded))],
                Cause::Floor {
                    label: pin.conflict_label(),
                },
            );
            if incompatibility.is_vacuous() {
                continue;
            }
            self.store.add(incompatibility);
            changed.insert(pin.name.clone());
        }

        self.propagate(changed)?;

        while let Some(package) = self.choose_package() {
            if self.solver.is_cancelled() {
                return Err(SolverError::Cancelled);
            }
            self.decide(package)?;
        }

        Ok(self.build_resolution())
    }

    /// Unit propagation from a set of packages whose terms changed
    fn propagate(&mut self, mut changed: BTreeSet<PackageName>) -> Result<(), SolverError> {
        while let Some(package) = changed.pop_first() {
            let ids: Vec<IncompatibilityId> = self.store.for_package(&package).iter().rev().copied().collect();
            for id in ids {
                match self.decisions.relation(self.store.get(id)) {
                    Relation::Satisfied => {
                        let learned = self.resolve_conflict(id)?;
                        changed.clear();
                        if let Some(derived) = self.propagate_incompatibility(learned) {
                            changed.insert(derived);
                        }
                        break;
                    }
                    Relation::AlmostSatisfied(_) => {
                        if let Some(derived) = self.propagate_incompatibility(id) {
                            changed.insert(derived);
                        }
                    }
                    Relation::Contradicted | Relation::Inconclusive => {}
                }
            }
        }
        Ok(())
    }

    /// Derive the negation of the one open term of an almost satisfied
    /// incompatibility
    fn propagate_incompatibility(&mut self, id: IncompatibilityId) -> Option<PackageName> {
        let incompatibility = self.store.get(id);
        let Relation::AlmostSatisfied(package) = self.decisions.relation(incompatibility) else {
            return None;
        };
        let term = incompatibility.term(&package)?.negate();
        self.decisions.derive(package.clone(), term, id);
        Some(package)
    }

    /// Learn from a satisfied incompatibility and backjump.
    ///
    /// Returns the incompatibility to propagate after backjumping.
    fn resolve_conflict(&mut self, conflict: IncompatibilityId) -> Result<IncompatibilityId, SolverError> {
        log::debug!("Conflict: {:?}", self.store.get(conflict).terms().keys().collect::<Vec<_>>());
        let mut current = conflict;
        let mut learned = false;

        while !self.store.get(current).is_failure() {
            let incompatibility = self.store.get(current).clone();

            let mut most_recent: Option<(usize, PackageName)> = None;
            let mut difference: Option<Term> = None;
            let mut previous_level = 0;

            for (package, term) in incompatibility.terms() {
                // every term of a satisfied incompatibility has a satisfier
                let Some(position) = self.decisions.satisfier(package, term) else {
                    continue;
                };

                match most_recent {
                    Some((latest, _)) if latest > position => {
                        previous_level = previous_level.max(self.decisions.assignment(position).level);
                        continue;
                    }
                    Some((latest, _)) => {
                        previous_level = previous_level.max(self.decisions.assignment(latest).level);
                    }
                    None => {}
                }
                most_recent = Some((position, package.clone()));

                let satisfier = self.decisions.assignment(position);
                let remainder = satisfier.term.intersection(&term.negate());
                difference = if remainder.is_empty() {
                    None
                } else {
                    if let Some(p) = self.decisions.satisfier(package, &remainder.negate()) {
                        previous_level = previous_level.max(self.decisions.assignment(p).level);
                    }
                    Some(remainder)
                };
            }

            let Some((position, package)) = most_recent else {
                break;
            };
            let satisfier = self.decisions.assignment(position).clone();

            let cause = match satisfier.cause {
                Some(cause) if previous_level >= satisfier.level => cause,
                _ => {
                    self.decisions.revert_to_level(previous_level);
                    if learned {
                        self.store.index(current);
                    }
                    log::debug!("Backjumping to level {}", previous_level);
                    return Ok(current);
                }
            };

            let mut terms: Vec<(PackageName, Term)> = incompatibility
                .terms()
                .iter()
                .filter(|(p, _)| **p != package)
                .map(|(p, t)| (p.clone(), t.clone()))
                .collect();
            terms.extend(
                self.store
                    .get(cause)
                    .terms()
                    .iter()
                    .filter(|(p, _)| **p != package)
                    .map(|(p, t)| (p.clone(), t.clone())),
            );
            if let Some(difference) = difference {
                terms.push((package, difference.negate()));
            }

            current = self
                .store
                .alloc(Incompatibility::new(terms, Cause::Derived(current, cause)));
            learned = true;
        }

        Err(UnsatisfiableError::explain(&self.store, self.solver.pool, current).into())
    }

    /// The undecided required package referenced by the most
    /// incompatibilities, ties broken by name
    fn choose_package(&self) -> Option<PackageName> {
        self.decisions
            .undecided()
            .into_iter()
            .max_by_key(|(package, _)| (self.store.references(package), Reverse(*package)))
            .map(|(package, _)| package.clone())
    }

    fn decide(&mut self, package: PackageName) -> Result<(), SolverError> {
        let pool = self.solver.pool;
        let Some(term) = self.decisions.term(&package).cloned() else {
            return Ok(());
        };
        let allowed: Vec<usize> = term.set().iter().collect();
        let allow_prereleases = self.prereleases.contains(&package);

        let Some(index) = self
            .solver
            .policy
            .select_best(pool, &package, &allowed, allow_prereleases)
        else {
            log::debug!("No usable version of {} left", package);
            self.store
                .add(Incompatibility::new([(package.clone(), term)], Cause::NoVersions));
            return self.propagate(BTreeSet::from([package]));
        };

        let universe = pool.universe(&package);
        let mut changed = BTreeSet::from([package.clone()]);
        if let Some(candidate) = pool.candidate(&package, index) {
            let reach = self.reach();
            let here = reach
                .get(&package)
                .filter(|dnf| !dnf.is_empty())
                .cloned()
                .unwrap_or_else(Dnf::always);
            let added = self.add_dependencies(&package, index, &here);
            let conflict = added.iter().any(|id| {
                self.store
                    .get(*id)
                    .terms()
                    .iter()
                    .all(|(p, t)| *p == package || self.decisions.satisfies(p, t))
            });
            if !conflict {
                log::debug!("Selecting {} {}", package, candidate.version);
                self.decisions.decide(package.clone(), index, universe);
                changed.extend(self.widen());
            }
        }

        self.propagate(changed)
    }

    /// Add the dependencies of `package` at candidate `index` that can be
    /// needed where the package is reached (`here`).
    ///
    /// A dependency whose marker contradicts every path to its parent is
    /// left out until a wider path shows up.
    fn add_dependencies(&mut self, package: &PackageName, index: usize, here: &Dnf) -> Vec<IncompatibilityId> {
        let solver = self.solver;
        let pool = solver.pool;
        let Some(candidate) = pool.candidate(package, index) else {
            return Vec::new();
        };
        let universe = pool.universe(package);
        let dependent = format!("{}=={}", package, candidate.version);

        let mut added = Vec::new();
        for (position, dependency) in solver.active_dependencies(candidate) {
            let key = (package.clone(), index);
            if self.expanded.get(&key).is_some_and(|done| done.contains(&position)) {
                continue;
            }
            let mut condition = here.and(&Dnf::from_marker(dependency.marker.as_ref()));
            condition.restrict(&solver.environments);
            if condition.is_empty() {
                log::trace!("{} does not need {} where it is reached", dependent, dependency);
                continue;
            }
            self.expanded.entry(key).or_default().insert(position);

            let allowed = pool.matching(&dependency.name, &dependency.constraint);
            let incompatibility = Incompatibility::new(
                [
                    (package.clone(), Term::positive(VersionSet::singleton(universe, index))),
                    (dependency.name.clone(), Term::negative(allowed)),
                ],
                Cause::Dependency {
                    dependent: dependent.clone(),
                    requirement: root_label(&dependency.name, &dependency.constraint),
                },
            );
            added.push(self.store.add(incompatibility));
        }
        added
    }

    /// Add dependencies of decided packages that a new path made reachable.
    ///
    /// Returns the packages that gained incompatibilities.
    fn widen(&mut self) -> BTreeSet<PackageName> {
        let reach = self.reach();
        let decided: Vec<(PackageName, usize)> = self
            .decisions
            .decisions()
            .iter()
            .map(|(package, index)| (package.clone(), *index))
            .collect();

        let mut widened = BTreeSet::new();
        for (package, index) in decided {
            let Some(here) = reach.get(&package).filter(|dnf| !dnf.is_empty()) else {
                continue;
            };
            if !self.add_dependencies(&package, index, here).is_empty() {
                log::debug!("{} is reached in more environments, adding its dependencies", package);
                widened.insert(package);
            }
        }
        widened
    }

    /// Root requirements with their markers as environment predicates
    fn root_markers(&self) -> Vec<(PackageName, Dnf)> {
        self.roots
            .iter()
            .map(|root| {
                let mut dnf = Dnf::from_marker(root.marker.as_ref());
                dnf.restrict(&self.solver.environments);
                (root.name.clone(), dnf)
            })
            .collect()
    }

    /// Environments each package is reached in through the current
    /// decisions
    fn reach(&self) -> BTreeMap<PackageName, Dnf> {
        let pool = self.solver.pool;
        let mut edges: BTreeMap<PackageName, Vec<(PackageName, Dnf)>> = BTreeMap::new();
        for (package, index) in self.decisions.decisions() {
            let Some(candidate) = pool.candidate(package, *index) else {
                continue;
            };
            let out = self
                .solver
                .active_dependencies(candidate)
                .into_iter()
                .map(|(_, dep)| (dep.name.clone(), Dnf::from_marker(dep.marker.as_ref())))
                .collect();
            edges.insert(package.clone(), out);
        }
        propagate_markers(&self.root_markers(), &edges, &self.solver.environments)
    }

    fn build_resolution(&self) -> Resolution {
        let pool = self.solver.pool;
        let environments = &self.solver.environments;

        let selected: BTreeMap<&PackageName, &Candidate> = self
            .decisions
            .decisions()
            .iter()
            .filter_map(|(package, index)| pool.candidate(package, *index).map(|c| (package, &**c)))
            .collect();

        let mut edges: BTreeMap<PackageName, Vec<(PackageName, Dnf)>> = BTreeMap::new();
        let mut dependencies: BTreeMap<PackageName, Vec<ResolvedEdge>> = BTreeMap::new();
        for (package, candidate) in &selected {
            for (_, dependency) in self.solver.active_dependencies(candidate) {
                if !selected.contains_key(&dependency.name) {
                    continue;
                }
                edges
                    .entry((*package).clone())
                    .or_default()
                    .push((dependency.name.clone(), Dnf::from_marker(dependency.marker.as_ref())));
                dependencies.entry((*package).clone()).or_default().push(ResolvedEdge {
                    name: dependency.name.clone(),
                    constraint: dependency.constraint.canonical(),
                    marker: dependency.marker.as_ref().map(|m| m.to_string()),
                });
            }
        }

        let roots: Vec<(PackageName, Dnf)> = self
            .root_markers()
            .into_iter()
            .filter(|(name, _)| selected.contains_key(name))
            .collect();
        let markers = propagate_markers(&roots, &edges, environments);

        let mut resolution = Resolution::new();
        for (package, candidate) in selected {
            let marker = match markers.get(package) {
                Some(dnf) if *dnf == Dnf::default() => {
                    log::debug!("Dropping {}: not needed in any target environment", package);
                    continue;
                }
                Some(dnf) => dnf.render(),
                None => None,
            };
            resolution.insert(ResolvedPackage {
                name: package.clone(),
                version: candidate.version.clone(),
                hashes: candidate.hashes.clone(),
                source: candidate.source.clone(),
                marker,
                dependencies: dependencies.remove(package).unwrap_or_default(),
            });
        }
        resolution
    }
}
