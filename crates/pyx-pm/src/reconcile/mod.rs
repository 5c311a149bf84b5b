//! Reconciliation between the Pipfile and `Pipfile.lock`.
//!
//! [`Project`] is the central object tying a project directory to its
//! configuration, metadata source and installer. Each public method is one
//! user-level operation: lock, sync, verify, guarded install, and the
//! single-package edits in [`upgrade`](Project::upgrade). Read-only views
//! of the lock ([`graph`](Project::graph),
//! [`requirements`](Project::requirements)) and [`clean`](Project::clean)
//! never resolve.

mod graph;
mod upgrade;


pub use graph::{DependencyGraph, GraphEdge};
pub use upgrade::LockChange;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pyx_pep440::{MarkerEnvironment, MarkerTree, PackageName, Version};

use crate::cache::Cache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::installer::{InstallTarget, InstallationManager, Installer, WheelhouseInstaller};
use crate::lock::{canonicalize, fingerprint, requirements, LockDocument, LockedCategory, LockedPackage, LOCK_FILE};
use crate::pipfile::{Pipfile, DEFAULT_CATEGORY, DEVELOP_CATEGORY};
use crate::repository::{ArtifactFetcher, HttpFetcher, MetadataSource, PoolLoader, PypiSource};
use crate::solver::{root_label, CancelFlag, Policy, Pool, Request, RootRequirement, Solver};

pub const PIPFILE: &str = "Pipfile";

/// Outcome of comparing the lock with the Pipfile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    UpToDate,
    /// The lock is missing or was produced from a different Pipfile
    Stale {
        expected: String,
        found: Option<String>,
    },
}

impl Verification {
    pub fn is_up_to_date(&self) -> bool {
        matches!(self, Verification::UpToDate)
    }

    /// `LockOutOfDate` unless up to date
    pub fn into_result(self) -> Result<()> {
        match self {
            Verification::UpToDate => Ok(()),
            Verification::Stale { expected, found } => Err(Error::LockOutOfDate { expected, found }),
        }
    }
}

/// What a guarded install does with a stale lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// Lock again, then install
    Relock,
    /// Refuse
    Deploy,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
    /// Entries with their own origin, left to an external installer
    pub deferred: Vec<String>,
}

/// Per-operation view of the project
pub(crate) struct Context {
    pub pipfile: Pipfile,
    pub config: Config,
    pub environments: Vec<MarkerEnvironment>,
    pub python: String,
}

pub struct Project {
    root: PathBuf,
    config: Config,
    source: Arc<dyn MetadataSource>,
    fetcher: Arc<dyn ArtifactFetcher>,
    installer: Option<Arc<dyn Installer>>,
    cancel: CancelFlag,
}

impl Project {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Config,
        source: Arc<dyn MetadataSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Project {
            root: root.into(),
            config,
            source,
            fetcher,
            installer: None,
            cancel: CancelFlag::new(),
        }
    }

    /// A project talking to real indexes, configured from the environment
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let config = Config::from_env();
        let source = Arc::new(PypiSource::new(&config)?);
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        Ok(Project::new(root, config, source, fetcher))
    }

    /// Replace the default wheelhouse installer
    pub fn installer(mut self, installer: Arc<dyn Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipfile_path(&self) -> PathBuf {
        self.root.join(PIPFILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// Resolve the selected categories (all when `None`) and write the lock.
    ///
    /// Non-default categories are solved independently, each constrained by
    /// floor pins on the default category's versions. With a selection,
    /// the other categories of an existing lock are kept as they are.
    pub async fn lock(&self, categories: Option<&[String]>) -> Result<LockDocument> {
        let ctx = self.context()?;
        let lock = self.resolve_lock(&ctx, categories).await?;
        lock.save(&self.lock_path(), ctx.config.lock_wait)?;
        Ok(lock)
    }

    pub(crate) async fn resolve_lock(&self, ctx: &Context, categories: Option<&[String]>) -> Result<LockDocument> {
        let model = ctx.pipfile.model();

        let mut selected: Vec<String> = match categories {
            Some(list) => list.to_vec(),
            None => model.category_names(),
        };
        selected.sort_by_key(|name| (name != DEFAULT_CATEGORY, name.clone()));
        selected.dedup();

        let mut lock = match categories {
            Some(_) => LockDocument::load(&self.lock_path())?.unwrap_or_else(|| LockDocument::new(model)),
            None => LockDocument::new(model),
        };
        lock.update_meta(model);
        if categories.is_none() {
            for name in [DEFAULT_CATEGORY, DEVELOP_CATEGORY] {
                lock.categories.entry(name.to_string()).or_default();
            }
        }

        // other categories need a default resolution to pin against
        let needs_default = selected.iter().any(|c| c != DEFAULT_CATEGORY)
            && !selected.iter().any(|c| c == DEFAULT_CATEGORY)
            && lock.category(DEFAULT_CATEGORY).is_none();
        if needs_default {
            selected.insert(0, DEFAULT_CATEGORY.to_string());
        }

        for category in &selected {
            let pool = self.load_pool(ctx, category).await?;
            let pins = if category == DEFAULT_CATEGORY {
                Vec::new()
            } else {
                floor_pins(lock.category(DEFAULT_CATEGORY))
            };
            let entries = self.resolve_category(ctx, &pool, category, &pins, &BTreeMap::new())?;
            log::info!("Locked {} package(s) in [{}]", entries.len(), category);
            lock.set_category(category.clone(), entries);
        }

        Ok(lock)
    }

    /// Compare the lock's fingerprint with the Pipfile's
    pub fn verify(&self) -> Result<Verification> {
        let pipfile = Pipfile::load(&self.pipfile_path())?;
        let expected = fingerprint(pipfile.model());
        let verification = match LockDocument::load(&self.lock_path())? {
            Some(lock) if lock.fingerprint() == expected => Verification::UpToDate,
            Some(lock) => Verification::Stale {
                expected,
                found: Some(lock.fingerprint().to_string()),
            },
            None => Verification::Stale { expected, found: None },
        };
        Ok(verification)
    }

    /// Install exactly what the lock records for `categories`.
    ///
    /// Never resolves. A name locked in several categories is installed at
    /// the version of the first category listed.
    pub async fn sync(&self, categories: &[String]) -> Result<SyncReport> {
        let ctx = self.context()?;
        self.verify()?.into_result()?;
        let lock = self.existing_lock(&ctx)?;

        let host = MarkerEnvironment::host(&ctx.python);
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        let mut deferred = Vec::new();

        for category in categories {
            let Some(entries) = lock.category(category) else {
                log::warn!("Pipfile.lock has no [{}] category", category);
                continue;
            };
            for (name, entry) in entries {
                if !seen.insert(name.clone()) {
                    continue;
                }
                if let Some(markers) = &entry.markers {
                    let marker: MarkerTree = markers
                        .parse()
                        .map_err(|e| Error::malformed(format!("locked marker of {}: {}", name, e)))?;
                    if !marker.evaluate(&host) {
                        log::debug!("Skipping {}: {} does not hold here", name, markers);
                        continue;
                    }
                }
                if entry.is_origin() {
                    deferred.push(name.clone());
                    continue;
                }
                targets.push(install_target(&lock, name, entry)?);
            }
        }

        let manager = InstallationManager::new(self.installer_for(&ctx), ctx.config.get_target_dir(&self.root));
        let result = manager.install(&targets).await?;
        if !deferred.is_empty() {
            log::info!("Left to an external installer: {}", deferred.join(", "));
        }
        Ok(SyncReport {
            installed: result.installed,
            skipped: result.skipped,
            deferred,
        })
    }

    /// Remove installed packages that no category of the lock records.
    ///
    /// Returns `name==version` of every package removed, or that would be
    /// with `dry_run`.
    pub fn clean(&self, dry_run: bool) -> Result<Vec<String>> {
        let ctx = self.context()?;
        let lock = self.existing_lock(&ctx)?;
        let locked: HashSet<&str> = lock
            .categories
            .values()
            .flat_map(|entries| entries.keys())
            .map(String::as_str)
            .collect();

        let manager =
            InstallationManager::new(self.installer_for(&ctx), ctx.config.get_target_dir(&self.root)).dry_run(dry_run);
        let unused: Vec<String> = manager
            .read_record()?
            .into_keys()
            .filter(|name| !locked.contains(name.as_str()))
            .collect();
        manager.uninstall(&unused)
    }

    /// The lock's entries for `categories` as a pip requirements file
    pub fn requirements(&self, categories: &[String], hashes: bool) -> Result<String> {
        let ctx = self.context()?;
        let lock = self.existing_lock(&ctx)?;
        if !self.verify()?.is_up_to_date() {
            log::warn!("Pipfile.lock is out of date, exporting what it records");
        }
        for category in categories.iter().filter(|c| lock.category(c).is_none()) {
            log::warn!("Pipfile.lock has no [{}] category", category);
        }
        Ok(requirements(&lock, categories, hashes))
    }

    /// Sync after making sure the lock is current
    pub async fn install(&self, mode: InstallMode, categories: &[String]) -> Result<SyncReport> {
        match self.verify()? {
            Verification::UpToDate => {}
            Verification::Stale { expected, found } => match mode {
                InstallMode::Deploy => return Err(Error::LockOutOfDate { expected, found }),
                InstallMode::Relock => {
                    log::info!("Pipfile.lock is out of date, locking");
                    self.lock(None).await?;
                }
            },
        }
        self.sync(categories).await
    }

    /// The lock on disk; `LockOutOfDate` when there is none
    pub(crate) fn existing_lock(&self, ctx: &Context) -> Result<LockDocument> {
        LockDocument::load(&self.lock_path())?.ok_or_else(|| Error::LockOutOfDate {
            expected: fingerprint(ctx.pipfile.model()),
            found: None,
        })
    }

    pub(crate) fn context(&self) -> Result<Context> {
        let pipfile = Pipfile::load(&self.pipfile_path())?;
        Ok(self.context_from(pipfile))
    }

    /// Context over an in-memory Pipfile, possibly not yet saved
    pub(crate) fn context_from(&self, pipfile: Pipfile) -> Context {
        let mut config = self.config.clone();
        config.merge_settings(&pipfile.model().settings);
        let python = pipfile
            .model()
            .requires
            .python()
            .map(str::to_string)
            .unwrap_or_else(|| config.python_version.clone());
        Context {
            environments: MarkerEnvironment::all_platforms(&python),
            pipfile,
            config,
            python,
        }
    }

    /// Pool covering everything one category could need.
    ///
    /// Each category gets its own pool so a package pinned to an index in
    /// one category is not served from another index chosen by a sibling.
    pub(crate) async fn load_pool(&self, ctx: &Context, category: &str) -> Result<Pool> {
        let model = ctx.pipfile.model();
        let roots: Vec<(PackageName, Option<String>)> = model
            .category(category)
            .into_iter()
            .flat_map(|specifiers| specifiers.values())
            .filter(|s| s.is_resolvable() && s.applies_to_any(&ctx.environments))
            .map(|s| (s.name.clone(), s.index.clone()))
            .collect();

        PoolLoader::new(self.source.clone(), model.effective_sources())
            .environments(ctx.environments.clone())
            .max_workers(ctx.config.max_workers)
            .timeout(ctx.config.fetch_timeout)
            .cancel_flag(self.cancel.clone())
            .load(&roots)
            .await
    }

    /// Solve one category and return its locked form
    pub(crate) fn resolve_category(
        &self,
        ctx: &Context,
        pool: &Pool,
        category: &str,
        pins: &[(PackageName, Version)],
        preferred: &BTreeMap<PackageName, Version>,
    ) -> Result<LockedCategory> {
        let specifiers = ctx.pipfile.model().category(category).cloned().unwrap_or_default();

        let mut request = Request::new();
        for specifier in specifiers.values().filter(|s| s.is_resolvable()) {
            request.add_requirement(RootRequirement {
                name: specifier.name.clone(),
                constraint: specifier.constraint.clone(),
                marker: specifier.marker.clone(),
                label: root_label(&specifier.name, &specifier.constraint),
            });
        }
        for (name, version) in pins {
            request.pin(name.clone(), version.clone(), DEFAULT_CATEGORY);
        }

        let mut policy = Policy::new().allow_prereleases(ctx.config.allow_prereleases);
        for (name, version) in preferred {
            policy = policy.prefer(name.clone(), version.clone());
        }

        let resolution = Solver::new(pool, &policy)
            .environments(ctx.environments.clone())
            .cancel_flag(self.cancel.clone())
            .solve(&request)?;
        Ok(canonicalize(&resolution, &specifiers))
    }

    fn installer_for(&self, ctx: &Context) -> Arc<dyn Installer> {
        if let Some(installer) = &self.installer {
            return installer.clone();
        }
        let cache = ctx
            .config
            .cache_dir
            .as_ref()
            .map(|dir| Cache::new(dir.join("artifacts")))
            .unwrap_or_else(Cache::disabled);
        Arc::new(
            WheelhouseInstaller::new(
                self.source.clone(),
                self.fetcher.clone(),
                ctx.config.get_target_dir(&self.root),
            )
            .with_cache(cache),
        )
    }
}

/// Locked versions of a category, as floor pins for the others
pub(crate) fn floor_pins(entries: Option<&LockedCategory>) -> Vec<(PackageName, Version)> {
    entries
        .into_iter()
        .flatten()
        .filter_map(|(name, entry)| locked_version(name, entry))
        .collect()
}

pub(crate) fn locked_version(name: &str, entry: &LockedPackage) -> Option<(PackageName, Version)> {
    let package = PackageName::new(name).ok()?;
    let version = entry.pinned_version()?.parse().ok()?;
    Some((package, version))
}

fn install_target(lock: &LockDocument, name: &str, entry: &LockedPackage) -> Result<InstallTarget> {
    let (name, version) = locked_version(name, entry)
        .ok_or_else(|| Error::malformed(format!("locked entry {} has no valid version", name)))?;
    let source = match &entry.index {
        Some(index) => lock.meta.sources.iter().find(|s| &s.name == index),
        None => lock.meta.sources.first(),
    }
    .cloned()
    .ok_or_else(|| Error::malformed(format!("locked entry {} references an unknown index", name)))?;

    Ok(InstallTarget {
        name,
        version,
        source,
        hashes: entry.hashes.clone(),
    })
}
