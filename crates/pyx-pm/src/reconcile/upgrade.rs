//! Single-package edits: upgrade, update, add and remove.
//!
//! Each edit re-resolves only what the edited package can reach. Locked
//! packages off its dependency paths keep a soft preference for their
//! locked version, and entries that come out unchanged are carried over
//! from the old lock as they were.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use pyx_pep440::{MarkerEnvironment, MultiConstraint, PackageName, Version};

use super::graph::locked_edges;
use super::{floor_pins, locked_version, Context, Project, SyncReport};
use crate::error::{Error, Result};
use crate::lock::{fingerprint, LockDocument, LockedCategory, LockedPackage};
use crate::pipfile::{Pipfile, DEFAULT_CATEGORY};
use crate::solver::Pool;

/// One entry that differs between the old and the new lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockChange {
    pub category: String,
    pub name: String,
    /// Locked version or origin before the edit, `None` if it was absent
    pub from: Option<String>,
    pub to: Option<String>,
}

impl fmt::Display for LockChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.from, &self.to) {
            (Some(from), Some(to)) => write!(f, "[{}] {}: {} -> {}", self.category, self.name, from, to),
            (None, Some(to)) => write!(f, "[{}] {}: added {}", self.category, self.name, to),
            (Some(from), None) => write!(f, "[{}] {}: removed {}", self.category, self.name, from),
            (None, None) => write!(f, "[{}] {}: unchanged", self.category, self.name),
        }
    }
}

impl Project {
    /// Re-resolve `name` in `category`, optionally with a new constraint.
    ///
    /// A new constraint is written to the Pipfile, creating the entry when
    /// the package was only locked as a dependency. Nothing is written when
    /// resolution fails.
    pub async fn upgrade(&self, name: &str, category: &str, constraint: Option<&str>) -> Result<Vec<LockChange>> {
        let mut pipfile = Pipfile::load(&self.pipfile_path())?;
        let before = fingerprint(pipfile.model());
        let package = PackageName::new(name).map_err(|e| Error::malformed(e.to_string()))?;

        if let Some(constraint) = constraint {
            let existing = pipfile.model().get(category, &package).cloned();
            match existing {
                Some(mut specifier) => {
                    specifier.constraint = constraint.parse::<MultiConstraint>().map_err(|e| {
                        Error::malformed(format!("invalid version constraint for {}: {}", name, e))
                    })?;
                    pipfile.set_specifier(&specifier)?;
                }
                None => {
                    pipfile.add_or_update(category, name, constraint, None, None)?;
                }
            }
        }

        let ctx = self.context_from(pipfile);
        let (lock, changes) = self.relock_around(&ctx, &package, category, &before).await?;
        if constraint.is_some() {
            ctx.pipfile.save(&self.pipfile_path())?;
        }
        lock.save(&self.lock_path(), ctx.config.lock_wait)?;
        Ok(changes)
    }

    /// Upgrade, then install the category from the new lock
    pub async fn update(&self, name: &str, category: &str) -> Result<(Vec<LockChange>, SyncReport)> {
        let changes = self.upgrade(name, category, None).await?;
        let report = self.sync(&[category.to_string()]).await?;
        Ok((changes, report))
    }

    /// Declare a package and lock it
    pub async fn add(
        &self,
        category: &str,
        name: &str,
        constraint: &str,
        index: Option<&str>,
        marker: Option<&str>,
    ) -> Result<Vec<LockChange>> {
        let mut pipfile = Pipfile::load(&self.pipfile_path())?;
        let before = fingerprint(pipfile.model());
        let package = pipfile.add_or_update(category, name, constraint, index, marker)?.name.clone();

        let ctx = self.context_from(pipfile);
        let (lock, changes) = self.relock_around(&ctx, &package, category, &before).await?;
        ctx.pipfile.save(&self.pipfile_path())?;
        lock.save(&self.lock_path(), ctx.config.lock_wait)?;
        Ok(changes)
    }

    /// Drop a package from the Pipfile and from the lock
    pub async fn remove(&self, category: &str, name: &str) -> Result<Vec<LockChange>> {
        let mut pipfile = Pipfile::load(&self.pipfile_path())?;
        let before = fingerprint(pipfile.model());
        let package = pipfile.remove(category, name)?.name;

        let ctx = self.context_from(pipfile);
        let (lock, changes) = self.relock_around(&ctx, &package, category, &before).await?;
        ctx.pipfile.save(&self.pipfile_path())?;
        lock.save(&self.lock_path(), ctx.config.lock_wait)?;
        Ok(changes)
    }

    /// New lock after an edit to `package`, with the changes it makes.
    ///
    /// `before` is the fingerprint of the Pipfile prior to the edit. A lock
    /// that did not match it is replaced by a full resolution.
    async fn relock_around(
        &self,
        ctx: &Context,
        package: &PackageName,
        category: &str,
        before: &str,
    ) -> Result<(LockDocument, Vec<LockChange>)> {
        let model = ctx.pipfile.model();
        let old = match LockDocument::load(&self.lock_path())? {
            Some(lock) if lock.fingerprint() == before => lock,
            other => {
                log::info!("Pipfile.lock is out of date, locking all categories");
                let fresh = self.resolve_lock(ctx, None).await?;
                let changes = diff(other.as_ref(), &fresh);
                return Ok((fresh, changes));
            }
        };

        let declared = model.get(category, package).is_some();
        let locked = old.get(category, package.as_str()).is_some();
        if !declared && !locked {
            return Err(Error::NotFound {
                category: category.to_string(),
                name: package.to_string(),
            });
        }

        let mut categories: BTreeSet<String> = BTreeSet::new();
        categories.insert(category.to_string());
        if category == DEFAULT_CATEGORY {
            categories.extend(model.category_names());
            categories.extend(old.categories.keys().cloned());
        }
        let pool = self.load_pool(ctx, category).await?;

        let mut lock = old.clone();
        lock.update_meta(model);

        let previous = old.category(category).cloned().unwrap_or_default();
        let affected = dependency_paths(&pool, &previous, package, &ctx.environments);
        log::debug!("Re-resolving around {}: {}", package, affected.iter().cloned().collect::<Vec<_>>().join(", "));

        let preferred = locked_versions(&previous, &affected);
        let pins = if category == DEFAULT_CATEGORY {
            Vec::new()
        } else {
            floor_pins(old.category(DEFAULT_CATEGORY))
        };
        let fresh = self.resolve_category(ctx, &pool, category, &pins, &preferred)?;
        lock.set_category(category, merge(&previous, fresh, &affected));

        // a new default floor can move the other categories
        if category == DEFAULT_CATEGORY {
            let pins = floor_pins(lock.category(DEFAULT_CATEGORY));
            for other in categories.iter().filter(|c| *c != DEFAULT_CATEGORY) {
                let pool = self.load_pool(ctx, other).await?;
                let previous = old.category(other).cloned().unwrap_or_default();
                let preferred = locked_versions(&previous, &BTreeSet::new());
                let fresh = self.resolve_category(ctx, &pool, other, &pins, &preferred)?;
                lock.set_category(other.clone(), merge(&previous, fresh, &BTreeSet::new()));
            }
        }

        let changes = diff(Some(&old), &lock);
        Ok((lock, changes))
    }
}

/// `focus` with every locked package above or below it in the locked graph
fn dependency_paths(
    pool: &Pool,
    locked: &LockedCategory,
    focus: &PackageName,
    environments: &[MarkerEnvironment],
) -> BTreeSet<String> {
    let forward: BTreeMap<String, Vec<String>> = locked_edges(pool, locked, environments)
        .into_iter()
        .map(|(name, edges)| (name, edges.into_iter().map(|edge| edge.name).collect()))
        .collect();
    let mut reverse: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, targets) in &forward {
        for target in targets {
            reverse.entry(target.clone()).or_default().push(name.clone());
        }
    }

    let mut affected = BTreeSet::new();
    affected.insert(focus.to_string());
    for edges in [&forward, &reverse] {
        let mut queue = VecDeque::from([focus.to_string()]);
        while let Some(name) = queue.pop_front() {
            for next in edges.get(&name).into_iter().flatten() {
                if affected.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
    }
    affected
}

/// Locked versions of every entry outside `affected`
fn locked_versions(locked: &LockedCategory, affected: &BTreeSet<String>) -> BTreeMap<PackageName, Version> {
    locked
        .iter()
        .filter(|(name, _)| !affected.contains(*name))
        .filter_map(|(name, entry)| locked_version(name, entry))
        .collect()
}

/// `fresh`, with unaffected entries whose version did not move taken from
/// `previous` unchanged
fn merge(previous: &LockedCategory, fresh: LockedCategory, affected: &BTreeSet<String>) -> LockedCategory {
    fresh
        .into_iter()
        .map(|(name, entry)| match previous.get(&name) {
            Some(old) if !affected.contains(&name) && old.version == entry.version => (name, old.clone()),
            _ => (name, entry),
        })
        .collect()
}

pub(super) fn describe(entry: &LockedPackage) -> Option<String> {
    entry
        .pinned_version()
        .map(str::to_string)
        .or_else(|| {
            [&entry.git, &entry.hg, &entry.svn, &entry.bzr, &entry.path, &entry.file]
                .into_iter()
                .find_map(|origin| origin.clone())
        })
}

fn diff(old: Option<&LockDocument>, new: &LockDocument) -> Vec<LockChange> {
    let empty = LockedCategory::new();
    let mut categories: BTreeSet<&String> = new.categories.keys().collect();
    if let Some(old) = old {
        categories.extend(old.categories.keys());
    }

    let mut changes = Vec::new();
    for category in categories {
        let before = old.and_then(|l| l.category(category)).unwrap_or(&empty);
        let after = new.category(category).unwrap_or(&empty);
        let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
        for name in names {
            let from = before.get(name).and_then(describe);
            let to = after.get(name).and_then(describe);
            if from != to {
                changes.push(LockChange {
                    category: category.clone(),
                    name: name.clone(),
                    from,
                    to,
                });
            }
        }
    }
    changes
}
