//! Dependency graph of a locked category.
//!
//! Edges come from the metadata of each locked version. A requirement is an
//! edge only when the dependent is locked, the dependency is locked in the
//! same category, and the dependent's locked markers together with the
//! requirement's own marker hold in some target environment.

use std::collections::{BTreeMap, BTreeSet};

use pyx_pep440::{MarkerEnvironment, MarkerTree};

use super::upgrade::describe;
use super::{locked_version, Project};
use crate::error::Result;
use crate::lock::LockedCategory;
use crate::solver::{Dnf, Pool};

/// Requirement of one locked package on another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub name: String,
    /// Constraint as the dependent declares it, `*` when unconstrained
    pub constraint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    roots: BTreeSet<String>,
    versions: BTreeMap<String, String>,
    edges: BTreeMap<String, Vec<GraphEdge>>,
}

impl DependencyGraph {
    /// Locked packages declared in the Pipfile
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.roots.iter().map(String::as_str)
    }

    /// Every locked package, by name
    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.versions.keys().map(String::as_str)
    }

    pub fn is_root(&self, name: &str) -> bool {
        self.roots.contains(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    /// Locked version, or the origin of an entry that has none
    pub fn version(&self, name: &str) -> Option<&str> {
        self.versions.get(name).map(String::as_str)
    }

    pub fn dependencies(&self, name: &str) -> &[GraphEdge] {
        self.edges.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Packages requiring `name`, each with the edge it requires it through
    pub fn dependents(&self, name: &str) -> Vec<(&str, &GraphEdge)> {
        self.edges
            .iter()
            .flat_map(|(from, edges)| {
                edges
                    .iter()
                    .filter(move |edge| edge.name == name)
                    .map(move |edge| (from.as_str(), edge))
            })
            .collect()
    }
}

impl Project {
    /// Graph of what `category` locks.
    ///
    /// Reads the lock as it is; a stale lock is reported but still shown.
    pub async fn graph(&self, category: &str) -> Result<DependencyGraph> {
        let ctx = self.context()?;
        let lock = self.existing_lock(&ctx)?;
        if !self.verify()?.is_up_to_date() {
            log::warn!("Pipfile.lock is out of date, showing what it records");
        }

        let locked = lock.category(category).cloned().unwrap_or_default();
        let pool = self.load_pool(&ctx, category).await?;

        let roots = ctx
            .pipfile
            .model()
            .category(category)
            .into_iter()
            .flat_map(|specifiers| specifiers.keys())
            .map(|name| name.to_string())
            .filter(|name| locked.contains_key(name))
            .collect();
        let versions = locked
            .iter()
            .filter_map(|(name, entry)| describe(entry).map(|v| (name.clone(), v)))
            .collect();

        Ok(DependencyGraph {
            roots,
            versions,
            edges: locked_edges(&pool, &locked, &ctx.environments),
        })
    }
}

/// Forward edges between the entries of a locked category
pub(crate) fn locked_edges(
    pool: &Pool,
    locked: &LockedCategory,
    environments: &[MarkerEnvironment],
) -> BTreeMap<String, Vec<GraphEdge>> {
    let mut edges: BTreeMap<String, Vec<GraphEdge>> = BTreeMap::new();

    for (name, entry) in locked {
        let Some((package, version)) = locked_version(name, entry) else {
            continue;
        };
        let Some(candidate) = pool.find(&package, &version).and_then(|i| pool.candidate(&package, i)) else {
            log::debug!("{}=={} is not in the pool, no edges", name, version);
            continue;
        };
        let reach = entry
            .markers
            .as_deref()
            .and_then(|m| m.parse::<MarkerTree>().ok())
            .map(|m| Dnf::from_marker(Some(&m)))
            .unwrap_or_else(Dnf::always);
        for dep in &candidate.dependencies {
            if dep.url.is_some() || !locked.contains_key(dep.name.as_str()) {
                continue;
            }
            let mut applies = reach.and(&Dnf::from_marker(dep.marker.as_ref()));
            applies.restrict(environments);
            if applies.is_empty() {
                continue;
            }
            let targets = edges.entry(name.clone()).or_default();
            if !targets.iter().any(|edge| edge.name == dep.name.as_str()) {
                targets.push(GraphEdge {
                    name: dep.name.to_string(),
                    constraint: dep.constraint.to_string(),
                });
            }
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        let edge = |name: &str, constraint: &str| GraphEdge {
            name: name.to_string(),
            constraint: constraint.to_string(),
        };
        DependencyGraph {
            roots: ["requests".to_string()].into(),
            versions: [("requests", "2.31.0"), ("idna", "3.6"), ("urllib3", "2.1.0")]
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            edges: [
                ("requests".to_string(), vec![edge("idna", ">=2.5"), edge("urllib3", "<3")]),
                ("urllib3".to_string(), vec![edge("idna", "*")]),
            ]
            .into(),
        }
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let graph = graph();
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["requests"]);
        assert_eq!(graph.dependencies("requests").len(), 2);
        assert!(graph.dependencies("idna").is_empty());
        assert_eq!(graph.version("urllib3"), Some("2.1.0"));

        let dependents: Vec<(&str, &str)> = graph
            .dependents("idna")
            .into_iter()
            .map(|(from, edge)| (from, edge.constraint.as_str()))
            .collect();
        assert_eq!(dependents, vec![("requests", ">=2.5"), ("urllib3", "*")]);
        assert!(!graph.contains("six"));
        assert!(graph.is_root("requests") && !graph.is_root("idna"));
        assert_eq!(graph.packages().count(), 3);
    }
}
