use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use pyx_pep440::{MarkerEnvironment, PackageName, Version};

use super::{MetadataError, MetadataSource, Release};
use crate::config::DEFAULT_PYTHON_VERSION;
use crate::error::{Error, Result};
use crate::pipfile::Source;
use crate::solver::{CancelFlag, Candidate, Pool};

/// Builds the solver's [`Pool`] by walking the dependency graph.
///
/// Starting from the root names, every package that some release could
/// depend on in one of the target environments is fetched, one
/// breadth-first round at a time. Requests within a round run concurrently,
/// bounded by `max_workers`. Rounds are merged in name order so the pool
/// comes out the same regardless of which request finished first.
pub struct PoolLoader {
    source: Arc<dyn MetadataSource>,
    sources: Vec<Source>,
    environments: Vec<MarkerEnvironment>,
    max_workers: usize,
    timeout: Duration,
    cancel: Option<CancelFlag>,
}

impl PoolLoader {
    /// `sources` in search order; the first one is the default index
    pub fn new(source: Arc<dyn MetadataSource>, sources: Vec<Source>) -> Self {
        PoolLoader {
            source,
            sources,
            environments: MarkerEnvironment::all_platforms(DEFAULT_PYTHON_VERSION),
            max_workers: 8,
            timeout: Duration::from_secs(30),
            cancel: None,
        }
    }

    pub fn environments(mut self, environments: Vec<MarkerEnvironment>) -> Self {
        self.environments = environments;
        self
    }

    pub fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Load every package reachable from `roots`.
    ///
    /// A root may name the index it must come from; everything else is
    /// looked up in each source in order until one knows the package. A
    /// name listed twice is loaded from its explicit index.
    pub async fn load(&self, roots: &[(PackageName, Option<String>)]) -> Result<Pool> {
        let mut pool = Pool::new();
        let mut seen: HashSet<PackageName> = HashSet::new();

        let mut pinned: BTreeMap<PackageName, Option<String>> = BTreeMap::new();
        for (name, index) in roots {
            let entry = pinned.entry(name.clone()).or_default();
            if let Some(index) = index {
                if let Some(existing) = entry.as_ref().filter(|e| *e != index) {
                    return Err(Error::malformed(format!(
                        "{} is pinned to both \"{}\" and \"{}\"",
                        name, existing, index
                    )));
                }
                *entry = Some(index.clone());
            }
        }
        let mut frontier: Vec<(PackageName, Option<String>)> = pinned.into_iter().collect();
        seen.extend(frontier.iter().map(|(name, _)| name.clone()));

        let mut round = 0;
        while !frontier.is_empty() {
            if self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled) {
                return Err(Error::Cancelled);
            }
            round += 1;
            log::debug!("Fetching metadata round {}: {} package(s)", round, frontier.len());

            let mut results: Vec<(PackageName, Result<Vec<Candidate>>)> = stream::iter(frontier.drain(..))
                .map(|(name, index)| self.fetch(name, index))
                .buffer_unordered(self.max_workers)
                .collect()
                .await;
            results.sort_by(|a, b| a.0.cmp(&b.0));

            for (name, outcome) in results {
                let candidates = outcome?;
                pool.add_empty(name.clone());
                for candidate in candidates {
                    for dependency in self.reachable_dependencies(&candidate) {
                        if seen.insert(dependency.clone()) {
                            frontier.push((dependency, None));
                        }
                    }
                    pool.add_candidate(candidate);
                }
            }
        }

        log::info!("Loaded {} release(s) of {} package(s)", pool.len(), seen.len());
        Ok(pool)
    }

    async fn fetch(&self, name: PackageName, index: Option<String>) -> (PackageName, Result<Vec<Candidate>>) {
        let outcome = self.fetch_candidates(&name, index.as_deref()).await;
        (name, outcome)
    }

    async fn fetch_candidates(&self, name: &PackageName, index: Option<&str>) -> Result<Vec<Candidate>> {
        let sources: Vec<&Source> = match index {
            Some(index) => {
                let source = self.sources.iter().find(|s| s.name == index).ok_or_else(|| {
                    Error::malformed(format!("{} references unknown source \"{}\"", name, index))
                })?;
                vec![source]
            }
            None => self.sources.iter().collect(),
        };

        for source in sources {
            let request = self.source.releases(source, name);
            let releases = match tokio::time::timeout(self.timeout, request).await {
                Err(_) => {
                    return Err(Error::MetadataUnavailable {
                        package: name.to_string(),
                        reason: format!("timed out after {}s querying {}", self.timeout.as_secs_f32(), source.name),
                    })
                }
                Ok(Err(MetadataError::Unavailable(reason))) => {
                    return Err(Error::MetadataUnavailable {
                        package: name.to_string(),
                        reason,
                    })
                }
                Ok(Err(MetadataError::NotFound)) => {
                    log::debug!("{} not found on {}", name, source.name);
                    continue;
                }
                Ok(Ok(releases)) => releases,
            };

            let total = releases.len();
            let candidates: Vec<Candidate> = releases
                .into_iter()
                .filter(|release| self.supports_python(release))
                .map(|release| Candidate::from_release(name.clone(), release, source.name.as_str()))
                .collect();
            if candidates.len() < total {
                log::debug!(
                    "Skipped {} release(s) of {} not supporting the target interpreter",
                    total - candidates.len(),
                    name
                );
            }
            return Ok(candidates);
        }

        log::warn!("No source provides {}", name);
        Ok(Vec::new())
    }

    /// A release is usable if some target interpreter satisfies its `requires_python`
    fn supports_python(&self, release: &Release) -> bool {
        let Some(requires) = &release.requires_python else {
            return true;
        };
        self.environments.iter().any(|env| {
            match env.python_full_version.parse::<Version>() {
                Ok(python) => requires.matches(&python),
                Err(_) => true,
            }
        })
    }

    fn reachable_dependencies(&self, candidate: &Candidate) -> Vec<PackageName> {
        candidate
            .dependencies
            .iter()
            .filter(|dep| dep.url.is_none() && dep.name != candidate.name)
            .filter(|dep| {
                dep.marker
                    .as_ref()
                    .map(|m| m.evaluate_any(&self.environments))
                    .unwrap_or(true)
            })
            .map(|dep| dep.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::repository::InMemorySource;

    fn name(s: &str) -> PackageName {
        PackageName::new(s).unwrap()
    }

    fn roots(names: &[&str]) -> Vec<(PackageName, Option<String>)> {
        names.iter().map(|n| (name(n), None)).collect()
    }

    fn versions(pool: &Pool, package: &str) -> Vec<String> {
        pool.candidates(&name(package))
            .iter()
            .map(|c| c.version.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_loads_transitive_closure() {
        let source = Arc::new(InMemorySource::new());
        source
            .add("requests", "2.31.0", &["idna>=2.5", "urllib3<3"])
            .add("requests", "2.30.0", &["idna>=2.5"])
            .add("idna", "3.6", &[])
            .add("urllib3", "2.1.0", &[])
            .add("unrelated", "1.0", &[]);

        let loader = PoolLoader::new(source.clone(), vec![Source::pypi()]);
        let pool = loader.load(&roots(&["requests"])).await.unwrap();

        assert_eq!(versions(&pool, "requests"), vec!["2.30.0", "2.31.0"]);
        assert_eq!(versions(&pool, "idna"), vec!["3.6"]);
        assert!(pool.contains(&name("urllib3")));
        assert!(!pool.contains(&name("unrelated")));
        assert_eq!(source.request_count(), 3);
    }

    #[tokio::test]
    async fn test_skips_dependencies_outside_target_environments() {
        let source = Arc::new(InMemorySource::new());
        source
            .add("app", "1.0", &[
                "pywin32; sys_platform == 'win32'",
                "socks; extra == 'proxy'",
                "ancient; python_version < '3.0'",
            ])
            .add("pywin32", "306", &[])
            .add("socks", "1.0", &[])
            .add("ancient", "1.0", &[]);

        let loader = PoolLoader::new(source.clone(), vec![Source::pypi()]);
        let pool = loader.load(&roots(&["app"])).await.unwrap();
        assert!(pool.contains(&name("pywin32")));
        assert!(!pool.contains(&name("socks")));
        assert!(!pool.contains(&name("ancient")));

        let linux_only = PoolLoader::new(source, vec![Source::pypi()])
            .environments(vec![MarkerEnvironment::linux("3.12")]);
        let pool = linux_only.load(&roots(&["app"])).await.unwrap();
        assert!(!pool.contains(&name("pywin32")));
    }

    #[tokio::test]
    async fn test_requires_python_filters_releases() {
        let source = Arc::new(InMemorySource::new());
        source
            .add("lib", "1.0", &[])
            .add("lib", "2.0", &[])
            .set_requires_python("lib", "2.0", ">=3.13");

        let loader = PoolLoader::new(source, vec![Source::pypi()])
            .environments(MarkerEnvironment::all_platforms("3.12"));
        let pool = loader.load(&roots(&["lib"])).await.unwrap();
        assert_eq!(versions(&pool, "lib"), vec!["1.0"]);
    }

    #[tokio::test]
    async fn test_source_order_and_explicit_index() {
        let source = Arc::new(InMemorySource::new());
        source
            .add_to("internal", "private", "1.0", &["shared"])
            .add_to("internal", "shared", "9.0", &[])
            .add("shared", "1.0", &[]);

        let sources = vec![Source::pypi(), Source::new("internal", "https://internal.example/simple")];
        let loader = PoolLoader::new(source, sources);
        let pool = loader
            .load(&[(name("private"), Some("internal".to_string()))])
            .await
            .unwrap();

        assert_eq!(pool.candidates(&name("private"))[0].source, "internal");
        // transitive names search sources in order, first hit wins
        assert_eq!(versions(&pool, "shared"), vec!["1.0"]);
        assert_eq!(pool.candidates(&name("shared"))[0].source, "pypi");
    }

    #[tokio::test]
    async fn test_explicit_index_wins_over_plain_root() {
        let source = Arc::new(InMemorySource::new());
        source.add("foo", "1.0", &[]).add_to("internal", "foo", "2.0", &[]);

        let sources = vec![Source::pypi(), Source::new("internal", "https://internal.example/simple")];
        let loader = PoolLoader::new(source, sources);
        let pool = loader
            .load(&[(name("foo"), None), (name("foo"), Some("internal".to_string()))])
            .await
            .unwrap();
        assert_eq!(versions(&pool, "foo"), vec!["2.0"]);

        let err = loader
            .load(&[(name("foo"), Some("pypi".to_string())), (name("foo"), Some("internal".to_string()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSpecification);
    }

    #[tokio::test]
    async fn test_unknown_index_is_malformed() {
        let loader = PoolLoader::new(Arc::new(InMemorySource::new()), vec![Source::pypi()]);
        let err = loader
            .load(&[(name("a"), Some("nowhere".to_string()))])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedSpecification);
    }

    #[tokio::test]
    async fn test_missing_package_yields_empty_entry() {
        let loader = PoolLoader::new(Arc::new(InMemorySource::new()), vec![Source::pypi()]);
        let pool = loader.load(&roots(&["ghost"])).await.unwrap();
        assert!(pool.contains(&name("ghost")));
        assert!(pool.candidates(&name("ghost")).is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_and_timeout() {
        let source = Arc::new(InMemorySource::new());
        source.add("flaky", "1.0", &[]).set_unavailable("flaky");
        source.add("slow", "1.0", &[]).set_delay("slow", Duration::from_millis(500));

        let loader = PoolLoader::new(source, vec![Source::pypi()]).timeout(Duration::from_millis(20));
        let err = loader.load(&roots(&["flaky"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataUnavailable);

        let err = loader.load(&roots(&["slow"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MetadataUnavailable);
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_cancelled_before_fetching() {
        let source = Arc::new(InMemorySource::new());
        source.add("a", "1.0", &[]);
        let flag = CancelFlag::new();
        flag.cancel();

        let loader = PoolLoader::new(source.clone(), vec![Source::pypi()]).cancel_flag(flag);
        let err = loader.load(&roots(&["a"])).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(source.request_count(), 0);
    }
}
