//! Metadata source backed by in-process data

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use pyx_pep440::{MultiConstraint, PackageName, Requirement, Version};

use super::{Artifact, ArtifactFetcher, MetadataError, MetadataSource, Release};
use crate::pipfile::Source;
use crate::util::sha256_digest;

#[derive(Debug, Clone)]
struct StoredRelease {
    release: Release,
    artifact: Artifact,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    releases: BTreeMap<(String, PackageName), Vec<StoredRelease>>,
    unavailable: HashSet<PackageName>,
    delays: HashMap<PackageName, Duration>,
}

/// Serves releases and artifacts registered at runtime.
///
/// Every release gets one wheel whose content is derived from its name and
/// version; the release's hash set is that wheel's digest.
#[derive(Debug, Default)]
pub struct InMemorySource {
    state: RwLock<State>,
    requests: AtomicUsize,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `name==version` on the `pypi` source
    pub fn add(&self, name: &str, version: &str, dependencies: &[&str]) -> &Self {
        self.add_to("pypi", name, version, dependencies)
    }

    /// Publish `name==version` on a named source
    pub fn add_to(&self, source: &str, name: &str, version: &str, dependencies: &[&str]) -> &Self {
        let name = parse_name(name);
        let version: Version = version
            .parse()
            .unwrap_or_else(|e| panic!("invalid fixture version {}: {}", version, e));
        let dependencies = dependencies
            .iter()
            .map(|d| {
                d.parse::<Requirement>()
                    .unwrap_or_else(|e| panic!("invalid fixture requirement {}: {}", d, e))
            })
            .collect();

        let filename = format!("{}-{}-py3-none-any.whl", name.as_str().replace('-', "_"), version);
        let content = format!("{}=={} from {}", name, version, source).into_bytes();
        let digest = sha256_digest(&content);

        let mut release = Release::new(version);
        release.dependencies = dependencies;
        release.hashes.insert(digest.clone());

        let artifact = Artifact {
            url: format!("memory://{}/{}/{}", source, name, filename),
            filename,
            hash: Some(digest),
        };

        let mut state = self.write();
        let releases = state.releases.entry((source.to_string(), name)).or_default();
        releases.retain(|r| r.release.version != release.version);
        releases.push(StoredRelease {
            release,
            artifact,
            content,
        });
        self
    }

    /// Restrict a published release to some interpreter versions
    pub fn set_requires_python(&self, name: &str, version: &str, constraint: &str) -> &Self {
        let constraint: MultiConstraint = constraint
            .parse()
            .unwrap_or_else(|e| panic!("invalid requires_python {}: {}", constraint, e));
        self.update_release(name, version, |stored| {
            stored.release.requires_python = Some(constraint.clone());
        });
        self
    }

    /// Serve different bytes for a release than the ones its hash describes
    pub fn tamper(&self, name: &str, version: &str, content: &[u8]) -> &Self {
        self.update_release(name, version, |stored| stored.content = content.to_vec());
        self
    }

    /// Make every request for `name` fail as if the index were down
    pub fn set_unavailable(&self, name: &str) -> &Self {
        self.write().unavailable.insert(parse_name(name));
        self
    }

    /// Delay answers for `name`
    pub fn set_delay(&self, name: &str, delay: Duration) -> &Self {
        self.write().delays.insert(parse_name(name), delay);
        self
    }

    /// Number of `releases` calls served so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn update_release(&self, name: &str, version: &str, mut f: impl FnMut(&mut StoredRelease)) {
        let name = parse_name(name);
        let version: Version = version
            .parse()
            .unwrap_or_else(|e| panic!("invalid fixture version {}: {}", version, e));
        let mut state = self.write();
        for ((_, package), releases) in state.releases.iter_mut() {
            if *package != name {
                continue;
            }
            for stored in releases.iter_mut().filter(|r| r.release.version == version) {
                f(stored);
            }
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check(&self, name: &PackageName) -> Result<Option<Duration>, MetadataError> {
        let state = self.read();
        if state.unavailable.contains(name) {
            return Err(MetadataError::Unavailable(format!("{} is unavailable", name)));
        }
        Ok(state.delays.get(name).copied())
    }
}

fn parse_name(name: &str) -> PackageName {
    PackageName::new(name).unwrap_or_else(|e| panic!("invalid fixture name: {}", e))
}

#[async_trait]
impl MetadataSource for InMemorySource {
    async fn releases(&self, source: &Source, name: &PackageName) -> Result<Vec<Release>, MetadataError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.check(name)? {
            tokio::time::sleep(delay).await;
        }

        let state = self.read();
        let releases = state
            .releases
            .get(&(source.name.clone(), name.clone()))
            .ok_or(MetadataError::NotFound)?;
        Ok(releases.iter().map(|r| r.release.clone()).collect())
    }

    async fn artifacts(
        &self,
        source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<Artifact>, MetadataError> {
        self.check(name)?;
        let state = self.read();
        let releases = state
            .releases
            .get(&(source.name.clone(), name.clone()))
            .ok_or(MetadataError::NotFound)?;
        Ok(releases
            .iter()
            .filter(|r| r.release.version == *version)
            .map(|r| r.artifact.clone())
            .collect())
    }
}

#[async_trait]
impl ArtifactFetcher for InMemorySource {
    async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, MetadataError> {
        let state = self.read();
        state
            .releases
            .values()
            .flatten()
            .find(|r| r.artifact.url == artifact.url)
            .map(|r| r.content.clone())
            .ok_or(MetadataError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_releases_per_source() {
        let source = InMemorySource::new();
        source.add("requests", "2.31.0", &["idna>=2.5"]);
        source.add_to("internal", "requests", "9.9.9", &[]);

        let name = PackageName::new("requests").unwrap();
        let pypi = source.releases(&Source::pypi(), &name).await.unwrap();
        assert_eq!(pypi.len(), 1);
        assert_eq!(pypi[0].dependencies[0].name.as_str(), "idna");
        assert_eq!(pypi[0].hashes.len(), 1);

        let internal = Source::new("internal", "https://internal.example/simple");
        let releases = source.releases(&internal, &name).await.unwrap();
        assert_eq!(releases[0].version, "9.9.9".parse::<Version>().unwrap());

        let missing = PackageName::new("missing").unwrap();
        assert_eq!(
            source.releases(&Source::pypi(), &missing).await,
            Err(MetadataError::NotFound)
        );
        assert_eq!(source.request_count(), 3);
    }

    #[tokio::test]
    async fn test_artifact_content_matches_hash_until_tampered() {
        let source = InMemorySource::new();
        source.add("six", "1.16.0", &[]);
        let name = PackageName::new("six").unwrap();
        let version: Version = "1.16.0".parse().unwrap();

        let releases = source.releases(&Source::pypi(), &name).await.unwrap();
        let artifacts = source.artifacts(&Source::pypi(), &name, &version).await.unwrap();
        let (release, artifact) = (&releases[0], &artifacts[0]);
        assert!(artifact.is_wheel());

        let content = source.fetch(artifact).await.unwrap();
        assert!(release.hashes.contains(&sha256_digest(&content)));

        source.tamper("six", "1.16.0", b"evil");
        let content = source.fetch(artifact).await.unwrap();
        assert!(!release.hashes.contains(&sha256_digest(&content)));
    }

    #[test]
    fn test_unavailable() {
        let source = InMemorySource::new();
        source.add("flaky", "1.0", &[]).set_unavailable("flaky");
        let name = PackageName::new("flaky").unwrap();
        assert!(matches!(
            tokio_test::block_on(source.releases(&Source::pypi(), &name)),
            Err(MetadataError::Unavailable(_))
        ));
    }
}
