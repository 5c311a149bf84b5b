use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::{FetchedArtifact, InstallTarget, Installer};
use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::repository::{Artifact, ArtifactFetcher, MetadataError, MetadataSource};
use crate::util::{sha256_digest, write_atomic};

/// Downloads distribution files into a flat directory of wheels.
///
/// Among a release's files, those whose published digest is in the locked
/// hash set are tried first, wheels before source archives. Downloads go
/// through the artifact cache keyed by digest.
pub struct WheelhouseInstaller {
    source: Arc<dyn MetadataSource>,
    fetcher: Arc<dyn ArtifactFetcher>,
    cache: Cache,
    target_dir: PathBuf,
}

impl WheelhouseInstaller {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        fetcher: Arc<dyn ArtifactFetcher>,
        target_dir: PathBuf,
    ) -> Self {
        Self {
            source,
            fetcher,
            cache: Cache::disabled(),
            target_dir,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = cache;
        self
    }

    fn pick(target: &InstallTarget, mut artifacts: Vec<Artifact>) -> Option<Artifact> {
        artifacts.sort_by(|a, b| {
            let rank = |artifact: &Artifact| {
                let locked = artifact
                    .hash
                    .as_ref()
                    .is_some_and(|h| target.hashes.contains(h));
                (!locked, !artifact.is_wheel())
            };
            rank(a).cmp(&rank(b)).then_with(|| a.filename.cmp(&b.filename))
        });
        artifacts.into_iter().next()
    }

    fn unavailable(target: &InstallTarget, err: MetadataError) -> Error {
        Error::MetadataUnavailable {
            package: target.name.to_string(),
            reason: match err {
                MetadataError::NotFound => format!("{} is not published on {}", target.version, target.source.name),
                MetadataError::Unavailable(reason) => reason,
            },
        }
    }
}

#[async_trait]
impl Installer for WheelhouseInstaller {
    async fn fetch(&self, target: &InstallTarget) -> Result<FetchedArtifact> {
        let artifacts = self
            .source
            .artifacts(&target.source, &target.name, &target.version)
            .await
            .map_err(|e| Self::unavailable(target, e))?;
        let artifact = Self::pick(target, artifacts)
            .ok_or_else(|| Self::unavailable(target, MetadataError::NotFound))?;

        let key = artifact.hash.clone().map(|hash| format!("artifact/{}", hash));
        if let Some(key) = &key {
            match self.cache.read(key) {
                Ok(Some(content)) => {
                    log::debug!("Using cached {}", artifact.filename);
                    return Ok(FetchedArtifact {
                        filename: artifact.filename,
                        content,
                    });
                }
                Ok(None) => {}
                Err(e) => log::warn!("Failed to read cached {}: {}", artifact.filename, e),
            }
        }

        let content = self
            .fetcher
            .fetch(&artifact)
            .await
            .map_err(|e| Self::unavailable(target, e))?;

        // only content matching its published digest is worth caching
        if let (Some(key), Some(hash)) = (&key, &artifact.hash) {
            if sha256_digest(&content) == *hash {
                if let Err(e) = self.cache.write(key, &content) {
                    log::warn!("Failed to cache {}: {}", artifact.filename, e);
                }
            }
        }

        Ok(FetchedArtifact {
            filename: artifact.filename,
            content,
        })
    }

    async fn place(&self, target: &InstallTarget, artifact: &FetchedArtifact) -> Result<PathBuf> {
        if !is_plain_file_name(&artifact.filename) {
            return Err(Error::MetadataUnavailable {
                package: target.name.to_string(),
                reason: format!("the index names its file {:?}, which is not a plain file name", artifact.filename),
            });
        }
        let path = self.target_dir.join(&artifact.filename);
        write_atomic(&path, &artifact.content)?;
        Ok(path)
    }
}

/// A single path component, so joining it cannot leave the target directory
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipfile::Source;
    use crate::repository::InMemorySource;
    use pyx_pep440::PackageName;

    fn target(hashes: Vec<String>) -> InstallTarget {
        InstallTarget {
            name: PackageName::new("six").unwrap(),
            version: "1.16.0".parse().unwrap(),
            source: Source::pypi(),
            hashes,
        }
    }

    #[test]
    fn test_pick_prefers_locked_wheels() {
        let artifact = |filename: &str, hash: &str| Artifact {
            filename: filename.to_string(),
            url: format!("https://files/{}", filename),
            hash: Some(hash.to_string()),
        };
        let artifacts = vec![
            artifact("six-1.16.0.tar.gz", "sha256:sdist"),
            artifact("six-1.16.0-py2-none-any.whl", "sha256:other"),
            artifact("six-1.16.0-py3-none-any.whl", "sha256:wheel"),
        ];

        let locked = target(vec!["sha256:sdist".into(), "sha256:wheel".into()]);
        let picked = WheelhouseInstaller::pick(&locked, artifacts.clone()).unwrap();
        assert_eq!(picked.filename, "six-1.16.0-py3-none-any.whl");

        let sdist_only = target(vec!["sha256:sdist".into()]);
        let picked = WheelhouseInstaller::pick(&sdist_only, artifacts).unwrap();
        assert_eq!(picked.filename, "six-1.16.0.tar.gz");
    }

    #[tokio::test]
    async fn test_fetch_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(InMemorySource::new());
        source.add("six", "1.16.0", &[]);
        let installer = WheelhouseInstaller::new(source.clone(), source.clone(), dir.path().join("site"))
            .with_cache(Cache::new(dir.path().join("cache")));

        let releases = source
            .releases(&Source::pypi(), &PackageName::new("six").unwrap())
            .await
            .unwrap();
        let release = &releases[0];
        let locked = target(release.hashes.iter().cloned().collect());

        let first = installer.fetch(&locked).await.unwrap();
        assert!(release.hashes.contains(&sha256_digest(&first.content)));

        // the cache now answers even when the index serves other bytes
        source.tamper("six", "1.16.0", b"evil");
        let second = installer.fetch(&locked).await.unwrap();
        assert_eq!(second.content, first.content);

        let placed = installer.place(&locked, &second).await.unwrap();
        assert!(placed.starts_with(dir.path().join("site")));
        assert!(placed.is_file());
    }

    #[tokio::test]
    async fn test_place_rejects_path_like_names() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(InMemorySource::new());
        let installer = WheelhouseInstaller::new(source.clone(), source, dir.path().join("site"));

        for filename in ["../six.whl", "nested/six.whl", "..\\six.whl", "..", "", "/tmp/six.whl"] {
            let artifact = FetchedArtifact {
                filename: filename.to_string(),
                content: b"wheel".to_vec(),
            };
            let err = installer.place(&target(vec![]), &artifact).await.unwrap_err();
            assert_eq!(err.kind(), crate::error::ErrorKind::MetadataUnavailable, "{}", filename);
        }
        assert!(!dir.path().join("six.whl").exists());

        let artifact = FetchedArtifact {
            filename: "six-1.16.0-py3-none-any.whl".to_string(),
            content: b"wheel".to_vec(),
        };
        assert!(installer.place(&target(vec![]), &artifact).await.unwrap().is_file());
    }

    #[tokio::test]
    async fn test_missing_release_is_unavailable() {
        let source = Arc::new(InMemorySource::new());
        let installer = WheelhouseInstaller::new(source.clone(), source, PathBuf::from("unused"));
        let err = installer.fetch(&target(vec![])).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MetadataUnavailable);
    }
}
