//! PyPI-compatible JSON API client

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use pyx_pep440::{MultiConstraint, PackageName, Requirement, Version};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{Artifact, ArtifactFetcher, MetadataError, MetadataSource, Release};
use crate::cache::Cache;
use crate::config::Config;
use crate::error::Result;
use crate::pipfile::Source;

const USER_AGENT: &str = concat!("pyx/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    releases: BTreeMap<String, Vec<FileInfo>>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    info: VersionInfo,
    #[serde(default)]
    urls: Vec<FileInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionInfo {
    #[serde(default)]
    requires_dist: Option<Vec<String>>,
    #[serde(default)]
    requires_python: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct FileInfo {
    filename: String,
    url: String,
    #[serde(default)]
    digests: Digests,
    #[serde(default)]
    yanked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Digests {
    #[serde(default)]
    sha256: Option<String>,
}

/// What one published version declares; immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VersionRecord {
    requires_dist: Vec<String>,
    requires_python: Option<String>,
    files: Vec<FileInfo>,
}

impl VersionRecord {
    fn into_release(self, name: &PackageName, version: Version) -> Release {
        let mut release = Release::new(version);
        for raw in &self.requires_dist {
            match raw.parse::<Requirement>() {
                Ok(requirement) => release.dependencies.push(requirement),
                Err(e) => log::debug!("Ignoring dependency \"{}\" of {}: {}", raw, name, e),
            }
        }
        release.hashes = self
            .files
            .iter()
            .filter(|f| !f.yanked)
            .filter_map(|f| f.digests.sha256.as_ref())
            .map(|hex| format!("sha256:{}", hex))
            .collect();
        release.requires_python = self
            .requires_python
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<MultiConstraint>().ok());
        release
    }
}

/// Root of the JSON API for a simple index URL
/// (`https://pypi.org/simple` -> `https://pypi.org`)
fn api_base(index_url: &str) -> String {
    let trimmed = index_url.trim_end_matches('/');
    trimmed
        .strip_suffix("/simple")
        .unwrap_or(trimmed)
        .to_string()
}

/// Metadata from indexes speaking the PyPI JSON API.
///
/// Version listings are fetched once per run; per-version metadata is
/// written to the disk cache since a published version never changes.
pub struct PypiSource {
    client: Client,
    insecure: Client,
    cache: Cache,
    max_workers: usize,
    records: Mutex<HashMap<String, VersionRecord>>,
}

impl PypiSource {
    pub fn new(config: &Config) -> Result<Self> {
        let cache = match &config.cache_dir {
            Some(dir) => Cache::new(dir.join("metadata")),
            None => Cache::disabled(),
        };
        Ok(PypiSource {
            client: build_client(config.fetch_timeout, false)?,
            insecure: build_client(config.fetch_timeout, true)?,
            cache,
            max_workers: config.max_workers.max(1),
            records: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, source: &Source) -> &Client {
        if source.verify_ssl {
            &self.client
        } else {
            &self.insecure
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        source: &Source,
        url: &str,
    ) -> std::result::Result<T, MetadataError> {
        log::debug!("GET {}", url);
        let response = self
            .client_for(source)
            .get(url)
            .send()
            .await
            .map_err(|e| MetadataError::Unavailable(format!("request to {} failed: {}", url, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(MetadataError::NotFound),
            status if !status.is_success() => Err(MetadataError::Unavailable(format!(
                "{} returned HTTP {}",
                url, status
            ))),
            _ => response
                .json()
                .await
                .map_err(|e| MetadataError::Unavailable(format!("invalid response from {}: {}", url, e))),
        }
    }

    async fn version_record(
        &self,
        source: &Source,
        name: &PackageName,
        version: &str,
    ) -> std::result::Result<VersionRecord, MetadataError> {
        let key = format!("{}/{}/{}", api_base(&source.url), name, version);
        if let Some(record) = self.lock_records().get(&key) {
            return Ok(record.clone());
        }
        if let Some(record) = self.cache.read_json::<VersionRecord>(&key) {
            self.lock_records().insert(key, record.clone());
            return Ok(record);
        }

        let url = format!("{}/pypi/{}/{}/json", api_base(&source.url), name, version);
        let response: VersionResponse = self.get_json(source, &url).await?;
        let record = VersionRecord {
            requires_dist: response.info.requires_dist.unwrap_or_default(),
            requires_python: response.info.requires_python,
            files: response.urls,
        };
        if let Err(e) = self.cache.write_json(&key, &record) {
            log::warn!("Failed to cache metadata of {} {}: {}", name, version, e);
        }
        self.lock_records().insert(key, record.clone());
        Ok(record)
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<String, VersionRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn build_client(timeout: Duration, insecure: bool) -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .danger_accept_invalid_certs(insecure)
        .build()?)
}

#[async_trait]
impl MetadataSource for PypiSource {
    async fn releases(&self, source: &Source, name: &PackageName) -> std::result::Result<Vec<Release>, MetadataError> {
        let url = format!("{}/pypi/{}/json", api_base(&source.url), name);
        let project: ProjectResponse = self.get_json(source, &url).await?;

        let versions: Vec<(String, Version)> = project
            .releases
            .into_iter()
            .filter(|(_, files)| files.iter().any(|f| !f.yanked))
            .filter_map(|(raw, _)| match raw.parse::<Version>() {
                Ok(version) => Some((raw, version)),
                Err(_) => {
                    log::debug!("Ignoring unparseable version {} of {}", raw, name);
                    None
                }
            })
            .collect();

        let records: Vec<_> = stream::iter(versions)
            .map(|(raw, version)| async move {
                let record = self.version_record(source, name, &raw).await;
                (version, record)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut releases = Vec::with_capacity(records.len());
        for (version, record) in records {
            match record {
                Ok(record) => releases.push(record.into_release(name, version)),
                Err(MetadataError::NotFound) => {
                    log::debug!("{} {} disappeared from {}", name, version, source.name)
                }
                Err(e) => return Err(e),
            }
        }
        releases.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(releases)
    }

    async fn artifacts(
        &self,
        source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> std::result::Result<Vec<Artifact>, MetadataError> {
        let record = self.version_record(source, name, &version.to_string()).await?;
        Ok(record
            .files
            .into_iter()
            .filter(|f| !f.yanked)
            .map(|f| Artifact {
                hash: f.digests.sha256.map(|hex| format!("sha256:{}", hex)),
                filename: f.filename,
                url: f.url,
            })
            .collect())
    }
}

/// Downloads artifacts over HTTP(S), or reads them for `file://` URLs
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(HttpFetcher {
            client: build_client(config.fetch_timeout, false)?,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, artifact: &Artifact) -> std::result::Result<Vec<u8>, MetadataError> {
        let url = Url::parse(&artifact.url)
            .map_err(|e| MetadataError::Unavailable(format!("invalid URL {}: {}", artifact.url, e)))?;

        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| MetadataError::Unavailable(format!("invalid file URL {}", url)))?;
            return tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => MetadataError::NotFound,
                _ => MetadataError::Unavailable(format!("{}: {}", path.display(), e)),
            });
        }

        log::debug!("Downloading {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| MetadataError::Unavailable(format!("download of {} failed: {}", url, e)))?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(MetadataError::NotFound),
            status if !status.is_success() => Err(MetadataError::Unavailable(format!(
                "{} returned HTTP {}",
                url, status
            ))),
            _ => response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .map_err(|e| MetadataError::Unavailable(format!("download of {} failed: {}", url, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_base() {
        assert_eq!(api_base("https://pypi.org/simple"), "https://pypi.org");
        assert_eq!(api_base("https://pypi.org/simple/"), "https://pypi.org");
        assert_eq!(api_base("https://devpi.example/root/pypi"), "https://devpi.example/root/pypi");
    }

    #[test]
    fn test_version_response_into_release() {
        let body = r#"{
            "info": {
                "requires_dist": ["idna<4,>=2.5", "PySocks!=1.5.7,>=1.5.6; extra == \"socks\"", "not a requirement ((("],
                "requires_python": ">=3.7"
            },
            "urls": [
                {"filename": "requests-2.31.0-py3-none-any.whl", "url": "https://files/requests.whl",
                 "digests": {"sha256": "aa"}, "yanked": false},
                {"filename": "requests-2.31.0.tar.gz", "url": "https://files/requests.tar.gz",
                 "digests": {"sha256": "bb"}, "yanked": true}
            ]
        }"#;
        let response: VersionResponse = serde_json::from_str(body).unwrap();
        let record = VersionRecord {
            requires_dist: response.info.requires_dist.unwrap_or_default(),
            requires_python: response.info.requires_python,
            files: response.urls,
        };

        let name = PackageName::new("requests").unwrap();
        let release = record.into_release(&name, "2.31.0".parse().unwrap());
        assert_eq!(release.dependencies.len(), 2);
        assert_eq!(release.dependencies[1].name.as_str(), "pysocks");
        assert!(release.dependencies[1].marker.is_some());
        assert_eq!(release.hashes.iter().collect::<Vec<_>>(), vec!["sha256:aa"]);
        let requires_python = release.requires_python.unwrap();
        assert!(requires_python.matches(&"3.12".parse().unwrap()));
        assert!(!requires_python.matches(&"3.6".parse().unwrap()));
    }

    #[test]
    fn test_project_response_tolerates_missing_fields() {
        let project: ProjectResponse =
            serde_json::from_str(r#"{"info": {}, "releases": {"1.0": [{"filename": "a.whl", "url": "u"}], "2.0": []}}"#)
                .unwrap();
        assert_eq!(project.releases.len(), 2);
        assert_eq!(project.releases["1.0"][0].digests, Digests::default());
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg-1.0-py3-none-any.whl");
        std::fs::write(&path, b"wheel").unwrap();

        let mut config = Config::default();
        config.cache_dir = None;
        let fetcher = HttpFetcher::new(&config).unwrap();
        let artifact = Artifact {
            filename: "pkg-1.0-py3-none-any.whl".to_string(),
            url: Url::from_file_path(&path).unwrap().to_string(),
            hash: None,
        };
        assert_eq!(fetcher.fetch(&artifact).await.unwrap(), b"wheel");

        let missing = Artifact {
            url: Url::from_file_path(dir.path().join("missing.whl")).unwrap().to_string(),
            ..artifact
        };
        assert_eq!(fetcher.fetch(&missing).await, Err(MetadataError::NotFound));
    }
}
