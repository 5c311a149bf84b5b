//! Installation manager - verifies and records installs.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{InstallTarget, Installer};
use crate::error::{Error, Result};
use crate::util::{sha256_digest, write_atomic};

/// File in the target directory listing what has been installed
pub const INSTALLED_RECORD: &str = ".pyx-installed.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledRecord {
    pub version: String,
    pub file: String,
    pub hash: String,
}

/// Result of an installation run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InstallResult {
    /// `name==version` of every package placed by this run
    pub installed: Vec<String>,
    /// Packages already present at the locked version
    pub skipped: Vec<String>,
}

/// Runs an [`Installer`] with integrity checks.
///
/// Every fetched artifact is hashed before it is placed. A digest outside
/// the locked hash set aborts the run with [`Error::Integrity`]; the
/// offending artifact is neither placed nor recorded.
pub struct InstallationManager {
    installer: Arc<dyn Installer>,
    target_dir: PathBuf,
    dry_run: bool,
}

impl InstallationManager {
    pub fn new(installer: Arc<dyn Installer>, target_dir: PathBuf) -> Self {
        Self {
            installer,
            target_dir,
            dry_run: false,
        }
    }

    /// Report what would be installed without fetching anything
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Install `targets` in order
    pub async fn install(&self, targets: &[InstallTarget]) -> Result<InstallResult> {
        let mut result = InstallResult::default();
        let mut record = self.read_record()?;

        for target in targets {
            let id = format!("{}=={}", target.name, target.version);
            let version = target.version.to_string();
            let present = record.get(target.name.as_str()).is_some_and(|installed| {
                installed.version == version && self.target_dir.join(&installed.file).is_file()
            });
            if present {
                log::debug!("{} is already installed", id);
                result.skipped.push(id);
                continue;
            }
            if self.dry_run {
                result.installed.push(id);
                continue;
            }

            let artifact = self.installer.fetch(target).await?;
            let actual = sha256_digest(&artifact.content);
            if !target.hashes.contains(&actual) {
                log::warn!("Rejecting {} for {}: hash not in the lock", artifact.filename, id);
                return Err(Error::Integrity {
                    package: target.name.to_string(),
                    version,
                    actual,
                });
            }

            let placed = self.installer.place(target, &artifact).await?;
            log::info!("Installed {} ({})", id, placed.display());

            if let Some(previous) = record.get(target.name.as_str()) {
                if previous.file != artifact.filename {
                    let stale = self.target_dir.join(&previous.file);
                    if let Err(e) = fs::remove_file(&stale) {
                        if e.kind() != io::ErrorKind::NotFound {
                            log::warn!("Failed to remove {}: {}", stale.display(), e);
                        }
                    }
                }
            }
            record.insert(
                target.name.to_string(),
                InstalledRecord {
                    version,
                    file: artifact.filename.clone(),
                    hash: actual,
                },
            );
            self.write_record(&record)?;
            result.installed.push(id);
        }

        Ok(result)
    }

    /// Remove recorded packages, returning `name==version` of each one
    /// removed. Names without a record are ignored.
    pub fn uninstall(&self, names: &[String]) -> Result<Vec<String>> {
        let mut record = self.read_record()?;
        let mut removed = Vec::new();

        for name in names {
            let Some(installed) = record.get(name) else {
                log::debug!("{} is not installed", name);
                continue;
            };
            let id = format!("{}=={}", name, installed.version);
            if !self.dry_run {
                let path = self.target_dir.join(&installed.file);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                record.remove(name);
                self.write_record(&record)?;
                log::info!("Removed {}", id);
            }
            removed.push(id);
        }

        Ok(removed)
    }

    /// Installed packages by normalized name
    pub fn read_record(&self) -> Result<BTreeMap<String, InstalledRecord>> {
        match fs::read(self.target_dir.join(INSTALLED_RECORD)) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_record(&self, record: &BTreeMap<String, InstalledRecord>) -> Result<()> {
        let mut data = serde_json::to_vec_pretty(record)?;
        data.push(b'\n');
        write_atomic(&self.target_dir.join(INSTALLED_RECORD), &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::installer::FetchedArtifact;
    use crate::pipfile::Source;
    use async_trait::async_trait;
    use pyx_pep440::PackageName;
    use std::sync::Mutex;

    /// Serves fixed bytes and places them under the target directory
    struct FixedInstaller {
        content: Vec<u8>,
        dir: PathBuf,
        fetched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Installer for FixedInstaller {
        async fn fetch(&self, target: &InstallTarget) -> Result<FetchedArtifact> {
            self.fetched.lock().unwrap().push(target.name.to_string());
            Ok(FetchedArtifact {
                filename: format!("{}-{}-py3-none-any.whl", target.name, target.version),
                content: self.content.clone(),
            })
        }

        async fn place(&self, _target: &InstallTarget, artifact: &FetchedArtifact) -> Result<PathBuf> {
            let path = self.dir.join(&artifact.filename);
            write_atomic(&path, &artifact.content)?;
            Ok(path)
        }
    }

    fn target(hashes: Vec<String>) -> InstallTarget {
        InstallTarget {
            name: PackageName::new("six").unwrap(),
            version: "1.16.0".parse().unwrap(),
            source: Source::pypi(),
            hashes,
        }
    }

    fn manager(dir: &Path, content: &[u8]) -> (Arc<FixedInstaller>, InstallationManager) {
        let installer = Arc::new(FixedInstaller {
            content: content.to_vec(),
            dir: dir.to_path_buf(),
            fetched: Mutex::new(Vec::new()),
        });
        let manager = InstallationManager::new(installer.clone(), dir.to_path_buf());
        (installer, manager)
    }

    #[tokio::test]
    async fn test_install_records_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, manager) = manager(dir.path(), b"wheel");
        let targets = vec![target(vec![sha256_digest(b"wheel")])];

        let result = manager.install(&targets).await.unwrap();
        assert_eq!(result.installed, vec!["six==1.16.0"]);
        assert!(dir.path().join("six-1.16.0-py3-none-any.whl").is_file());
        assert_eq!(manager.read_record().unwrap()["six"].version, "1.16.0");

        let result = manager.install(&targets).await.unwrap();
        assert!(result.installed.is_empty());
        assert_eq!(result.skipped, vec!["six==1.16.0"]);
        assert_eq!(installer.fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hash_mismatch_places_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (_installer, manager) = manager(dir.path(), b"tampered");
        let targets = vec![target(vec![sha256_digest(b"wheel")])];

        let err = manager.install(&targets).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        match err {
            Error::Integrity { actual, .. } => assert_eq!(actual, sha256_digest(b"tampered")),
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!dir.path().join("six-1.16.0-py3-none-any.whl").exists());
        assert!(manager.read_record().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_uninstall() {
        let dir = tempfile::tempdir().unwrap();
        let (_installer, manager) = manager(dir.path(), b"wheel");
        manager.install(&[target(vec![sha256_digest(b"wheel")])]).await.unwrap();

        let planned = manager.dry_run(true).uninstall(&["six".to_string()]).unwrap();
        assert_eq!(planned, vec!["six==1.16.0"]);
        assert!(dir.path().join("six-1.16.0-py3-none-any.whl").is_file());

        let (_installer, manager) = self::manager(dir.path(), b"wheel");
        let removed = manager.uninstall(&["six".to_string(), "idna".to_string()]).unwrap();
        assert_eq!(removed, vec!["six==1.16.0"]);
        assert!(!dir.path().join("six-1.16.0-py3-none-any.whl").exists());
        assert!(manager.read_record().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let (installer, manager) = manager(dir.path(), b"wheel");
        let manager = manager.dry_run(true);
        let result = manager.install(&[target(vec![])]).await.unwrap();
        assert_eq!(result.installed, vec!["six==1.16.0"]);
        assert!(installer.fetched.lock().unwrap().is_empty());
    }
}
