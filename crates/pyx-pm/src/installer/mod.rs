//! Package installation.
//!
//! Installing here means fetching the artifact recorded in the lock,
//! checking it against the locked hash set and placing it into the target
//! directory. Nothing is built or unpacked.

mod manager;
mod wheelhouse;

pub use manager::{InstallResult, InstallationManager, InstalledRecord, INSTALLED_RECORD};
pub use wheelhouse::WheelhouseInstaller;

use std::path::PathBuf;

use async_trait::async_trait;
use pyx_pep440::{PackageName, Version};

use crate::pipfile::Source;
use crate::Result;

/// A locked package to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub name: PackageName,
    pub version: Version,
    pub source: Source,
    /// Locked digests, `sha256:<hex>`
    pub hashes: Vec<String>,
}

/// Bytes of one distribution file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub filename: String,
    pub content: Vec<u8>,
}

#[async_trait]
pub trait Installer: Send + Sync {
    /// Download a distribution file of `target`
    async fn fetch(&self, target: &InstallTarget) -> Result<FetchedArtifact>;

    /// Put verified bytes in place, returning where they went
    async fn place(&self, target: &InstallTarget, artifact: &FetchedArtifact) -> Result<PathBuf>;
}
