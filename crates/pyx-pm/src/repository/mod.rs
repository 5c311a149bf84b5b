//! Package metadata sources
//!
//! A [`MetadataSource`] answers "which versions of this package exist on
//! this index, and what does each depend on". The [`PoolLoader`] walks the
//! dependency graph through a source and produces the solver's pool.

mod loader;
mod memory;
mod pypi;

pub use loader::PoolLoader;
pub use memory::InMemorySource;
pub use pypi::{HttpFetcher, PypiSource};

use std::collections::BTreeSet;

use async_trait::async_trait;
use pyx_pep440::{MultiConstraint, PackageName, Requirement, Version};
use thiserror::Error;

use crate::pipfile::Source;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("package not found")]
    NotFound,
    #[error("{0}")]
    Unavailable(String),
}

/// One published version of a package
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub version: Version,
    pub dependencies: Vec<Requirement>,
    /// Digests of every distribution file, `sha256:<hex>`
    pub hashes: BTreeSet<String>,
    pub requires_python: Option<MultiConstraint>,
}

impl Release {
    pub fn new(version: Version) -> Self {
        Release {
            version,
            dependencies: Vec::new(),
            hashes: BTreeSet::new(),
            requires_python: None,
        }
    }
}

/// A downloadable distribution file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub filename: String,
    pub url: String,
    /// Digest published by the index, if any
    pub hash: Option<String>,
}

impl Artifact {
    pub fn is_wheel(&self) -> bool {
        self.filename.ends_with(".whl")
    }
}

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// All releases of `name` on `source`
    async fn releases(&self, source: &Source, name: &PackageName) -> Result<Vec<Release>, MetadataError>;

    /// Distribution files of one release
    async fn artifacts(
        &self,
        source: &Source,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<Artifact>, MetadataError>;
}

/// Downloads artifact bytes
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, artifact: &Artifact) -> Result<Vec<u8>, MetadataError>;
}
