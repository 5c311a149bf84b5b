//! `Pipfile.lock`: the concrete, hash-pinned result of a resolution
//!
//! The document is JSON with every object's keys sorted, four-space
//! indentation and a trailing newline, so equal locks are byte-identical.

mod canonicalizer;
mod fingerprint;
mod requirements;

pub use canonicalizer::{canonical_marker, canonicalize, origin_entry};
pub use fingerprint::{fingerprint, is_stale};
pub use requirements::requirements;

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::LockWait;
use crate::error::{Error, Result};
use crate::pipfile::{Requires, Source, SpecifierModel};
use crate::util::write_atomic;

pub const LOCK_FILE: &str = "Pipfile.lock";

/// Lock format version written to `_meta.pipfile-spec`
pub const PIPFILE_SPEC: u32 = 6;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHash {
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMeta {
    pub hash: LockHash,
    #[serde(rename = "pipfile-spec")]
    pub pipfile_spec: u32,
    #[serde(default)]
    pub requires: Requires,
    #[serde(default)]
    pub sources: Vec<Source>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// One locked package of one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    #[serde(default, skip_serializing_if = "is_false")]
    pub editable: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markers: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bzr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl LockedPackage {
    /// Pinned version without the leading `==`
    pub fn pinned_version(&self) -> Option<&str> {
        self.version.as_deref().map(|v| v.trim_start_matches("=="))
    }

    /// Whether the entry comes from a VCS checkout, a path or a file URL
    pub fn is_origin(&self) -> bool {
        self.git.is_some()
            || self.hg.is_some()
            || self.svn.is_some()
            || self.bzr.is_some()
            || self.path.is_some()
            || self.file.is_some()
    }
}

/// Locked entries of one category, keyed by normalized name
pub type LockedCategory = BTreeMap<String, LockedPackage>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockDocument {
    #[serde(rename = "_meta")]
    pub meta: LockMeta,
    #[serde(flatten)]
    pub categories: BTreeMap<String, LockedCategory>,
}

impl LockDocument {
    /// An empty lock carrying the model's fingerprint, sources and requires
    pub fn new(model: &SpecifierModel) -> Self {
        LockDocument {
            meta: LockMeta {
                hash: LockHash {
                    sha256: fingerprint(model),
                },
                pipfile_spec: PIPFILE_SPEC,
                requires: model.requires.clone(),
                sources: model.effective_sources(),
            },
            categories: BTreeMap::new(),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.meta.hash.sha256
    }

    pub fn category(&self, name: &str) -> Option<&LockedCategory> {
        self.categories.get(name)
    }

    pub fn get(&self, category: &str, name: &str) -> Option<&LockedPackage> {
        self.categories.get(category).and_then(|c| c.get(name))
    }

    pub fn set_category(&mut self, name: impl Into<String>, entries: LockedCategory) {
        self.categories.insert(name.into(), entries);
    }

    /// Refresh the metadata after the model changed
    pub fn update_meta(&mut self, model: &SpecifierModel) {
        self.meta = LockDocument::new(model).meta;
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Read the lock at `path`; `None` if there is none
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Canonical serialization
    pub fn to_json(&self) -> Result<String> {
        // going through Value sorts every object's keys
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        value.serialize(&mut serializer)?;
        out.push(b'\n');
        String::from_utf8(out).map_err(|e| Error::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Write atomically while holding the advisory lock next to `path`
    pub fn save(&self, path: &Path, wait: LockWait) -> Result<()> {
        let content = self.to_json()?;
        let _guard = WriteGuard::acquire(path, wait)?;
        write_atomic(path, content.as_bytes())?;
        log::debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Advisory lock on `<lock file>.lock`, released on drop
pub struct WriteGuard {
    _file: File,
}

impl WriteGuard {
    pub fn acquire(path: &Path, wait: LockWait) -> Result<Self> {
        let guard_path = guard_path(path);
        if let Some(dir) = guard_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&guard_path)?;

        match wait {
            LockWait::Block => file.lock_exclusive()?,
            LockWait::FailFast => {
                if let Err(e) = file.try_lock_exclusive() {
                    log::debug!("Could not lock {}: {}", guard_path.display(), e);
                    return Err(Error::LockBusy(path.to_path_buf()));
                }
            }
        }
        Ok(WriteGuard { _file: file })
    }
}

fn guard_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| LOCK_FILE.into());
    name.push(".lock");
    path.with_file_name(name)
}
