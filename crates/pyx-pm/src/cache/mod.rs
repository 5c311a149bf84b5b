//! On-disk cache for package metadata and artifacts

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs4::fs_std::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

use crate::util::sha256_hex;

const WRITE_LOCK: &str = ".write-lock";

/// Filesystem cache keyed by arbitrary strings
///
/// Keys are hashed into a two-level directory layout
/// (`<root>/<first two hex digits>/<sha256>`), so any key is safe to use.
/// Reads never lock: entries only ever appear through an atomic rename, so
/// a reader sees either nothing or a complete file. Writers serialize on an
/// exclusive lock of the cache's write-lock file.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
    enabled: bool,
}

impl Cache {
    /// Create a new cache instance
    ///
    /// # Example
    /// ```no_run
    /// use std::path::PathBuf;
    /// use pyx_pm::cache::Cache;
    ///
    /// let cache = Cache::new(PathBuf::from("/tmp/pyx-cache"));
    /// ```
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            enabled: true,
        }
    }

    /// A cache that stores nothing and never hits
    pub fn disabled() -> Self {
        Self {
            root: PathBuf::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file backing a key
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = sha256_hex(key.as_bytes());
        self.root.join(&digest[..2]).join(digest)
    }

    pub fn has(&self, key: &str) -> bool {
        self.enabled && self.path_for(key).is_file()
    }

    /// Read an entry
    ///
    /// # Returns
    /// * `Ok(Some(data))` - Entry found
    /// * `Ok(None)` - Cache is disabled or key doesn't exist
    /// * `Err(e)` - IO error occurred
    pub fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        if !self.enabled {
            return Ok(None);
        }
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read and deserialize a JSON entry; unreadable entries count as misses
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = match self.read(key) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("Failed to read cache entry {}: {}", key, e);
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Ignoring corrupt cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Write an entry atomically
    pub fn write(&self, key: &str, data: &[u8]) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let path = self.path_for(key);
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&dir)?;

        let _lock = self.write_lock()?;
        let mut temp = NamedTempFile::new_in(&dir)?;
        temp.write_all(data)?;
        temp.as_file().sync_all()?;
        temp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn write_json<T: Serialize>(&self, key: &str, value: &T) -> io::Result<()> {
        let data = serde_json::to_vec(value).map_err(io::Error::other)?;
        self.write(key, &data)
    }

    pub fn remove(&self, key: &str) -> io::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let _lock = self.write_lock()?;
        match fs::remove_file(self.path_for(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Remove every entry
    pub fn clear(&self) -> io::Result<()> {
        if !self.enabled || !self.root.is_dir() {
            return Ok(());
        }
        let _lock = self.write_lock()?;
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else if path.file_name().is_some_and(|n| n != WRITE_LOCK) {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    /// Remove entries older than `ttl`, returning the number of bytes freed
    pub fn gc(&self, ttl: Duration) -> io::Result<u64> {
        if !self.enabled || !self.root.is_dir() {
            return Ok(0);
        }

        let _lock = self.write_lock()?;
        let now = SystemTime::now();
        let mut freed = 0u64;

        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let expired = metadata
                .modified()
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > ttl);
            if expired && fs::remove_file(entry.path()).is_ok() {
                freed += metadata.len();
            }
        }

        Ok(freed)
    }

    /// Total size of all entries in bytes
    pub fn size(&self) -> u64 {
        if !self.enabled {
            return 0;
        }
        WalkDir::new(&self.root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// SHA-256 of an entry's content
    pub fn sha256(&self, key: &str) -> io::Result<Option<String>> {
        Ok(self.read(key)?.map(|data| sha256_hex(&data)))
    }

    /// Exclusive lock held for the lifetime of the returned file
    fn write_lock(&self) -> io::Result<File> {
        fs::create_dir_all(&self.root)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(WRITE_LOCK))?;
        file.lock_exclusive()?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache() -> (TempDir, Cache) {
        let dir = TempDir::new().unwrap();
        let cache = Cache::new(dir.path().join("cache"));
        (dir, cache)
    }

    #[test]
    fn test_cache_read_write() {
        let (_dir, cache) = cache();
        assert_eq!(cache.read("pypi/requests/2.31.0").unwrap(), None);

        cache.write("pypi/requests/2.31.0", b"metadata").unwrap();
        assert!(cache.has("pypi/requests/2.31.0"));
        assert_eq!(
            cache.read("pypi/requests/2.31.0").unwrap(),
            Some(b"metadata".to_vec())
        );

        cache.write("pypi/requests/2.31.0", b"replaced").unwrap();
        assert_eq!(
            cache.read("pypi/requests/2.31.0").unwrap(),
            Some(b"replaced".to_vec())
        );
    }

    #[test]
    fn test_cache_key_layout() {
        let (_dir, cache) = cache();
        let path = cache.path_for("../../etc/passwd");
        assert!(path.starts_with(cache.root()));
        let file = path.file_name().unwrap().to_str().unwrap();
        let bucket = path.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(file.len(), 64);
        assert_eq!(bucket, &file[..2]);
    }

    #[test]
    fn test_cache_json() {
        let (_dir, cache) = cache();
        cache.write_json("k", &vec!["a", "b"]).unwrap();
        assert_eq!(cache.read_json::<Vec<String>>("k"), Some(vec!["a".into(), "b".into()]));

        cache.write("bad", b"{not json").unwrap();
        assert_eq!(cache.read_json::<Vec<String>>("bad"), None);
    }

    #[test]
    fn test_cache_remove_and_clear() {
        let (_dir, cache) = cache();
        cache.write("a", b"1").unwrap();
        cache.write("b", b"2").unwrap();

        cache.remove("a").unwrap();
        cache.remove("a").unwrap();
        assert!(!cache.has("a"));
        assert!(cache.has("b"));

        cache.clear().unwrap();
        assert!(!cache.has("b"));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn test_cache_gc() {
        let (_dir, cache) = cache();
        cache.write("old", b"12345").unwrap();
        assert_eq!(cache.gc(Duration::from_secs(3600)).unwrap(), 0);
        assert_eq!(cache.gc(Duration::ZERO).unwrap(), 5);
        assert!(!cache.has("old"));
    }

    #[test]
    fn test_cache_sha256() {
        let (_dir, cache) = cache();
        cache.write("k", b"hello").unwrap();
        assert_eq!(
            cache.sha256("k").unwrap().as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_disabled_cache() {
        let cache = Cache::disabled();
        cache.write("k", b"v").unwrap();
        assert_eq!(cache.read("k").unwrap(), None);
        assert!(!cache.has("k"));
    }
}
