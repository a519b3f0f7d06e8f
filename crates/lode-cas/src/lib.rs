//! # lode-cas
//!
//! Content addressing for lode: key derivation, the key → path sharding
//! function, and the on-disk object store.
//!
//! ## Directory Layout
//!
//! ```text
//! <git-dir>/annex/objects/
//! └── 5de/
//!     └── 9ee/
//!         └── SHA256E-s11--5eb7...c3cf/
//!             └── SHA256E-s11--5eb7...c3cf   # read-only content
//! ```

pub mod key;
pub mod protection;
pub mod shard;

pub use key::{
    derive_key, derive_key_for_file, key_extension, ContentKey, DEFAULT_CHUNK_SIZE, KEY_BACKEND,
};
pub use shard::{
    bucket_digest, buckets, key_from_link_target, key_from_metadata_path, metadata_path,
    short_digest, storage_path, Buckets, LOG_SUFFIX, OBJECTS_DIR,
};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use walkdir::WalkDir;

/// Errors that can occur during content-addressing operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Not a regular file: {0}")]
    NotAFile(PathBuf),

    #[error("Size mismatch for {name}: declared {declared} bytes, read {actual}")]
    SizeMismatch {
        name: String,
        declared: u64,
        actual: u64,
    },

    #[error("Object not found: {key}")]
    NotFound { key: String },

    #[error("Key mismatch: expected {expected}, got {actual}")]
    KeyMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, CasError>;

/// What [`ObjectStore::ingest`] did with the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    /// Source was moved into the store.
    Stored,
    /// The store already held this key; the source was removed.
    Deduplicated,
}

/// Object store rooted at `<git-dir>/annex/objects`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open an object store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Object store belonging to a repository metadata directory.
    pub fn for_git_dir(git_dir: &Path) -> Result<Self> {
        Self::new(git_dir.join(OBJECTS_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute location of the object for `key`, whether present or not.
    pub fn object_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(storage_path(key))
    }

    pub fn contains(&self, key: &ContentKey) -> bool {
        self.object_path(key).is_file()
    }

    /// Move `source` into the store under `key` and make it read-only.
    ///
    /// The caller derives `key` from `source`; the store does not rehash.
    /// If the object already exists the source is deleted instead, after
    /// checking its size against the key.
    #[instrument(skip(self), level = "debug", fields(key = %key))]
    pub fn ingest(&self, source: &Path, key: &ContentKey) -> Result<Ingest> {
        let dest = self.object_path(key);

        if dest.is_file() {
            let existing = fs::metadata(&dest)?.len();
            if existing != key.size() {
                return Err(CasError::SizeMismatch {
                    name: dest.display().to_string(),
                    declared: key.size(),
                    actual: existing,
                });
            }
            fs::remove_file(source)?;
            tracing::debug!(component = "CAS", "object already stored");
            return Ok(Ingest::Deduplicated);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Err(e) = fs::rename(source, &dest) {
            // Object root on another filesystem: copy through a temp name.
            tracing::debug!(component = "CAS", error = %e, "rename failed, copying");
            let temp_name = format!(
                "{}.{}.tmp",
                dest.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                std::process::id()
            );
            let temp_path = dest.with_file_name(temp_name);
            fs::copy(source, &temp_path)?;
            if let Err(e) = fs::rename(&temp_path, &dest) {
                let _ = fs::remove_file(&temp_path);
                return Err(CasError::Io(e));
            }
            fs::remove_file(source)?;
        }

        protection::freeze(&dest)?;
        Ok(Ingest::Stored)
    }

    /// Delete the object for `key` and its now-empty key directory.
    #[instrument(skip(self), level = "debug", fields(key = %key))]
    pub fn remove(&self, key: &ContentKey) -> Result<()> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(CasError::NotFound {
                key: key.to_string(),
            });
        }
        protection::thaw(&path)?;
        fs::remove_file(&path)?;
        if let Some(dir) = path.parent() {
            // Only succeeds when empty.
            let _ = fs::remove_dir(dir);
        }
        Ok(())
    }

    /// Re-derive the key of a stored object and compare it to `key`.
    pub fn verify(&self, key: &ContentKey, chunk_size: usize) -> Result<()> {
        let path = self.object_path(key);
        if !path.is_file() {
            return Err(CasError::NotFound {
                key: key.to_string(),
            });
        }
        let actual = derive_key_for_file(&path, chunk_size)?;
        if actual != *key {
            return Err(CasError::KeyMismatch {
                expected: key.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }

    /// All keys present in the store.
    ///
    /// Traverses `<outer>/<inner>/<key>/<key>`; anything else is ignored.
    pub fn keys(&self) -> Result<Vec<ContentKey>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(4).max_depth(4) {
            let entry = entry.map_err(|e| CasError::Io(io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match entry.path().strip_prefix(&self.root) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let Some(name) = entry.file_name().to_str() else {
                continue;
            };
            if let Ok(key) = ContentKey::parse(name) {
                if storage_path(&key) == rel {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Get statistics about the store.
    pub fn stats(&self) -> Result<ObjectStats> {
        let mut stats = ObjectStats::default();
        for key in self.keys()? {
            let size = fs::metadata(self.object_path(&key))?.len();
            stats.object_count += 1;
            stats.total_bytes += size;
            if size < 1024 {
                stats.small_objects += 1;
            } else if size < 1024 * 1024 {
                stats.medium_objects += 1;
            } else if size < 100 * 1024 * 1024 {
                stats.large_objects += 1;
            } else {
                stats.huge_objects += 1;
            }
        }
        Ok(stats)
    }
}

/// Statistics about the object store
#[derive(Debug, Clone, Default, Serialize)]
pub struct ObjectStats {
    /// Number of objects stored
    pub object_count: u64,
    /// Total bytes stored
    pub total_bytes: u64,
    /// Objects < 1KB
    pub small_objects: u64,
    /// Objects 1KB - 1MB
    pub medium_objects: u64,
    /// Objects 1MB - 100MB
    pub large_objects: u64,
    /// Objects > 100MB
    pub huge_objects: u64,
}

impl ObjectStats {
    pub fn avg_object_size(&self) -> u64 {
        if self.object_count == 0 {
            0
        } else {
            self.total_bytes / self.object_count
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_and_key(dir: &Path, name: &str, data: &[u8]) -> (PathBuf, ContentKey) {
        let path = dir.join(name);
        fs::write(&path, data).unwrap();
        let key = derive_key_for_file(&path, DEFAULT_CHUNK_SIZE).unwrap();
        (path, key)
    }

    #[test]
    fn test_ingest_moves_and_freezes() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(temp.path().join("objects")).unwrap();
        let (src, key) = write_and_key(temp.path(), "file1", b"file1 data\n");

        assert_eq!(store.ingest(&src, &key).unwrap(), Ingest::Stored);
        assert!(!src.exists());

        let obj = store.object_path(&key);
        assert!(obj.starts_with(store.root().join("5de").join("9ee")));
        assert_eq!(fs::read(&obj).unwrap(), b"file1 data\n");
        assert!(protection::is_frozen(&obj).unwrap());
        assert!(store.contains(&key));
    }

    #[test]
    fn test_ingest_deduplicates() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(temp.path().join("objects")).unwrap();

        let (a, key_a) = write_and_key(temp.path(), "a", b"same bytes");
        let (b, key_b) = write_and_key(temp.path(), "b", b"same bytes");
        assert_eq!(key_a, key_b);

        assert_eq!(store.ingest(&a, &key_a).unwrap(), Ingest::Stored);
        assert_eq!(store.ingest(&b, &key_b).unwrap(), Ingest::Deduplicated);
        assert!(!b.exists());
        assert_eq!(store.stats().unwrap().object_count, 1);
    }

    #[test]
    fn test_remove() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(temp.path().join("objects")).unwrap();
        let (src, key) = write_and_key(temp.path(), "f.txt", b"to be dropped");
        store.ingest(&src, &key).unwrap();

        store.remove(&key).unwrap();
        assert!(!store.contains(&key));
        assert!(!store.object_path(&key).parent().unwrap().exists());
        assert!(matches!(store.remove(&key), Err(CasError::NotFound { .. })));
    }

    #[test]
    fn test_verify_detects_tampering() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(temp.path().join("objects")).unwrap();
        let (src, key) = write_and_key(temp.path(), "f.bin", b"original!");
        store.ingest(&src, &key).unwrap();
        store.verify(&key, DEFAULT_CHUNK_SIZE).unwrap();

        let obj = store.object_path(&key);
        protection::thaw(&obj).unwrap();
        fs::write(&obj, b"tampered!").unwrap();
        assert!(matches!(
            store.verify(&key, DEFAULT_CHUNK_SIZE),
            Err(CasError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn test_keys_and_stats() {
        let temp = TempDir::new().unwrap();
        let store = ObjectStore::new(temp.path().join("objects")).unwrap();

        let mut expected = Vec::new();
        for (name, data) in [("one", &b"1"[..]), ("two.txt", b"22"), ("three.a.b", b"333")] {
            let (src, key) = write_and_key(temp.path(), name, data);
            store.ingest(&src, &key).unwrap();
            expected.push(key);
        }
        expected.sort();

        // Stray files are not objects.
        fs::write(store.root().join("stray"), "x").unwrap();

        assert_eq!(store.keys().unwrap(), expected);
        let stats = store.stats().unwrap();
        assert_eq!(stats.object_count, 3);
        assert_eq!(stats.total_bytes, 6);
        assert_eq!(stats.small_objects, 3);
        assert_eq!(stats.avg_object_size(), 2);
    }
}
