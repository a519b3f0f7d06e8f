//! Content key derivation.
//!
//! A key names content by backend, byte size and SHA-256 digest, with the
//! original file's extension kept as a cosmetic suffix:
//!
//! ```text
//! SHA256E-s11--5eb788ac...bedc3cf
//! SHA256E-s19--4a564ca1...87849d0.foo.bar
//! ```
//!
//! Two files with identical bytes produce the same key body regardless of
//! their names; only the suffix may differ.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::{CasError, Result};

/// Backend tag for SHA-256 keys that carry an extension suffix.
pub const KEY_BACKEND: &str = "SHA256E";

/// Default read size when streaming a file through the hasher.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Maximum number of dot-separated name components kept as extension.
const MAX_EXTENSION_PARTS: usize = 2;

/// Identifier of a piece of content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey {
    backend: String,
    size: u64,
    digest: String,
    extension: Option<String>,
}

impl ContentKey {
    /// Build a `SHA256E` key from its parts.
    pub fn new(size: u64, digest: impl Into<String>, extension: Option<String>) -> Self {
        Self {
            backend: KEY_BACKEND.to_string(),
            size,
            digest: digest.into(),
            extension: extension.filter(|e| is_key_extension(e)),
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Parse a key string such as `SHA256E-s11--<hex>.txt`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || CasError::MalformedKey(s.to_string());

        if s.is_empty() || s.contains('/') || s.chars().any(char::is_whitespace) {
            return Err(malformed());
        }

        let (head, tail) = s.split_once("--").ok_or_else(malformed)?;
        let (backend, size) = head.rsplit_once("-s").ok_or_else(malformed)?;
        if backend.is_empty() || !backend.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(malformed());
        }
        let size: u64 = size.parse().map_err(|_| malformed())?;

        let (digest, extension) = match tail.split_once('.') {
            Some((digest, ext)) if is_key_extension(ext) => (digest, Some(ext.to_string())),
            Some(_) => return Err(malformed()),
            None => (tail, None),
        };
        if digest.is_empty() || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(malformed());
        }
        if backend.starts_with("SHA256") && digest.len() != 64 {
            return Err(malformed());
        }

        Ok(Self {
            backend: backend.to_string(),
            size,
            digest: digest.to_string(),
            extension,
        })
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-s{}--{}", self.backend, self.size, self.digest)?;
        if let Some(ext) = &self.extension {
            write!(f, ".{}", ext)?;
        }
        Ok(())
    }
}

impl FromStr for ContentKey {
    type Err = CasError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentKey {
    type Error = CasError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.to_string()
    }
}

/// One dot-separated extension component: ASCII letters and digits only.
fn is_extension_part(part: &str) -> bool {
    !part.is_empty() && part.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Whether `ext` may follow the digest of a key. Keys made elsewhere may
/// carry more parts than derivation keeps.
fn is_key_extension(ext: &str) -> bool {
    ext.split('.').all(is_extension_part)
}

/// Extension kept in a key for the given file name: the trailing run of
/// alphanumeric dot-separated components, at most two of them, `None` when
/// there is none.
pub fn key_extension(name: &str) -> Option<String> {
    let mut parts: Vec<&str> = name.rsplitn(MAX_EXTENSION_PARTS + 1, '.').collect();
    if parts.len() < 2 {
        return None;
    }
    // Last element is the stem.
    parts.pop();
    let mut kept: Vec<&str> = parts.into_iter().take_while(|p| is_extension_part(p)).collect();
    if kept.is_empty() {
        return None;
    }
    kept.reverse();
    Some(kept.join("."))
}

/// Derive a key by streaming `reader` through SHA-256 in `chunk_size` reads.
///
/// Fails with [`CasError::SizeMismatch`] when the stream yields a different
/// number of bytes than `declared_size`.
pub fn derive_key<R: Read>(
    mut reader: R,
    declared_size: u64,
    name: &str,
    chunk_size: usize,
) -> Result<ContentKey> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut read_total = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(CasError::Io(e)),
        };
        hasher.update(&buf[..n]);
        read_total += n as u64;
    }

    if read_total != declared_size {
        return Err(CasError::SizeMismatch {
            name: name.to_string(),
            declared: declared_size,
            actual: read_total,
        });
    }

    Ok(ContentKey::new(
        declared_size,
        hex::encode(hasher.finalize()),
        key_extension(name),
    ))
}

/// Derive the key of a file on disk.
///
/// The size is taken from `stat` before hashing and checked again afterwards,
/// so a file that changes while being hashed is rejected instead of producing
/// a key that describes neither version.
#[instrument(level = "debug", fields(path = %path.display()))]
pub fn derive_key_for_file(path: &Path, chunk_size: usize) -> Result<ContentKey> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| CasError::NotAFile(path.to_path_buf()))?;

    let meta = fs::metadata(path)?;
    if !meta.is_file() {
        return Err(CasError::NotAFile(path.to_path_buf()));
    }
    let declared = meta.len();

    let file = File::open(path)?;
    let key = derive_key(file, declared, &name, chunk_size)?;

    let after = fs::metadata(path)?.len();
    if after != declared {
        return Err(CasError::SizeMismatch {
            name,
            declared,
            actual: after,
        });
    }

    tracing::debug!(component = "KEY", key = %key, "derived key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    const FILE1_KEY: &str =
        "SHA256E-s11--5eb788ac2bded6ce7112e44d68228bfecb3e569d1d745c78e1275986bbedc3cf";

    fn key_of(data: &[u8], name: &str) -> ContentKey {
        derive_key(Cursor::new(data), data.len() as u64, name, DEFAULT_CHUNK_SIZE).unwrap()
    }

    #[test]
    fn test_key_without_extension() {
        assert_eq!(key_of(b"file1 data\n", "file1").to_string(), FILE1_KEY);
    }

    #[test]
    fn test_compound_extension_keeps_last_two_parts() {
        let key = key_of(b"file3.foo.bar data\n", "file3.foo.bar");
        assert_eq!(key.extension(), Some("foo.bar"));
        assert!(key.to_string().ends_with(".foo.bar"));

        let key = key_of(b"file4.foo.bar.123 data\n", "file4.foo.bar.123");
        assert_eq!(
            key.to_string(),
            "SHA256E-s23--3b7a5fdf8072bbeefdf733b6fe88b85343343148e0e2b856a09de3267eeec406.bar.123"
        );
    }

    #[test]
    fn test_key_extension_edge_cases() {
        assert_eq!(key_extension("file1"), None);
        assert_eq!(key_extension("file2.txt").as_deref(), Some("txt"));
        assert_eq!(key_extension(".bashrc").as_deref(), Some("bashrc"));
        assert_eq!(key_extension("trailing."), None);
        assert_eq!(key_extension("a..b").as_deref(), Some("b"));
        assert_eq!(key_extension("notes.draft-2").as_deref(), None);
        assert_eq!(key_extension("photo.été.jpg").as_deref(), Some("jpg"));
    }

    #[test]
    fn test_extension_parts_with_spaces_are_dropped() {
        let key = key_of(b"video bytes", "holiday.2024 trip.mp4");
        assert_eq!(key.extension(), Some("mp4"));
        assert_eq!(ContentKey::parse(&key.to_string()).unwrap(), key);
        assert_eq!(key_extension("holiday.summer trip").as_deref(), None);
    }

    #[test]
    fn test_new_ignores_extension_parse_would_reject() {
        let digest = &FILE1_KEY["SHA256E-s11--".len()..];
        let key = ContentKey::new(11, digest, Some("a b".to_string()));
        assert_eq!(key.to_string(), FILE1_KEY);
        let key = ContentKey::new(11, digest, Some("foo.bar".to_string()));
        assert_eq!(key.extension(), Some("foo.bar"));
    }

    #[test]
    fn test_same_bytes_same_body() {
        let a = key_of(b"same", "one.txt");
        let b = key_of(b"same", "two.dat");
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.size(), b.size());
        assert_ne!(a, b);
    }

    #[test]
    fn test_chunking_does_not_change_key() {
        let data = vec![7u8; 100_000];
        let small = derive_key(Cursor::new(&data), data.len() as u64, "x.bin", 3).unwrap();
        let large = derive_key(Cursor::new(&data), data.len() as u64, "x.bin", 1 << 20).unwrap();
        assert_eq!(small, large);
    }

    #[test]
    fn test_declared_size_mismatch() {
        let result = derive_key(Cursor::new(b"abc"), 4, "f", DEFAULT_CHUNK_SIZE);
        assert!(matches!(
            result,
            Err(CasError::SizeMismatch {
                declared: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_derive_key_for_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file2.txt");
        fs::write(&path, "file2.txt data\n").unwrap();

        let key = derive_key_for_file(&path, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(
            key.to_string(),
            "SHA256E-s15--2e57e969394ef19ad8af99d18af903de0e5fa3e09dda9818b1782a7e7e0befc0.txt"
        );
    }

    #[test]
    fn test_derive_key_for_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = derive_key_for_file(&temp.path().join("nope"), DEFAULT_CHUNK_SIZE);
        assert!(matches!(result, Err(CasError::Io(_))));

        let result = derive_key_for_file(temp.path(), DEFAULT_CHUNK_SIZE);
        assert!(matches!(result, Err(CasError::NotAFile(_))));
    }

    #[test]
    fn test_parse_roundtrip() {
        let key = ContentKey::parse(FILE1_KEY).unwrap();
        assert_eq!(key.backend(), "SHA256E");
        assert_eq!(key.size(), 11);
        assert_eq!(key.extension(), None);
        assert_eq!(key.to_string(), FILE1_KEY);

        let with_ext: ContentKey = format!("{}.foo.bar", FILE1_KEY).parse().unwrap();
        assert_eq!(with_ext.extension(), Some("foo.bar"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "SHA256E",
            "SHA256E-s11",
            "SHA256E-sxx--abcd",
            "SHA256E-s11--nothex",
            "SHA256E-s11--abcd",
            "-s11--abcd",
            "SHA256E-s11--5eb7/88",
            &format!("{}.", FILE1_KEY),
            &format!("{}.a..b", FILE1_KEY),
            &format!("{}.tar-gz", FILE1_KEY),
        ] {
            assert!(
                matches!(ContentKey::parse(bad), Err(CasError::MalformedKey(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    proptest! {
        #[test]
        fn prop_derivation_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..4096),
                                            name in "[^/\\x00]{1,24}") {
            let a = key_of(&data, &name);
            let b = key_of(&data, &name);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(ContentKey::parse(&a.to_string()).unwrap(), a);
        }
    }
}
