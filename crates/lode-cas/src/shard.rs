//! Two-level bucketing of keys into storage and metadata paths.
//!
//! Buckets come from the lowercase MD5 hex of the key string: the first three
//! characters name the outer directory, the next three the inner one.
//!
//! ```text
//! objects/5de/9ee/SHA256E-s11--5eb7...c3cf/SHA256E-s11--5eb7...c3cf
//! 5de/9ee/SHA256E-s11--5eb7...c3cf.log
//! ```
//!
//! This mapping is an on-disk format. Existing repositories locate their
//! content through it, so the digest and the split must never change.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::ContentKey;

/// Object root, relative to the version-control metadata directory.
pub const OBJECTS_DIR: &str = "annex/objects";

/// Suffix of a location log file in the metadata tree.
pub const LOG_SUFFIX: &str = ".log";

const BUCKET_WIDTH: usize = 3;

/// The two directory levels a key is sharded into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buckets {
    pub outer: String,
    pub inner: String,
}

/// Lowercase hex MD5 of the key string. Used for bucketing only.
pub fn bucket_digest(key: &ContentKey) -> String {
    hex::encode(Md5::digest(key.to_string().as_bytes()))
}

pub fn buckets(key: &ContentKey) -> Buckets {
    let digest = bucket_digest(key);
    Buckets {
        outer: digest[..BUCKET_WIDTH].to_string(),
        inner: digest[BUCKET_WIDTH..2 * BUCKET_WIDTH].to_string(),
    }
}

/// First `len` hex characters of the bucket digest.
pub fn short_digest(key: &ContentKey, len: usize) -> String {
    let digest = bucket_digest(key);
    digest[..len.min(digest.len())].to_string()
}

/// Storage path relative to the object root: `<outer>/<inner>/<key>/<key>`.
///
/// The key appears twice so the object file names itself even when moved.
pub fn storage_path(key: &ContentKey) -> PathBuf {
    let b = buckets(key);
    let name = key.to_string();
    Path::new(&b.outer).join(&b.inner).join(&name).join(&name)
}

/// Location log path inside the metadata tree: `<outer>/<inner>/<key>.log`.
pub fn metadata_path(key: &ContentKey) -> String {
    let b = buckets(key);
    format!("{}/{}/{}{}", b.outer, b.inner, key, LOG_SUFFIX)
}

/// Recover the key from a metadata tree path produced by [`metadata_path`].
pub fn key_from_metadata_path(path: &str) -> Option<ContentKey> {
    let mut parts = path.split('/');
    let (outer, inner, file) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let key = ContentKey::parse(file.strip_suffix(LOG_SUFFIX)?).ok()?;
    let b = buckets(&key);
    (b.outer == outer && b.inner == inner).then_some(key)
}

/// Recover the key from a link target pointing into the object store.
///
/// Accepts any prefix (`.git/`, `../../.git/`, absolute) as long as the
/// tail is `annex/objects/<outer>/<inner>/<key>/<key>` with matching buckets.
pub fn key_from_link_target(target: &str) -> Option<ContentKey> {
    let parts: Vec<&str> = target.split('/').filter(|p| !p.is_empty()).collect();
    let n = parts.len();
    if n < 6 {
        return None;
    }
    let tail = &parts[n - 6..];
    if tail[0] != "annex" || tail[1] != "objects" || tail[4] != tail[5] {
        return None;
    }
    let key = ContentKey::parse(tail[5]).ok()?;
    let b = buckets(&key);
    (b.outer == tail[2] && b.inner == tail[3]).then_some(key)
}
