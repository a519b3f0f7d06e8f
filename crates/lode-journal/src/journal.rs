//! A checked-out metadata tree on disk.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lode_cas::{key_from_metadata_path, metadata_path, ContentKey};
use tracing::instrument;
use walkdir::WalkDir;

use crate::location::{FoldedLog, LocationLog, LogEntry, Presence};
use crate::marker::{parse_markers, CapabilityMarker, MARKER_FILE};
use crate::replica::{ReplicaId, ReplicaRecord, ReplicaRegistry, REGISTRY_FILE};
use crate::{JournalError, Result, Timestamp};

/// File access to the metadata files under one directory.
///
/// Every mutating method returns the tree-relative path it touched so the
/// caller can name it when committing.
#[derive(Debug, Clone)]
pub struct Journal {
    root: PathBuf,
}

impl Journal {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self, key: &ContentKey) -> PathBuf {
        self.root.join(metadata_path(key))
    }

    /// Append one entry to the log for `key`, creating the log if absent.
    ///
    /// The line goes out in a single write on an append-mode handle.
    #[instrument(skip(self), level = "debug", fields(key = %key))]
    pub fn append(
        &self,
        key: &ContentKey,
        replica: &ReplicaId,
        presence: Presence,
        timestamp: Timestamp,
    ) -> Result<String> {
        let rel = metadata_path(key);
        let entry = LogEntry::new(timestamp, presence, replica.clone());
        self.append_line(&rel, &entry.to_string())?;
        tracing::debug!(component = "JOURNAL", entry = %entry, "appended location");
        Ok(rel)
    }

    /// Log for `key`; empty when no log exists yet.
    pub fn read(&self, key: &ContentKey) -> Result<LocationLog> {
        let rel = metadata_path(key);
        match self.read_text(&rel)? {
            Some(text) => LocationLog::parse_named(&text, &rel),
            None => Ok(LocationLog::new()),
        }
    }

    pub fn fold(&self, key: &ContentKey) -> Result<FoldedLog> {
        Ok(self.read(key)?.fold())
    }

    pub fn is_present(&self, key: &ContentKey, replica: &ReplicaId) -> Result<bool> {
        Ok(self.read(key)?.is_present(replica))
    }

    /// Keys that have a location log in this tree.
    pub fn keys(&self) -> Result<Vec<ContentKey>> {
        let mut keys = Vec::new();
        if !self.root.is_dir() {
            return Ok(keys);
        }
        for entry in WalkDir::new(&self.root).min_depth(3).max_depth(3) {
            let entry = entry.map_err(|e| JournalError::Io(io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(rel) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            if let Some(key) = key_from_metadata_path(&rel) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    pub fn read_registry(&self) -> Result<ReplicaRegistry> {
        match self.read_text(REGISTRY_FILE)? {
            Some(text) => ReplicaRegistry::parse(&text),
            None => Ok(ReplicaRegistry::new()),
        }
    }

    pub fn append_registry(&self, record: &ReplicaRecord) -> Result<String> {
        self.append_line(REGISTRY_FILE, &record.to_line())?;
        Ok(REGISTRY_FILE.to_string())
    }

    pub fn read_markers(&self) -> Result<Vec<CapabilityMarker>> {
        match self.read_text(MARKER_FILE)? {
            Some(text) => parse_markers(&text),
            None => Ok(Vec::new()),
        }
    }

    /// Declare this replica's capabilities. Refuses to touch a marker that
    /// already names the replica.
    pub fn write_marker(&self, marker: &CapabilityMarker) -> Result<String> {
        if self
            .read_markers()?
            .iter()
            .any(|m| m.replica == marker.replica)
        {
            return Err(JournalError::Corrupt {
                file: MARKER_FILE.to_string(),
                line: 0,
                reason: format!("marker for {} already written", marker.replica),
            });
        }
        self.append_line(MARKER_FILE, &marker.to_line())?;
        Ok(MARKER_FILE.to_string())
    }

    /// Raw contents of a tree-relative file, if present.
    pub fn read_text(&self, rel: &str) -> Result<Option<String>> {
        match fs::read_to_string(self.root.join(rel)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(JournalError::Io(e)),
        }
    }

    fn append_line(&self, rel: &str, line: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(format!("{}\n", line).as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key() -> ContentKey {
        ContentKey::parse(
            "SHA256E-s11--5eb788ac2bded6ce7112e44d68228bfecb3e569d1d745c78e1275986bbedc3cf",
        )
        .unwrap()
    }

    #[test]
    fn test_append_creates_sharded_log() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let replica = ReplicaId::parse("u1").unwrap();

        let rel = journal
            .append(&key(), &replica, Presence::Present, Timestamp::new(1, 0))
            .unwrap();
        assert!(rel.starts_with("5de/9ee/"));
        assert!(temp.path().join(&rel).is_file());

        assert!(journal.is_present(&key(), &replica).unwrap());
        assert_eq!(journal.keys().unwrap(), vec![key()]);
    }

    #[test]
    fn test_append_only_grows() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let replica = ReplicaId::parse("u1").unwrap();

        journal
            .append(&key(), &replica, Presence::Present, Timestamp::new(1, 0))
            .unwrap();
        journal
            .append(&key(), &replica, Presence::Absent, Timestamp::new(2, 0))
            .unwrap();

        let log = journal.read(&key()).unwrap();
        assert_eq!(log.entries().len(), 2);
        assert!(!journal.is_present(&key(), &replica).unwrap());
    }

    #[test]
    fn test_missing_log_is_empty() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        assert!(journal.read(&key()).unwrap().is_empty());
        assert!(journal.keys().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_log_names_file() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let path = journal.log_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "garbage\n").unwrap();

        match journal.fold(&key()) {
            Err(JournalError::Corrupt { file, line, .. }) => {
                assert_eq!(file, metadata_path(&key()));
                assert_eq!(line, 1);
            }
            other => panic!("expected corruption, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_written_once_per_replica() {
        let temp = TempDir::new().unwrap();
        let journal = Journal::new(temp.path());
        let marker = CapabilityMarker::new(ReplicaId::parse("u1").unwrap(), Timestamp::new(1, 0));

        journal.write_marker(&marker).unwrap();
        assert!(journal.write_marker(&marker).is_err());
        assert_eq!(journal.read_markers().unwrap(), vec![marker]);
    }
}
