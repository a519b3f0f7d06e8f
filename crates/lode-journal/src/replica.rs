//! Replica identities and the registry of known replicas.
//!
//! Registry file format, one record per line:
//!
//! ```text
//! 8f0e6b0e-31c7-4c5e-9d7c-1b7f0c2f6a11 laptop photos timestamp=1526200000.123456s
//! ```
//!
//! The registry only grows. Renaming a replica appends a newer record; the
//! current view keeps the latest record per id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{JournalError, Result, Timestamp};

/// Registry file at the root of the metadata tree.
pub const REGISTRY_FILE: &str = "uuid.log";

/// Identifier assigned once to each repository replica.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReplicaId(String);

impl ReplicaId {
    /// Fresh random id for a newly initialized replica.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(JournalError::MalformedReplica(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ReplicaId {
    type Err = JournalError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ReplicaId {
    type Error = JournalError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ReplicaId> for String {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

/// One line of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaRecord {
    pub id: ReplicaId,
    pub description: String,
    pub created: Timestamp,
}

impl ReplicaRecord {
    /// Control characters in the description would break the line format,
    /// so they are flattened to spaces.
    pub fn new(id: ReplicaId, description: &str, created: Timestamp) -> Self {
        let description = description
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect::<String>()
            .trim()
            .to_string();
        Self {
            id,
            description,
            created,
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let (id, rest) = line
            .split_once(' ')
            .ok_or_else(|| JournalError::MalformedReplica(line.to_string()))?;
        let (description, stamp) = match rest.rsplit_once(' ') {
            Some((d, s)) => (d, s),
            None => ("", rest),
        };
        let stamp = stamp
            .strip_prefix("timestamp=")
            .ok_or_else(|| JournalError::MalformedTimestamp(stamp.to_string()))?;
        Ok(Self {
            id: ReplicaId::parse(id)?,
            description: description.to_string(),
            created: Timestamp::parse(stamp)?,
        })
    }

    pub fn to_line(&self) -> String {
        if self.description.is_empty() {
            format!("{} timestamp={}", self.id, self.created)
        } else {
            format!("{} {} timestamp={}", self.id, self.description, self.created)
        }
    }
}

/// All registry records, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaRegistry {
    records: Vec<ReplicaRecord>,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut records = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = ReplicaRecord::parse_line(line).map_err(|e| JournalError::Corrupt {
                file: REGISTRY_FILE.to_string(),
                line: n + 1,
                reason: e.to_string(),
            })?;
            records.push(record);
        }
        Ok(Self { records })
    }

    pub fn to_text(&self) -> String {
        self.records
            .iter()
            .map(|r| format!("{}\n", r.to_line()))
            .collect()
    }

    pub fn records(&self) -> &[ReplicaRecord] {
        &self.records
    }

    pub fn record(&mut self, record: ReplicaRecord) {
        self.records.push(record);
    }

    /// Records of both registries; identical records appear once.
    pub fn union(&self, other: &ReplicaRegistry) -> ReplicaRegistry {
        let mut records = self.records.clone();
        for r in &other.records {
            if !records.contains(r) {
                records.push(r.clone());
            }
        }
        ReplicaRegistry { records }
    }

    /// Latest record per replica; ties go to the record later in the file.
    pub fn current(&self) -> BTreeMap<ReplicaId, ReplicaRecord> {
        let mut view: BTreeMap<ReplicaId, ReplicaRecord> = BTreeMap::new();
        for r in &self.records {
            match view.get(&r.id) {
                Some(existing) if existing.created > r.created => {}
                _ => {
                    view.insert(r.id.clone(), r.clone());
                }
            }
        }
        view
    }

    pub fn get(&self, id: &ReplicaId) -> Option<ReplicaRecord> {
        self.current().remove(id)
    }

    pub fn contains(&self, id: &ReplicaId) -> bool {
        self.records.iter().any(|r| &r.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ReplicaId {
        ReplicaId::parse(s).unwrap()
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(ReplicaId::generate(), ReplicaId::generate());
    }

    #[test]
    fn test_parse_rejects_whitespace() {
        assert!(ReplicaId::parse("").is_err());
        assert!(ReplicaId::parse("a b").is_err());
        assert!(ReplicaId::parse("a\tb").is_err());
    }

    #[test]
    fn test_record_line_format() {
        let r = ReplicaRecord::new(id("u1"), "test repo", Timestamp::new(1526200000, 123_456_000));
        assert_eq!(r.to_line(), "u1 test repo timestamp=1526200000.123456s");
        assert_eq!(ReplicaRecord::parse_line(&r.to_line()).unwrap(), r);
    }

    #[test]
    fn test_empty_description_roundtrips() {
        let r = ReplicaRecord::new(id("u1"), "", Timestamp::new(5, 0));
        assert_eq!(r.to_line(), "u1 timestamp=5.000000s");
        assert_eq!(ReplicaRecord::parse_line(&r.to_line()).unwrap(), r);
    }

    #[test]
    fn test_description_newlines_are_flattened() {
        let r = ReplicaRecord::new(id("u1"), "two\nlines", Timestamp::new(5, 0));
        assert_eq!(r.description, "two lines");
    }

    #[test]
    fn test_corrupt_registry_line() {
        let err = ReplicaRegistry::parse("u1 ok timestamp=1.0s\nbroken\n").unwrap_err();
        assert!(matches!(err, JournalError::Corrupt { line: 2, .. }));
    }

    #[test]
    fn test_union_keeps_every_record_once() {
        let mut a = ReplicaRegistry::new();
        a.record(ReplicaRecord::new(id("u1"), "one", Timestamp::new(1, 0)));
        let mut b = a.clone();
        b.record(ReplicaRecord::new(id("u2"), "two", Timestamp::new(2, 0)));
        a.record(ReplicaRecord::new(id("u3"), "three", Timestamp::new(3, 0)));

        let merged = a.union(&b);
        assert_eq!(merged.records().len(), 3);
        assert_eq!(merged.current().len(), 3);
        assert_eq!(b.union(&a).current(), merged.current());
    }

    #[test]
    fn test_current_prefers_latest_description() {
        let mut reg = ReplicaRegistry::new();
        reg.record(ReplicaRecord::new(id("u1"), "new name", Timestamp::new(9, 0)));
        reg.record(ReplicaRecord::new(id("u1"), "old name", Timestamp::new(1, 0)));
        assert_eq!(reg.get(&id("u1")).unwrap().description, "new name");
        assert_eq!(reg.records().len(), 2);
    }
}
