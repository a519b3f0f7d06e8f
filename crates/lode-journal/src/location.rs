//! Per-key location logs.
//!
//! Each line claims that a replica did or did not hold the content at a
//! point in time:
//!
//! ```text
//! 1526200000.123456s 1 8f0e6b0e-31c7-4c5e-9d7c-1b7f0c2f6a11
//! ```
//!
//! Logs are append-only. Replicas append independently and their logs are
//! merged by concatenation; [`LocationLog::fold`] reduces any interleaving
//! to the same per-replica state because each entry is judged by its own
//! timestamp alone.

use std::collections::BTreeMap;
use std::fmt;

use crate::{JournalError, ReplicaId, Result, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Presence {
    Absent,
    Present,
}

impl Presence {
    pub fn bit(self) -> char {
        match self {
            Presence::Absent => '0',
            Presence::Present => '1',
        }
    }

    pub fn from_bit(s: &str) -> Option<Self> {
        match s {
            "0" => Some(Presence::Absent),
            "1" => Some(Presence::Present),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub presence: Presence,
    pub replica: ReplicaId,
}

impl LogEntry {
    pub fn new(timestamp: Timestamp, presence: Presence, replica: ReplicaId) -> Self {
        Self {
            timestamp,
            presence,
            replica,
        }
    }

    /// Parse one log line. The error carries the reason only; callers add
    /// file and line context.
    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let mut fields = line.split(' ');
        let (Some(ts), Some(bit), Some(replica), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(format!("expected 3 fields in {:?}", line));
        };
        let timestamp = Timestamp::parse(ts).map_err(|e| e.to_string())?;
        let presence =
            Presence::from_bit(bit).ok_or_else(|| format!("bad presence bit {:?}", bit))?;
        let replica = ReplicaId::parse(replica).map_err(|e| e.to_string())?;
        Ok(Self::new(timestamp, presence, replica))
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp,
            self.presence.bit(),
            self.replica
        )
    }
}

/// Current claim of one replica after folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holding {
    pub timestamp: Timestamp,
    pub presence: Presence,
}

pub type FoldedLog = BTreeMap<ReplicaId, Holding>;

/// Ordered entries of one key's log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationLog {
    entries: Vec<LogEntry>,
}

impl LocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse log text. Blank lines are skipped; any other malformed line is
    /// corruption, never silently dropped.
    pub fn parse(text: &str) -> Result<Self> {
        Self::parse_named(text, "location log")
    }

    pub(crate) fn parse_named(text: &str, file: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (n, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = LogEntry::parse_line(line).map_err(|reason| JournalError::Corrupt {
                file: file.to_string(),
                line: n + 1,
                reason,
            })?;
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    pub fn to_text(&self) -> String {
        self.entries.iter().map(|e| format!("{}\n", e)).collect()
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    /// `self` followed by `other`, as a file-level union merge produces.
    pub fn concat(&self, other: &LocationLog) -> LocationLog {
        let mut entries = self.entries.clone();
        entries.extend(other.entries.iter().cloned());
        LocationLog { entries }
    }

    /// Reduce to the latest claim per replica.
    ///
    /// The greatest timestamp wins; on equal timestamps the entry later in
    /// the log wins.
    pub fn fold(&self) -> FoldedLog {
        let mut folded = FoldedLog::new();
        for e in &self.entries {
            let replace = match folded.get(&e.replica) {
                Some(h) => e.timestamp >= h.timestamp,
                None => true,
            };
            if replace {
                folded.insert(
                    e.replica.clone(),
                    Holding {
                        timestamp: e.timestamp,
                        presence: e.presence,
                    },
                );
            }
        }
        folded
    }

    pub fn is_present(&self, replica: &ReplicaId) -> bool {
        self.fold()
            .get(replica)
            .is_some_and(|h| h.presence == Presence::Present)
    }

    /// Replicas whose latest claim is presence.
    pub fn holders(&self) -> Vec<ReplicaId> {
        self.fold()
            .into_iter()
            .filter(|(_, h)| h.presence == Presence::Present)
            .map(|(id, _)| id)
            .collect()
    }
}

/// Combine two folded logs per replica, keeping the later claim.
///
/// Equal timestamps resolve to `b`, matching `fold(a ++ b)`.
pub fn merge_folded(a: &FoldedLog, b: &FoldedLog) -> FoldedLog {
    let mut merged = a.clone();
    for (id, hb) in b {
        match merged.get(id) {
            Some(ha) if ha.timestamp > hb.timestamp => {}
            _ => {
                merged.insert(id.clone(), *hb);
            }
        }
    }
    merged
}
