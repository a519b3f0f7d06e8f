//! Capability marker.
//!
//! Declares the layout choices a metadata history was written with, so a
//! reader that does not share them can refuse instead of misreading paths.
//! Written once when a replica initializes and never rewritten:
//!
//! ```text
//! 8f0e6b0e-31c7-4c5e-9d7c-1b7f0c2f6a11 objecthashlower timestamp=1526200000.123456s
//! ```

use std::collections::BTreeSet;
use std::fmt;

use crate::{JournalError, ReplicaId, Result, Timestamp};

pub const MARKER_FILE: &str = "difference.log";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    /// Object buckets use lowercase hex digests.
    ObjectHashLower,
    /// Declared by some other writer; not understood here.
    Unknown(String),
}

impl Capability {
    pub fn parse(s: &str) -> Self {
        match s {
            "objecthashlower" => Capability::ObjectHashLower,
            other => Capability::Unknown(other.to_string()),
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Capability::Unknown(_))
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::ObjectHashLower => f.write_str("objecthashlower"),
            Capability::Unknown(s) => f.write_str(s),
        }
    }
}

/// Capabilities this implementation writes and requires.
pub fn default_capabilities() -> BTreeSet<Capability> {
    BTreeSet::from([Capability::ObjectHashLower])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityMarker {
    pub replica: ReplicaId,
    pub capabilities: BTreeSet<Capability>,
    pub timestamp: Timestamp,
}

impl CapabilityMarker {
    pub fn new(replica: ReplicaId, timestamp: Timestamp) -> Self {
        Self {
            replica,
            capabilities: default_capabilities(),
            timestamp,
        }
    }

    pub fn to_line(&self) -> String {
        let mut line = self.replica.to_string();
        for c in &self.capabilities {
            line.push(' ');
            line.push_str(&c.to_string());
        }
        line.push_str(&format!(" timestamp={}", self.timestamp));
        line
    }

    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let mut fields: Vec<&str> = line.split(' ').filter(|f| !f.is_empty()).collect();
        let stamp = fields
            .pop()
            .and_then(|f| f.strip_prefix("timestamp="))
            .ok_or_else(|| format!("missing timestamp in {:?}", line))?;
        if fields.is_empty() {
            return Err(format!("missing replica in {:?}", line));
        }
        let replica = ReplicaId::parse(fields.remove(0)).map_err(|e| e.to_string())?;
        Ok(Self {
            replica,
            capabilities: fields.into_iter().map(Capability::parse).collect(),
            timestamp: Timestamp::parse(stamp).map_err(|e| e.to_string())?,
        })
    }

    /// Capabilities declared here that this implementation does not know.
    pub fn unknown(&self) -> Vec<&Capability> {
        self.capabilities.iter().filter(|c| !c.is_known()).collect()
    }
}

pub fn parse_markers(text: &str) -> Result<Vec<CapabilityMarker>> {
    text.lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty())
        .map(|(n, l)| {
            CapabilityMarker::parse_line(l).map_err(|reason| JournalError::Corrupt {
                file: MARKER_FILE.to_string(),
                line: n + 1,
                reason,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_line() {
        let m = CapabilityMarker::new(ReplicaId::parse("u1").unwrap(), Timestamp::new(3, 0));
        assert_eq!(m.to_line(), "u1 objecthashlower timestamp=3.000000s");
        assert_eq!(CapabilityMarker::parse_line(&m.to_line()).unwrap(), m);
        assert!(m.unknown().is_empty());
    }

    #[test]
    fn test_unknown_capability_is_reported() {
        let markers = parse_markers("u2 objecthashlower onelevelbranchhash timestamp=1.0s\n").unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(
            markers[0].unknown(),
            vec![&Capability::Unknown("onelevelbranchhash".to_string())]
        );
    }

    #[test]
    fn test_corrupt_marker() {
        let err = parse_markers("u1 objecthashlower\n").unwrap_err();
        assert!(matches!(err, JournalError::Corrupt { line: 1, .. }));
    }
}
