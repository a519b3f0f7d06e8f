//! # lode-journal
//!
//! The files that make up a lode metadata history:
//!
//! ```text
//! <metadata tree>/
//! ├── uuid.log                 # replica registry
//! ├── difference.log           # capability marker
//! └── 5de/
//!     └── 9ee/
//!         └── SHA256E-s11--5eb7...c3cf.log   # location log
//! ```
//!
//! [`LocationLog`] holds the merge rule and does no I/O; [`Journal`] reads
//! and appends the files of a checked-out tree.

mod clock;
mod error;
pub mod journal;
pub mod location;
pub mod marker;
pub mod replica;

pub use clock::{Clock, Timestamp};
pub use error::{JournalError, Result};
pub use journal::Journal;
pub use location::{merge_folded, FoldedLog, Holding, LocationLog, LogEntry, Presence};
pub use marker::{default_capabilities, parse_markers, Capability, CapabilityMarker, MARKER_FILE};
pub use replica::{ReplicaId, ReplicaRecord, ReplicaRegistry, REGISTRY_FILE};
