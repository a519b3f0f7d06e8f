//! # lode-repo
//!
//! The lode engine, generic over a version-control backend.
//!
//! ## Adding a file
//!
//! ```text
//! photo.jpg ──derive key──▶ SHA256E-s2048--9f2c….jpg
//!     │                          │
//!     │ move                     │ append "<ts> 1 <replica>"
//!     ▼                          ▼
//! .git/annex/objects/…/KEY/KEY   git-annex branch: 8a1/3fe/KEY.log
//!     ▲
//! photo.jpg -> .git/annex/objects/…/KEY/KEY  (staged symlink)
//! ```
//!
//! ## Synchronizing
//!
//! Fetch, union-merge the remote's metadata history into ours, merge the
//! remote's copy of the current branch, then rename both sides of every
//! add/add link conflict to `<path>.variant-<hex>` and commit.

pub mod add;
pub mod branch;
mod error;
pub mod query;
pub mod repo;
pub mod resolve;
pub mod sync;

pub use add::AddOutcome;
pub use branch::{BranchMerge, MetadataBranch, METADATA_BRANCH, METADATA_REF};
pub use error::{LodeError, Precondition, Result};
pub use query::{Holder, ObjectCheck, ReplicaInfo, WhereIs};
pub use repo::{Repo, REPLICA_CONFIG_KEY};
pub use resolve::{variant_paths, Resolution, VariantRename, RESOLUTION_MESSAGE};
pub use sync::{RemoteSync, SyncReport};
