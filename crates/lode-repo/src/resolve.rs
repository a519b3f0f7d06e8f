//! Repair of conflicts where both sides added different content at the same
//! path.
//!
//! Each side's link is kept under `<path>.variant-<suffix>`, the suffix
//! being the start of the bucket digest of that side's key. Names depend on
//! the two keys alone, so repairing the same conflict twice yields the same
//! tree.

use std::fs;
use std::io;

use lode_cas::{key_from_link_target, short_digest, ContentKey};
use lode_config::{log_merge_info, log_merge_warn};
use lode_vcs::{make_link, Conflict, ConflictKind, Side, TreeEntry, Vcs};
use serde::Serialize;

use crate::{LodeError, Repo, Result};

pub const VARIANT_MARKER: &str = ".variant-";

/// Hex digits of the suffix when the two sides do not collide.
pub const VARIANT_SUFFIX_LEN: usize = 4;

/// First line of a resolution commit message.
pub const RESOLUTION_MESSAGE: &str = "lode automatic merge conflict fix";

/// One conflicted path and the two names its sides now live under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantRename {
    pub path: String,
    pub ours: String,
    pub theirs: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub renames: Vec<VariantRename>,
    pub commit: String,
}

/// Variant paths for the two sides of `path`.
///
/// The suffix grows past four digits only when the two keys share a
/// prefix; `None` when the keys are equal.
pub fn variant_paths(path: &str, ours: &ContentKey, theirs: &ContentKey) -> Option<(String, String)> {
    if ours == theirs {
        return None;
    }
    (VARIANT_SUFFIX_LEN..=32).find_map(|len| {
        let (a, b) = (short_digest(ours, len), short_digest(theirs, len));
        (a != b).then(|| {
            (
                format!("{}{}{}", path, VARIANT_MARKER, a),
                format!("{}{}{}", path, VARIANT_MARKER, b),
            )
        })
    })
}

/// A conflicted path found repairable, with each side's link target.
struct Plan {
    rename: VariantRename,
    ours_target: String,
    theirs_target: String,
}

fn annexed_link(entry: Option<TreeEntry>) -> Option<(String, ContentKey)> {
    let target = entry?.link_target()?.to_string();
    let key = key_from_link_target(&target)?;
    Some((target, key))
}

impl<V: Vcs> Repo<V> {
    /// Repair the conflicts a main-line merge left behind and commit.
    ///
    /// Every conflict is checked before anything changes. If any is not a
    /// both-added pair of links into the object store, nothing is touched
    /// and the offending paths are reported. Returns `None` when there was
    /// nothing to repair.
    pub fn resolve_conflicts(&mut self) -> Result<Option<Resolution>> {
        let conflicts = self.vcs.conflicts()?;
        if conflicts.is_empty() {
            return Ok(None);
        }

        let mut plans = Vec::new();
        let mut unsupported = Vec::new();
        for conflict in &conflicts {
            match self.plan(conflict)? {
                Ok(plan) => plans.push(plan),
                Err(reason) => {
                    log_merge_warn!(path = %conflict.path, reason = %reason, "cannot repair conflict");
                    unsupported.push(format!("{} ({})", conflict.path, reason));
                }
            }
        }
        if !unsupported.is_empty() {
            return Err(LodeError::UnsupportedConflict(unsupported));
        }

        let mut message = format!("{}\n\n", RESOLUTION_MESSAGE);
        for plan in &plans {
            let r = &plan.rename;
            self.vcs.remove(&r.path)?;
            self.place_link(&r.ours, &plan.ours_target)?;
            self.place_link(&r.theirs, &plan.theirs_target)?;
            message.push_str(&format!("{} -> {}, {}\n", r.path, r.ours, r.theirs));
            log_merge_info!(path = %r.path, ours = %r.ours, theirs = %r.theirs, "conflict repaired");
        }

        let commit = self.vcs.commit_index(message.trim_end())?;
        Ok(Some(Resolution {
            renames: plans.into_iter().map(|p| p.rename).collect(),
            commit: commit.to_string(),
        }))
    }

    /// Decide how to repair one conflict; the inner error is why it cannot be.
    fn plan(&self, conflict: &Conflict) -> Result<std::result::Result<Plan, String>> {
        if conflict.kind != ConflictKind::BothAdded {
            return Ok(Err(conflict.kind.to_string()));
        }
        let ours = annexed_link(self.vcs.inspect_side(&conflict.path, Side::Ours)?);
        let theirs = annexed_link(self.vcs.inspect_side(&conflict.path, Side::Theirs)?);
        let (Some((ours_target, ours_key)), Some((theirs_target, theirs_key))) = (ours, theirs)
        else {
            return Ok(Err("not a pair of annexed links".to_string()));
        };
        let Some((ours_path, theirs_path)) = variant_paths(&conflict.path, &ours_key, &theirs_key)
        else {
            return Ok(Err("both sides have the same key".to_string()));
        };
        Ok(Ok(Plan {
            rename: VariantRename {
                path: conflict.path.clone(),
                ours: ours_path,
                theirs: theirs_path,
            },
            ours_target,
            theirs_target,
        }))
    }

    /// Create a link at `rel` with the side's original target. The variant
    /// sits next to the original path, so the relative target still holds.
    fn place_link(&mut self, rel: &str, target: &str) -> Result<()> {
        let abs = self.absolute(rel);
        match fs::remove_file(&abs) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        if let Some(parent) = abs.parent() {
            fs::create_dir_all(parent)?;
        }
        make_link(target, &abs)?;
        self.vcs.stage(rel)?;
        Ok(())
    }
}
