//! Bringing files under lode's control, and letting go of local content.

use std::fs;
use std::io;
use std::path::Path;

use lode_cas::{
    derive_key_for_file, key_from_link_target, metadata_path, storage_path, ContentKey,
};
use lode_config::path::{link_target_from, normalize_relative_to, to_slash};
use lode_config::{log_journal_debug, log_key_debug};
use lode_journal::Presence;
use lode_vcs::{make_link, Vcs};
use serde::Serialize;
use walkdir::WalkDir;

use crate::{LodeError, Precondition, Repo, Result};

/// Result of adding one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AddOutcome {
    /// Content moved into the object store and replaced by a link.
    Added { path: String, key: ContentKey },
    /// The path already was a link into the object store.
    AlreadyAnnexed { path: String, key: ContentKey },
}

impl AddOutcome {
    pub fn key(&self) -> &ContentKey {
        match self {
            AddOutcome::Added { key, .. } | AddOutcome::AlreadyAnnexed { key, .. } => key,
        }
    }
}

/// A work-tree file and what will be done with it.
enum Candidate {
    Regular { rel: String, key: ContentKey },
    Linked { rel: String, key: ContentKey },
}

impl<V: Vcs> Repo<V> {
    /// Add a file, or every file under a directory.
    ///
    /// Keys for all files are derived before anything is moved, so an
    /// unreadable file aborts the whole add untouched. A replica already
    /// recorded as holding a key gets no new log entry.
    pub fn add(&mut self, path: &Path) -> Result<Vec<AddOutcome>> {
        let candidates = self.collect_candidates(path)?;
        let objects = self.objects_from_work_tree()?;
        let mut outcomes = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            match candidate {
                Candidate::Regular { rel, key } => {
                    let abs = self.absolute(&rel);
                    self.store.ingest(&abs, &key)?;
                    let object = format!("{}/{}", objects, to_slash(&storage_path(&key)));
                    make_link(&link_target_from(&rel, &object), &abs)?;
                    self.vcs.stage(&rel)?;
                    log_key_debug!(path = %rel, key = %key, "added");
                    outcomes.push(AddOutcome::Added { path: rel, key });
                }
                Candidate::Linked { rel, key } => {
                    outcomes.push(AddOutcome::AlreadyAnnexed { path: rel, key });
                }
            }
        }

        let present: Vec<ContentKey> = outcomes
            .iter()
            .map(|o| o.key().clone())
            .filter(|k| self.store.contains(k))
            .collect();
        self.log_presence(&present, Presence::Present, "update")?;
        Ok(outcomes)
    }

    fn collect_candidates(&self, path: &Path) -> Result<Vec<Candidate>> {
        let meta = fs::symlink_metadata(path)
            .map_err(|e| LodeError::Input(format!("{}: {}", path.display(), e)))?;
        self.refuse_git_internal(path)?;

        let mut files = Vec::new();
        if meta.is_dir() {
            let walker = WalkDir::new(path)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git");
            for entry in walker {
                let entry = entry.map_err(|e| LodeError::Io(io::Error::other(e)))?;
                if !entry.file_type().is_dir() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.to_path_buf());
        }

        let chunk = self.config.hashing.chunk_size;
        let mut candidates = Vec::with_capacity(files.len());
        for file in files {
            let rel = self.refuse_git_internal(&file)?;
            let meta = fs::symlink_metadata(&file)?;
            if meta.file_type().is_symlink() {
                let target = fs::read_link(&file)?;
                match key_from_link_target(&target.to_string_lossy()) {
                    Some(key) => candidates.push(Candidate::Linked { rel, key }),
                    None => {
                        log_key_debug!(path = %rel, "skipping symlink outside the object store");
                    }
                }
            } else if meta.is_file() {
                let key = derive_key_for_file(&file, chunk)?;
                candidates.push(Candidate::Regular { rel, key });
            }
        }
        Ok(candidates)
    }

    /// Work-tree relative form of `path`, refused when it names the git
    /// directory or anything inside it.
    fn refuse_git_internal(&self, path: &Path) -> Result<String> {
        let root = self.vcs.work_tree();
        let rel = normalize_relative_to(path, root)
            .map_err(|e| LodeError::Input(format!("{:#}", e)))?;
        let Ok(git_rel) = normalize_relative_to(self.vcs.git_dir(), root) else {
            return Ok(rel);
        };
        let inside = !git_rel.is_empty()
            && (rel == git_rel || rel.starts_with(&format!("{}/", git_rel)));
        if inside {
            return Err(LodeError::Input(format!(
                "{}: inside the git directory",
                rel
            )));
        }
        Ok(rel)
    }

    /// Record `presence` for this replica on every key whose log does not
    /// already say so, in one metadata commit.
    pub(crate) fn log_presence(
        &mut self,
        keys: &[ContentKey],
        presence: Presence,
        message: &str,
    ) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut logs: Vec<String> = keys.iter().map(metadata_path).collect();
        logs.sort();
        logs.dedup();
        let replica = self.replica.clone();
        let clock = &mut self.clock;
        self.branch.update(&mut self.vcs, message, &logs, |journal| {
            let mut changed = Vec::new();
            for key in keys {
                let current = journal.fold(key)?.get(&replica).map(|h| h.presence);
                let already = match presence {
                    Presence::Present => current == Some(Presence::Present),
                    Presence::Absent => current != Some(Presence::Present),
                };
                if already {
                    log_journal_debug!(key = %key, "location already recorded");
                    continue;
                }
                let rel = journal.append(key, &replica, presence, clock.now())?;
                if !changed.contains(&rel) {
                    changed.push(rel);
                }
            }
            Ok(changed)
        })?;
        Ok(())
    }

    /// Remove local content for an annexed file and record its absence.
    ///
    /// Refused unless the location log shows at least `numcopies` other
    /// replicas holding the content, or `force` is set. The link stays in
    /// the work tree.
    pub fn drop_content(&mut self, path: &Path, force: bool) -> Result<ContentKey> {
        let rel = normalize_relative_to(path, self.vcs.work_tree())
            .map_err(|e| LodeError::Input(format!("{:#}", e)))?;
        let key = self.annexed_key(&rel)?;
        if !self.store.contains(&key) {
            return Err(LodeError::Input(format!(
                "{}: content is not present here",
                rel
            )));
        }

        if !force {
            let (_scratch, journal) = self
                .branch
                .view(&mut self.vcs, &[metadata_path(&key)])?;
            let have = journal
                .read(&key)?
                .holders()
                .into_iter()
                .filter(|id| *id != self.replica)
                .count();
            let need = self.config.repository.numcopies;
            if have < need as usize {
                return Err(Precondition::NotEnoughCopies {
                    key: key.to_string(),
                    have,
                    need,
                }
                .into());
            }
        }

        self.store.remove(&key)?;
        self.log_presence(std::slice::from_ref(&key), Presence::Absent, "drop")?;
        log_key_debug!(path = %rel, key = %key, "dropped");
        Ok(key)
    }

    /// Key behind an annexed work-tree path.
    pub(crate) fn annexed_key(&self, rel: &str) -> Result<ContentKey> {
        let abs = self.absolute(rel);
        let target = match fs::read_link(&abs) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(LodeError::Input(format!("{}: no such file", rel)));
            }
            Err(_) => {
                return Err(LodeError::Input(format!("{}: not an annexed file", rel)));
            }
        };
        key_from_link_target(&target.to_string_lossy())
            .ok_or_else(|| LodeError::Input(format!("{}: not an annexed file", rel)))
    }
}
