//! Read-mostly views over the metadata history and object store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lode_cas::{derive_key_for_file, metadata_path, ContentKey, ObjectStats};
use lode_config::path::normalize_relative_to;
use lode_journal::{ReplicaId, ReplicaRecord, Timestamp, REGISTRY_FILE};
use lode_vcs::Vcs;
use serde::Serialize;

use crate::{LodeError, Repo, Result};

/// One replica as listed by [`Repo::replicas`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicaInfo {
    pub record: ReplicaRecord,
    pub here: bool,
    /// Git remotes configured with this replica's id.
    pub remotes: Vec<String>,
}

/// A replica holding some content, per the location log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Holder {
    pub replica: ReplicaId,
    pub description: Option<String>,
    pub since: Timestamp,
    pub here: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WhereIs {
    pub path: String,
    pub key: ContentKey,
    pub holders: Vec<Holder>,
}

/// Outcome of checking one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectCheck {
    pub key: ContentKey,
    pub problem: Option<String>,
}

impl<V: Vcs> Repo<V> {
    /// Key the file at `path` would get if added.
    pub fn calc_key(&self, path: &Path) -> Result<ContentKey> {
        Ok(derive_key_for_file(path, self.config.hashing.chunk_size)?)
    }

    /// Where content for `key` is stored in this replica, whether or not
    /// it is present right now.
    pub fn content_location(&self, key: &ContentKey) -> PathBuf {
        self.store.object_path(key)
    }

    /// Where content of the file at `path` would be stored.
    pub fn calc_location(&self, path: &Path) -> Result<PathBuf> {
        let key = self.calc_key(path)?;
        Ok(self.store.object_path(&key))
    }

    /// Replicas whose latest log entry for the annexed file says present.
    pub fn whereis(&mut self, path: &Path) -> Result<WhereIs> {
        let rel = normalize_relative_to(path, self.vcs.work_tree())
            .map_err(|e| LodeError::Input(format!("{:#}", e)))?;
        let key = self.annexed_key(&rel)?;
        let (_scratch, journal) = self
            .branch
            .view(&mut self.vcs, &[metadata_path(&key), REGISTRY_FILE.to_string()])?;
        let registry = journal.read_registry()?.current();

        let holders = journal
            .fold(&key)?
            .into_iter()
            .filter(|(_, h)| h.presence == lode_journal::Presence::Present)
            .map(|(replica, h)| Holder {
                description: registry.get(&replica).map(|r| r.description.clone()),
                here: replica == self.replica,
                since: h.timestamp,
                replica,
            })
            .collect();
        Ok(WhereIs {
            path: rel,
            key,
            holders,
        })
    }

    /// The replica registry, latest record per replica.
    pub fn replicas(&mut self) -> Result<Vec<ReplicaInfo>> {
        let (_scratch, journal) = self
            .branch
            .view(&mut self.vcs, &[REGISTRY_FILE.to_string()])?;
        let current = journal.read_registry()?.current();

        let mut by_id: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for remote in self.vcs.remote_names()? {
            if let Some(id) = self.vcs.config_get(&format!("remote.{}.annex-uuid", remote))? {
                by_id.entry(id).or_default().push(remote);
            }
        }

        Ok(current
            .into_values()
            .map(|record| ReplicaInfo {
                here: record.id == self.replica,
                remotes: by_id.remove(record.id.as_str()).unwrap_or_default(),
                record,
            })
            .collect())
    }

    /// Raw contents of a file on the metadata history.
    pub fn metadata_cat(&mut self, rel: &str) -> Result<Option<String>> {
        self.branch.read_file(&mut self.vcs, rel)
    }

    /// Record a new description for this replica. Earlier records stay.
    pub fn describe(&mut self, description: &str) -> Result<()> {
        let record = ReplicaRecord::new(self.replica.clone(), description, self.now());
        let registry = [REGISTRY_FILE.to_string()];
        self.branch.update(&mut self.vcs, "describe", &registry, |journal| {
            Ok(vec![journal.append_registry(&record)?])
        })?;
        Ok(())
    }

    pub fn object_stats(&self) -> Result<ObjectStats> {
        Ok(self.store.stats()?)
    }

    /// Re-hash every stored object against its key.
    pub fn verify_objects(&self) -> Result<Vec<ObjectCheck>> {
        let chunk = self.config.hashing.chunk_size;
        Ok(self
            .store
            .keys()?
            .into_iter()
            .map(|key| {
                let problem = self.store.verify(&key, chunk).err().map(|e| e.to_string());
                ObjectCheck { key, problem }
            })
            .collect())
    }
}
