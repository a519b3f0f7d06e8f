//! In-process version control over a real work tree.
//!
//! Objects, refs and the index live in memory; files are read from and
//! written to disk so symlinks and the object store behave as they would
//! under git. Object ids are SHA-256 over a canonical encoding, so equal
//! trees and commits get equal ids across stores.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::{
    make_link, CommitId, Conflict, ConflictKind, FileMergeStrategy, MergeOutcome, Result, Side,
    TreeEntry, TreeId, TreeMerge, Vcs, VcsError,
};

type Tree = BTreeMap<String, TreeEntry>;

const DEFAULT_HEAD: &str = "refs/heads/master";

#[derive(Debug, Clone)]
struct Commit {
    tree: TreeId,
    parents: Vec<CommitId>,
}

/// Object database and refs shared between a repository and the
/// repositories that fetch from it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trees: HashMap<TreeId, Tree>,
    commits: HashMap<CommitId, Commit>,
    refs: BTreeMap<String, CommitId>,
}

impl MemoryStore {
    fn put_tree(&mut self, tree: Tree) -> TreeId {
        let mut hasher = Sha256::new();
        for (path, entry) in &tree {
            match entry {
                TreeEntry::Blob(data) => {
                    hasher.update(b"blob ");
                    hasher.update(path.as_bytes());
                    hasher.update(b"\0");
                    hasher.update((data.len() as u64).to_be_bytes());
                    hasher.update(data);
                }
                TreeEntry::Link(target) => {
                    hasher.update(b"link ");
                    hasher.update(path.as_bytes());
                    hasher.update(b"\0");
                    hasher.update(target.as_bytes());
                    hasher.update(b"\0");
                }
            }
        }
        let id = TreeId(hex::encode(hasher.finalize()));
        self.trees.entry(id.clone()).or_insert(tree);
        id
    }

    fn put_commit(&mut self, tree: &TreeId, parents: &[CommitId], message: &str) -> CommitId {
        let mut hasher = Sha256::new();
        hasher.update(format!("tree {}\n", tree));
        for p in parents {
            hasher.update(format!("parent {}\n", p));
        }
        hasher.update(b"\n");
        hasher.update(message.as_bytes());
        let id = CommitId(hex::encode(hasher.finalize()));
        self.commits.entry(id.clone()).or_insert(Commit {
            tree: tree.clone(),
            parents: parents.to_vec(),
        });
        id
    }

    fn tree(&self, id: &TreeId) -> Result<&Tree> {
        self.trees
            .get(id)
            .ok_or_else(|| VcsError::UnknownRevision(id.to_string()))
    }

    fn commit(&self, id: &CommitId) -> Result<&Commit> {
        self.commits
            .get(id)
            .ok_or_else(|| VcsError::UnknownRevision(id.to_string()))
    }

    fn commit_tree(&self, id: &CommitId) -> Result<Tree> {
        let commit = self.commit(id)?;
        Ok(self.tree(&commit.tree)?.clone())
    }

    /// `id` and everything reachable from it.
    fn ancestors(&self, id: &CommitId) -> HashSet<CommitId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.clone()]);
        while let Some(c) = queue.pop_front() {
            if !seen.insert(c.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&c) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Nearest common ancestor by breadth-first walk from `theirs`.
    fn merge_base(&self, ours: &CommitId, theirs: &CommitId) -> Option<CommitId> {
        let ours_ancestors = self.ancestors(ours);
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([theirs.clone()]);
        while let Some(c) = queue.pop_front() {
            if ours_ancestors.contains(&c) {
                return Some(c);
            }
            if !seen.insert(c.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&c) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }

    fn classify(&self, ours: &CommitId, theirs: &CommitId) -> Option<TreeMerge> {
        if ours == theirs || self.ancestors(ours).contains(theirs) {
            Some(TreeMerge::UpToDate)
        } else if self.ancestors(theirs).contains(ours) {
            Some(TreeMerge::FastForward)
        } else {
            None
        }
    }

    fn base_tree(&self, ours: &CommitId, theirs: &CommitId) -> Result<Tree> {
        match self.merge_base(ours, theirs) {
            Some(base) => self.commit_tree(&base),
            None => Ok(Tree::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum IndexSlot {
    Merged(TreeEntry),
    Conflict {
        base: Option<TreeEntry>,
        ours: Option<TreeEntry>,
        theirs: Option<TreeEntry>,
    },
}

/// Per-path outcome of a three-way tree merge.
struct ThreeWay {
    clean: Tree,
    conflicts: BTreeMap<String, IndexSlot>,
}

fn merge_trees(base: &Tree, ours: &Tree, theirs: &Tree, strategy: FileMergeStrategy) -> ThreeWay {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut clean = Tree::new();
    let mut conflicts = BTreeMap::new();

    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let merged = if o == t {
            Ok(o)
        } else if o == b {
            Ok(t)
        } else if t == b {
            Ok(o)
        } else {
            Err(())
        };

        match merged {
            Ok(Some(entry)) => {
                clean.insert(path.clone(), entry.clone());
            }
            Ok(None) => {}
            Err(()) => match (strategy, b, o, t) {
                (
                    FileMergeStrategy::Union,
                    None | Some(TreeEntry::Blob(_)),
                    Some(TreeEntry::Blob(o)),
                    Some(TreeEntry::Blob(t)),
                ) => {
                    let base_bytes: &[u8] = match b {
                        Some(TreeEntry::Blob(data)) => data.as_slice(),
                        _ => &[],
                    };
                    clean.insert(path.clone(), TreeEntry::Blob(union_lines(base_bytes, o, t)));
                }
                _ => {
                    conflicts.insert(
                        path.clone(),
                        IndexSlot::Conflict {
                            base: b.cloned(),
                            ours: o.cloned(),
                            theirs: t.cloned(),
                        },
                    );
                }
            },
        }
    }
    ThreeWay { clean, conflicts }
}

/// Our lines followed by the lines theirs added relative to base.
fn union_lines(base: &[u8], ours: &[u8], theirs: &[u8]) -> Vec<u8> {
    let mut remaining: HashMap<&[u8], usize> = HashMap::new();
    for line in split_lines(base) {
        *remaining.entry(line).or_default() += 1;
    }

    let mut out = ours.to_vec();
    if !out.is_empty() && !out.ends_with(b"\n") {
        out.push(b'\n');
    }
    for line in split_lines(theirs) {
        match remaining.get_mut(line) {
            Some(n) if *n > 0 => *n -= 1,
            _ => {
                out.extend_from_slice(line);
                out.push(b'\n');
            }
        }
    }
    out
}

fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines: Vec<&[u8]> = data.split(|b| *b == b'\n').collect();
    if data.is_empty() || data.ends_with(b"\n") {
        lines.pop();
    }
    lines
}

/// Read one path of a work area as a tree entry.
fn read_entry(path: &Path) -> io::Result<Option<TreeEntry>> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    if meta.file_type().is_symlink() {
        let target = fs::read_link(path)?;
        Ok(Some(TreeEntry::Link(
            target.to_string_lossy().replace('\\', "/"),
        )))
    } else if meta.is_file() {
        Ok(Some(TreeEntry::Blob(fs::read(path)?)))
    } else {
        Ok(None)
    }
}

fn write_entry(path: &Path, entry: &TreeEntry) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    remove_path(path)?;
    match entry {
        TreeEntry::Blob(data) => fs::write(path, data),
        TreeEntry::Link(target) => make_link(target, path),
    }
}

fn remove_path(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Repository whose object database lives in memory.
///
/// Remotes are other [`MemoryVcs`] instances registered with
/// [`MemoryVcs::add_remote`]; fetching copies their objects and branch refs.
#[derive(Debug)]
pub struct MemoryVcs {
    work_tree: PathBuf,
    git_dir: PathBuf,
    store: Rc<RefCell<MemoryStore>>,
    head: String,
    index: BTreeMap<String, IndexSlot>,
    merge_head: Option<CommitId>,
    config: BTreeMap<String, String>,
    remotes: BTreeMap<String, Rc<RefCell<MemoryStore>>>,
}

impl MemoryVcs {
    /// Start an empty repository over `work_tree`, creating `.git` in it.
    pub fn init(work_tree: &Path) -> Result<Self> {
        let git_dir = work_tree.join(".git");
        fs::create_dir_all(&git_dir)?;
        Ok(Self {
            work_tree: work_tree.to_path_buf(),
            git_dir,
            store: Rc::new(RefCell::new(MemoryStore::default())),
            head: DEFAULT_HEAD.to_string(),
            index: BTreeMap::new(),
            merge_head: None,
            config: BTreeMap::new(),
            remotes: BTreeMap::new(),
        })
    }

    pub fn add_remote(&mut self, name: &str, other: &MemoryVcs) {
        self.remotes.insert(name.to_string(), Rc::clone(&other.store));
    }

    fn head_commit(&self) -> Option<CommitId> {
        self.store.borrow().refs.get(&self.head).cloned()
    }

    fn head_tree(&self) -> Result<Tree> {
        match self.head_commit() {
            Some(c) => self.store.borrow().commit_tree(&c),
            None => Ok(Tree::new()),
        }
    }

    fn index_tree(&self) -> Tree {
        self.index
            .iter()
            .filter_map(|(p, slot)| match slot {
                IndexSlot::Merged(e) => Some((p.clone(), e.clone())),
                IndexSlot::Conflict { .. } => None,
            })
            .collect()
    }

    fn unmerged_paths(&self) -> Vec<String> {
        self.index
            .iter()
            .filter(|(_, slot)| matches!(slot, IndexSlot::Conflict { .. }))
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Move the work tree from `old` to `new`, touching only changed paths.
    fn apply_to_work_tree(&self, old: &Tree, new: &Tree) -> Result<()> {
        for path in old.keys().filter(|p| !new.contains_key(*p)) {
            remove_path(&self.work_tree.join(path))?;
        }
        for (path, entry) in new {
            if old.get(path) != Some(entry) {
                write_entry(&self.work_tree.join(path), entry)?;
            }
        }
        Ok(())
    }

    fn set_head(&mut self, commit: &CommitId) {
        self.store
            .borrow_mut()
            .refs
            .insert(self.head.clone(), commit.clone());
    }

    fn expect_commit(&self, rev: &str) -> Result<CommitId> {
        self.resolve(rev)?
            .ok_or_else(|| VcsError::UnknownRevision(rev.to_string()))
    }
}

impl Vcs for MemoryVcs {
    fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn resolve(&self, rev: &str) -> Result<Option<CommitId>> {
        if rev == "HEAD" {
            return Ok(self.head_commit());
        }
        let store = self.store.borrow();
        for candidate in [
            rev.to_string(),
            format!("refs/heads/{}", rev),
            format!("refs/remotes/{}", rev),
        ] {
            if let Some(c) = store.refs.get(&candidate) {
                return Ok(Some(c.clone()));
            }
        }
        let id = CommitId(rev.to_string());
        Ok(store.commits.contains_key(&id).then_some(id))
    }

    fn update_ref(
        &mut self,
        name: &str,
        new: &CommitId,
        expected: Option<Option<&CommitId>>,
    ) -> Result<()> {
        let mut store = self.store.borrow_mut();
        store.commit(new)?;
        if let Some(expected) = expected {
            let found = store.refs.get(name);
            if found != expected {
                return Err(VcsError::RefMoved {
                    name: name.to_string(),
                    expected: expected.map_or_else(|| "(none)".to_string(), |c| c.to_string()),
                    found: found.map_or_else(|| "(none)".to_string(), |c| c.to_string()),
                });
            }
        }
        store.refs.insert(name.to_string(), new.clone());
        Ok(())
    }

    fn checkout(&mut self, rev: &str, paths: &[String], work_area: &Path) -> Result<()> {
        let commit = self.expect_commit(rev)?;
        let tree = self.store.borrow().commit_tree(&commit)?;
        fs::create_dir_all(work_area)?;
        for (path, entry) in &tree {
            let wanted = paths.is_empty()
                || paths
                    .iter()
                    .any(|p| path == p || path.starts_with(&format!("{}/", p)));
            if wanted {
                write_entry(&work_area.join(path), entry)?;
            }
        }
        Ok(())
    }

    fn build_tree(
        &mut self,
        base: Option<&CommitId>,
        work_area: &Path,
        paths: &[String],
    ) -> Result<TreeId> {
        let mut tree = match base {
            Some(commit) => self.store.borrow().commit_tree(commit)?,
            None => Tree::new(),
        };
        for path in paths {
            match read_entry(&work_area.join(path))? {
                Some(entry) => {
                    tree.insert(path.clone(), entry);
                }
                None => {
                    tree.remove(path);
                }
            }
        }
        Ok(self.store.borrow_mut().put_tree(tree))
    }

    fn create_commit(
        &mut self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId> {
        let mut store = self.store.borrow_mut();
        store.tree(tree)?;
        for p in parents {
            store.commit(p)?;
        }
        Ok(store.put_commit(tree, parents, message))
    }

    fn merge_commits(
        &mut self,
        ours: &CommitId,
        theirs: &CommitId,
        strategy: FileMergeStrategy,
    ) -> Result<TreeMerge> {
        let mut store = self.store.borrow_mut();
        store.commit(ours)?;
        store.commit(theirs)?;
        if let Some(trivial) = store.classify(ours, theirs) {
            return Ok(trivial);
        }
        let base = store.base_tree(ours, theirs)?;
        let merged = merge_trees(
            &base,
            &store.commit_tree(ours)?,
            &store.commit_tree(theirs)?,
            strategy,
        );
        if merged.conflicts.is_empty() {
            Ok(TreeMerge::Clean(store.put_tree(merged.clean)))
        } else {
            Ok(TreeMerge::Conflicted(merged.conflicts.into_keys().collect()))
        }
    }

    fn merge_into_head(&mut self, rev: &str) -> Result<MergeOutcome> {
        let unmerged = self.unmerged_paths();
        if !unmerged.is_empty() {
            return Err(VcsError::Unmerged(unmerged));
        }
        let theirs = self.expect_commit(rev)?;
        let old_tree = self.head_tree()?;

        let Some(ours) = self.head_commit() else {
            let new_tree = self.store.borrow().commit_tree(&theirs)?;
            self.apply_to_work_tree(&old_tree, &new_tree)?;
            self.index = new_tree
                .into_iter()
                .map(|(p, e)| (p, IndexSlot::Merged(e)))
                .collect();
            self.set_head(&theirs);
            return Ok(MergeOutcome::FastForward(theirs));
        };

        let trivial = self.store.borrow().classify(&ours, &theirs);
        match trivial {
            Some(TreeMerge::UpToDate) => return Ok(MergeOutcome::UpToDate),
            Some(_) => {
                let new_tree = self.store.borrow().commit_tree(&theirs)?;
                self.apply_to_work_tree(&old_tree, &new_tree)?;
                self.index = new_tree
                    .into_iter()
                    .map(|(p, e)| (p, IndexSlot::Merged(e)))
                    .collect();
                self.set_head(&theirs);
                return Ok(MergeOutcome::FastForward(theirs));
            }
            None => {}
        }

        let merged = {
            let store = self.store.borrow();
            let base = store.base_tree(&ours, &theirs)?;
            merge_trees(
                &base,
                &old_tree,
                &store.commit_tree(&theirs)?,
                FileMergeStrategy::Standard,
            )
        };

        if merged.conflicts.is_empty() {
            self.apply_to_work_tree(&old_tree, &merged.clean)?;
            let commit = {
                let mut store = self.store.borrow_mut();
                let tree = store.put_tree(merged.clean.clone());
                store.put_commit(&tree, &[ours, theirs], &format!("Merge {}", rev))
            };
            self.index = merged
                .clean
                .into_iter()
                .map(|(p, e)| (p, IndexSlot::Merged(e)))
                .collect();
            self.set_head(&commit);
            return Ok(MergeOutcome::Merged(commit));
        }

        // Work tree gets the clean result plus our side of each conflict.
        let mut visible = merged.clean.clone();
        for (path, slot) in &merged.conflicts {
            if let IndexSlot::Conflict { ours, theirs, .. } = slot {
                if let Some(entry) = ours.as_ref().or(theirs.as_ref()) {
                    visible.insert(path.clone(), entry.clone());
                }
            }
        }
        self.apply_to_work_tree(&old_tree, &visible)?;

        let paths: Vec<String> = merged.conflicts.keys().cloned().collect();
        self.index = merged
            .clean
            .into_iter()
            .map(|(p, e)| (p, IndexSlot::Merged(e)))
            .chain(merged.conflicts)
            .collect();
        self.merge_head = Some(theirs);
        tracing::debug!(component = "VCS", conflicts = paths.len(), "merge left conflicts");
        Ok(MergeOutcome::Conflicted(paths))
    }

    fn conflicts(&self) -> Result<Vec<Conflict>> {
        Ok(self
            .index
            .iter()
            .filter_map(|(path, slot)| match slot {
                IndexSlot::Conflict { base, ours, theirs } => {
                    ConflictKind::from_sides(base.is_some(), ours.is_some(), theirs.is_some())
                        .map(|kind| Conflict {
                            path: path.clone(),
                            kind,
                        })
                }
                IndexSlot::Merged(_) => None,
            })
            .collect())
    }

    fn inspect_side(&self, path: &str, side: Side) -> Result<Option<TreeEntry>> {
        match self.index.get(path) {
            Some(IndexSlot::Conflict { base, ours, theirs }) => Ok(match side {
                Side::Base => base.clone(),
                Side::Ours => ours.clone(),
                Side::Theirs => theirs.clone(),
            }),
            _ => Ok(None),
        }
    }

    fn stage(&mut self, path: &str) -> Result<()> {
        match read_entry(&self.work_tree.join(path))? {
            Some(entry) => {
                self.index.insert(path.to_string(), IndexSlot::Merged(entry));
            }
            None => {
                self.index.remove(path);
            }
        }
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.index.remove(path);
        remove_path(&self.work_tree.join(path))?;
        Ok(())
    }

    fn commit_index(&mut self, message: &str) -> Result<CommitId> {
        let unmerged = self.unmerged_paths();
        if !unmerged.is_empty() {
            return Err(VcsError::Unmerged(unmerged));
        }
        let mut parents: Vec<CommitId> = self.head_commit().into_iter().collect();
        parents.extend(self.merge_head.take());
        let commit = {
            let mut store = self.store.borrow_mut();
            let tree = store.put_tree(self.index_tree());
            store.put_commit(&tree, &parents, message)
        };
        self.set_head(&commit);
        Ok(commit)
    }

    fn is_dirty(&self) -> Result<bool> {
        if !self.unmerged_paths().is_empty() {
            return Ok(true);
        }
        let index_tree = self.index_tree();
        if index_tree != self.head_tree()? {
            return Ok(true);
        }
        for (path, entry) in &index_tree {
            if read_entry(&self.work_tree.join(path))?.as_ref() != Some(entry) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn current_branch(&self) -> Result<Option<String>> {
        Ok(self.head.strip_prefix("refs/heads/").map(str::to_string))
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.config.get(key).cloned())
    }

    fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        self.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remote_names(&self) -> Result<BTreeSet<String>> {
        Ok(self.remotes.keys().cloned().collect())
    }

    fn fetch(&mut self, remote: &str) -> Result<()> {
        let source = self
            .remotes
            .get(remote)
            .cloned()
            .ok_or_else(|| VcsError::CommandFailed {
                op: format!("fetch {}", remote),
                status: "no such remote".to_string(),
                stderr: String::new(),
            })?;

        let (trees, commits, branches) = {
            let src = source.borrow();
            let branches: Vec<(String, CommitId)> = src
                .refs
                .iter()
                .filter_map(|(name, c)| {
                    name.strip_prefix("refs/heads/")
                        .map(|b| (crate::remote_ref(remote, b), c.clone()))
                })
                .collect();
            (src.trees.clone(), src.commits.clone(), branches)
        };

        let mut store = self.store.borrow_mut();
        store.trees.extend(trees);
        store.commits.extend(commits);
        for (name, commit) in branches {
            store.refs.insert(name, commit);
        }
        tracing::debug!(component = "VCS", remote, "fetched");
        Ok(())
    }
}
