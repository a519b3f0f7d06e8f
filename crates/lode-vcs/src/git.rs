//! Backend that drives the `git` executable.
//!
//! Metadata trees are built and read through a private index file so the
//! user's index and work tree are never touched by metadata operations.
//! Object reads and writes are batched, one `git` process per batch, so the
//! cost of a metadata commit follows the number of changed files rather
//! than the size of the tree.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::{NamedTempFile, TempDir};

use crate::{
    make_link, CommitId, Conflict, ConflictKind, FileMergeStrategy, MergeOutcome, Result, Side,
    TreeEntry, TreeId, TreeMerge, Vcs, VcsError,
};

const MODE_LINK: &str = "120000";
const MODE_FILE: &str = "100644";
const MODE_EXEC: &str = "100755";

/// Attributes that make every file of one merge a union merge.
const UNION_ATTRIBUTES: &str = "* merge=union\n";

#[derive(Debug, Clone)]
pub struct GitVcs {
    work_tree: PathBuf,
    git_dir: PathBuf,
    program: String,
}

/// One row of `ls-tree -r` or `ls-files -s`.
#[derive(Debug, Clone)]
struct IndexRow {
    mode: String,
    object: String,
    stage: u8,
    path: String,
}

impl GitVcs {
    /// Open the repository containing `dir`.
    pub fn open(dir: &Path, program: &str) -> Result<Self> {
        let rev_parse = |arg: &str| -> Result<PathBuf> {
            let out = Command::new(program)
                .current_dir(dir)
                .args(["rev-parse", arg])
                .output()?;
            let out = check("rev-parse", out)?;
            Ok(PathBuf::from(String::from_utf8_lossy(&out).trim()))
        };
        let git_dir = rev_parse("--absolute-git-dir")?;
        let work_tree = rev_parse("--show-toplevel")?;
        Ok(Self {
            work_tree,
            git_dir,
            program: program.to_string(),
        })
    }

    /// `git init` a new repository at `dir` and open it.
    pub fn init(dir: &Path, program: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let out = Command::new(program)
            .current_dir(dir)
            .args(["init", "-q"])
            .output()?;
        check("init", out)?;
        Self::open(dir, program)
    }

    fn git(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(&self.work_tree)
            .env("GIT_DIR", &self.git_dir)
            .env("GIT_WORK_TREE", &self.work_tree)
            .env("LC_ALL", "C");
        cmd
    }

    fn run<I, S>(&self, op: &str, args: I) -> Result<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let out = self.git().args(args).output()?;
        check(op, out)
    }

    fn run_text<I, S>(&self, op: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Ok(String::from_utf8_lossy(&self.run(op, args)?).into_owned())
    }

    /// Run `cmd` feeding it `input`. Input is written from its own thread:
    /// batch commands answer while still reading, and a full stdout pipe
    /// would otherwise stall both sides.
    fn run_with_input(&self, op: &str, mut cmd: Command, input: &[u8]) -> Result<Vec<u8>> {
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdin = child.stdin.take();
        let input = input.to_vec();
        let writer = std::thread::spawn(move || -> io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(&input)?;
            }
            Ok(())
        });
        let out = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "stdin writer panicked"))?;
        let out = check(op, out)?;
        written?;
        Ok(out)
    }

    fn hash_blob(&self, data: &[u8]) -> Result<String> {
        let mut cmd = self.git();
        cmd.args(["hash-object", "-w", "--stdin"]);
        let out = self.run_with_input("hash-object", cmd, data)?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }

    /// Write every file in `files` as a blob in one `hash-object` call.
    fn hash_files(&self, files: &[PathBuf]) -> Result<Vec<String>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let list: String = files
            .iter()
            .map(|f| format!("{}\n", f.display()))
            .collect();
        let mut cmd = self.git();
        cmd.args(["hash-object", "-w", "--no-filters", "--stdin-paths"]);
        let out = self.run_with_input("hash-object", cmd, list.as_bytes())?;
        let objects: Vec<String> = String::from_utf8_lossy(&out)
            .lines()
            .map(|l| l.trim().to_string())
            .collect();
        if objects.len() != files.len() {
            return Err(VcsError::Malformed {
                op: "hash-object".to_string(),
                detail: format!("{} ids for {} files", objects.len(), files.len()),
            });
        }
        Ok(objects)
    }

    fn read_blob(&self, object: &str) -> Result<Vec<u8>> {
        self.run("cat-file", ["cat-file", "blob", object])
    }

    /// Contents of `objects`, in order, from one `cat-file --batch` call.
    fn read_blobs(&self, objects: &[&str]) -> Result<Vec<Vec<u8>>> {
        if objects.is_empty() {
            return Ok(Vec::new());
        }
        let request: String = objects.iter().map(|o| format!("{}\n", o)).collect();
        let mut cmd = self.git();
        cmd.args(["cat-file", "--batch"]);
        let out = self.run_with_input("cat-file", cmd, request.as_bytes())?;
        let blobs = parse_batch(&out)?;
        if blobs.len() != objects.len() {
            return Err(VcsError::Malformed {
                op: "cat-file".to_string(),
                detail: format!("{} objects for {} requested", blobs.len(), objects.len()),
            });
        }
        Ok(blobs)
    }

    fn entry_from_row(&self, row: &IndexRow) -> Result<TreeEntry> {
        let data = self.read_blob(&row.object)?;
        if row.mode == MODE_LINK {
            Ok(TreeEntry::Link(String::from_utf8_lossy(&data).into_owned()))
        } else {
            Ok(TreeEntry::Blob(data))
        }
    }

    fn unmerged_rows(&self, path: Option<&str>) -> Result<Vec<IndexRow>> {
        let mut args = vec!["ls-files", "-u", "-z"];
        if let Some(p) = path {
            args.extend(["--", p]);
        }
        let out = self.run("ls-files", args)?;
        parse_rows(&out, RowFormat::Index)
    }

    fn is_ancestor(&self, ancestor: &CommitId, of: &CommitId) -> Result<bool> {
        let out = self
            .git()
            .args(["merge-base", "--is-ancestor", ancestor.0.as_str(), of.0.as_str()])
            .output()?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(failure("merge-base", out)),
        }
    }
}

enum RowFormat {
    /// `<mode> <type> <object>\t<path>`
    Tree,
    /// `<mode> <object> <stage>\t<path>`
    Index,
}

fn parse_rows(out: &[u8], format: RowFormat) -> Result<Vec<IndexRow>> {
    let text = String::from_utf8_lossy(out);
    let mut rows = Vec::new();
    for record in text.split('\0').filter(|r| !r.is_empty()) {
        let malformed = || VcsError::Malformed {
            op: "ls".to_string(),
            detail: record.to_string(),
        };
        let (meta, path) = record.split_once('\t').ok_or_else(malformed)?;
        let fields: Vec<&str> = meta.split(' ').collect();
        let row = match (&format, fields.as_slice()) {
            (RowFormat::Tree, [mode, "blob", object]) => IndexRow {
                mode: mode.to_string(),
                object: object.to_string(),
                stage: 0,
                path: path.to_string(),
            },
            (RowFormat::Tree, [_, _, _]) => continue,
            (RowFormat::Index, [mode, object, stage]) => IndexRow {
                mode: mode.to_string(),
                object: object.to_string(),
                stage: stage.parse().map_err(|_| malformed())?,
                path: path.to_string(),
            },
            _ => return Err(malformed()),
        };
        rows.push(row);
    }
    Ok(rows)
}

/// Split `cat-file --batch` output: per object a `<id> <type> <size>`
/// header line, the content, and a newline.
fn parse_batch(out: &[u8]) -> Result<Vec<Vec<u8>>> {
    let malformed = |detail: String| VcsError::Malformed {
        op: "cat-file".to_string(),
        detail,
    };
    let mut blobs = Vec::new();
    let mut rest = out;
    while !rest.is_empty() {
        let eol = rest
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| malformed("truncated header".to_string()))?;
        let header = String::from_utf8_lossy(&rest[..eol]).into_owned();
        let size: usize = match header.split(' ').collect::<Vec<_>>().as_slice() {
            [_, _, size] => size.parse().map_err(|_| malformed(header.clone()))?,
            _ => return Err(malformed(header)),
        };
        let start = eol + 1;
        let end = start + size;
        if rest.len() <= end || rest[end] != b'\n' {
            return Err(malformed(format!("short content after {}", header)));
        }
        blobs.push(rest[start..end].to_vec());
        rest = &rest[end + 1..];
    }
    Ok(blobs)
}

fn failure(op: &str, out: Output) -> VcsError {
    VcsError::CommandFailed {
        op: op.to_string(),
        status: out.status.to_string(),
        stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
    }
}

fn check(op: &str, out: Output) -> Result<Vec<u8>> {
    if out.status.success() {
        Ok(out.stdout)
    } else {
        Err(failure(op, out))
    }
}

impl Vcs for GitVcs {
    fn work_tree(&self) -> &Path {
        &self.work_tree
    }

    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn resolve(&self, rev: &str) -> Result<Option<CommitId>> {
        let spec = format!("{}^{{commit}}", rev);
        let out = self
            .git()
            .args(["rev-parse", "-q", "--verify", spec.as_str()])
            .output()?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(CommitId(
            String::from_utf8_lossy(&out.stdout).trim().to_string(),
        )))
    }

    fn update_ref(
        &mut self,
        name: &str,
        new: &CommitId,
        expected: Option<Option<&CommitId>>,
    ) -> Result<()> {
        let mut args = vec!["update-ref".to_string(), name.to_string(), new.0.clone()];
        if let Some(expected) = expected {
            args.push(expected.map(|c| c.0.clone()).unwrap_or_default());
        }
        let out = self.git().args(&args).output()?;
        if out.status.success() {
            return Ok(());
        }
        if let Some(expected) = expected {
            let found = self.resolve(name)?;
            if found.as_ref() != expected {
                return Err(VcsError::RefMoved {
                    name: name.to_string(),
                    expected: expected.map_or_else(|| "(none)".to_string(), |c| c.to_string()),
                    found: found.map_or_else(|| "(none)".to_string(), |c| c.to_string()),
                });
            }
        }
        Err(failure("update-ref", out))
    }

    fn checkout(&mut self, rev: &str, paths: &[String], work_area: &Path) -> Result<()> {
        let mut args = vec!["ls-tree".to_string(), "-r".into(), "-z".into(), rev.to_string()];
        if !paths.is_empty() {
            args.push("--".into());
            args.extend(paths.iter().cloned());
        }
        let rows = parse_rows(&self.run("ls-tree", &args)?, RowFormat::Tree)?;
        let objects: Vec<&str> = rows.iter().map(|r| r.object.as_str()).collect();
        let blobs = self.read_blobs(&objects)?;

        fs::create_dir_all(work_area)?;
        for (row, data) in rows.iter().zip(blobs) {
            let dest = work_area.join(&row.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            if fs::symlink_metadata(&dest).is_ok() {
                fs::remove_file(&dest)?;
            }
            if row.mode == MODE_LINK {
                make_link(&String::from_utf8_lossy(&data), &dest)?;
            } else {
                fs::write(&dest, data)?;
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
        let scratch = TempDir::new_in(&self.git_dir)?;
        let index = scratch.path().join("index");
        if let Some(base) = base {
            let out = self
                .git()
                .env("GIT_INDEX_FILE", &index)
                .args(["read-tree", base.0.as_str()])
                .output()?;
            check("read-tree", out)?;
        }

        let mut info = String::new();
        let mut removed = String::new();
        let mut files = Vec::new();
        for path in paths {
            let full = work_area.join(path);
            let meta = match fs::symlink_metadata(&full) {
                Ok(meta) => meta,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    removed.push_str(&format!("{}\0", path));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if meta.file_type().is_symlink() {
                let target = fs::read_link(&full)?;
                let object = self.hash_blob(target.to_string_lossy().as_bytes())?;
                info.push_str(&format!("{} {}\t{}\0", MODE_LINK, object, path));
            } else if meta.is_file() {
                files.push((mode_of(&full)?, path, full));
            }
        }
        let sources: Vec<PathBuf> = files.iter().map(|(_, _, full)| full.clone()).collect();
        for ((mode, path, _), object) in files.iter().zip(self.hash_files(&sources)?) {
            info.push_str(&format!("{} {}\t{}\0", mode, object, path));
        }

        if !info.is_empty() {
            let mut cmd = self.git();
            cmd.env("GIT_INDEX_FILE", &index)
                .args(["update-index", "--add", "-z", "--index-info"]);
            self.run_with_input("update-index", cmd, info.as_bytes())?;
        }
        if !removed.is_empty() {
            let mut cmd = self.git();
            cmd.env("GIT_INDEX_FILE", &index)
                .args(["update-index", "--force-remove", "-z", "--stdin"]);
            self.run_with_input("update-index", cmd, removed.as_bytes())?;
        }

        let out = self
            .git()
            .env("GIT_INDEX_FILE", &index)
            .arg("write-tree")
            .output()?;
        let tree = check("write-tree", out)?;
        Ok(TreeId(String::from_utf8_lossy(&tree).trim().to_string()))
    }

    fn create_commit(
        &mut self,
        tree: &TreeId,
        parents: &[CommitId],
        message: &str,
    ) -> Result<CommitId> {
        let mut args = vec!["commit-tree".to_string(), tree.0.clone()];
        for p in parents {
            args.push("-p".into());
            args.push(p.0.clone());
        }
        args.push("-m".into());
        args.push(message.to_string());
        let out = self.run_text("commit-tree", &args)?;
        Ok(CommitId(out.trim().to_string()))
    }

    fn merge_commits(
        &mut self,
        ours: &CommitId,
        theirs: &CommitId,
        strategy: FileMergeStrategy,
    ) -> Result<TreeMerge> {
        if ours == theirs || self.is_ancestor(theirs, ours)? {
            return Ok(TreeMerge::UpToDate);
        }
        if self.is_ancestor(ours, theirs)? {
            return Ok(TreeMerge::FastForward);
        }

        // The attributes file lives exactly as long as this one merge.
        let attributes = match strategy {
            FileMergeStrategy::Union => {
                let mut file = NamedTempFile::new_in(&self.git_dir)?;
                file.write_all(UNION_ATTRIBUTES.as_bytes())?;
                Some(file)
            }
            FileMergeStrategy::Standard => None,
        };
        let mut cmd = self.git();
        if let Some(file) = &attributes {
            cmd.arg("-c")
                .arg(format!("core.attributesFile={}", file.path().display()));
        }
        cmd.args([
            "merge-tree",
            "--write-tree",
            "--allow-unrelated-histories",
            "--name-only",
            "--no-messages",
            ours.0.as_str(),
            theirs.0.as_str(),
        ]);
        let out = cmd.output()?;
        drop(attributes);

        let text = String::from_utf8_lossy(&out.stdout).into_owned();
        let mut lines = text.lines();
        match out.status.code() {
            Some(0) => {
                let tree = lines.next().ok_or_else(|| VcsError::Malformed {
                    op: "merge-tree".to_string(),
                    detail: "no tree in output".to_string(),
                })?;
                Ok(TreeMerge::Clean(TreeId(tree.trim().to_string())))
            }
            Some(1) => {
                let paths: BTreeSet<String> = lines
                    .skip(1)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                Ok(TreeMerge::Conflicted(paths.into_iter().collect()))
            }
            _ => Err(failure("merge-tree", out)),
        }
    }

    fn merge_into_head(&mut self, rev: &str) -> Result<MergeOutcome> {
        let theirs = self
            .resolve(rev)?
            .ok_or_else(|| VcsError::UnknownRevision(rev.to_string()))?;
        let before = self.resolve("HEAD")?;
        if let Some(ours) = &before {
            if ours == &theirs || self.is_ancestor(&theirs, ours)? {
                return Ok(MergeOutcome::UpToDate);
            }
        }

        let out = self
            .git()
            .args([
                "merge",
                "--no-edit",
                "--allow-unrelated-histories",
                "-q",
                rev,
            ])
            .output()?;
        if out.status.success() {
            let after = self
                .resolve("HEAD")?
                .ok_or_else(|| VcsError::UnknownRevision("HEAD".to_string()))?;
            return Ok(if after == theirs {
                MergeOutcome::FastForward(after)
            } else {
                MergeOutcome::Merged(after)
            });
        }

        let conflicted: BTreeSet<String> = self
            .unmerged_rows(None)?
            .into_iter()
            .map(|r| r.path)
            .collect();
        if conflicted.is_empty() {
            return Err(failure("merge", out));
        }
        tracing::debug!(component = "VCS", conflicts = conflicted.len(), "merge left conflicts");
        Ok(MergeOutcome::Conflicted(conflicted.into_iter().collect()))
    }

    fn conflicts(&self) -> Result<Vec<Conflict>> {
        let mut stages: BTreeMap<String, [bool; 3]> = BTreeMap::new();
        for row in self.unmerged_rows(None)? {
            if (1..=3).contains(&row.stage) {
                stages.entry(row.path).or_default()[usize::from(row.stage) - 1] = true;
            }
        }
        Ok(stages
            .into_iter()
            .filter_map(|(path, [base, ours, theirs])| {
                ConflictKind::from_sides(base, ours, theirs).map(|kind| Conflict { path, kind })
            })
            .collect())
    }

    fn inspect_side(&self, path: &str, side: Side) -> Result<Option<TreeEntry>> {
        let row = self
            .unmerged_rows(Some(path))?
            .into_iter()
            .find(|r| r.path == path && r.stage == side.stage());
        row.map(|r| self.entry_from_row(&r)).transpose()
    }

    fn stage(&mut self, path: &str) -> Result<()> {
        self.run("add", ["add", "-A", "--", path])?;
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        self.run("rm", ["rm", "-q", "-f", "--ignore-unmatch", "--", path])?;
        let full = self.work_tree.join(path);
        if fs::symlink_metadata(&full).is_ok() {
            fs::remove_file(&full)?;
        }
        Ok(())
    }

    fn commit_index(&mut self, message: &str) -> Result<CommitId> {
        self.run("commit", ["commit", "-q", "--no-verify", "-m", message])?;
        self.resolve("HEAD")?
            .ok_or_else(|| VcsError::UnknownRevision("HEAD".to_string()))
    }

    fn is_dirty(&self) -> Result<bool> {
        let out = self.run("status", ["status", "--porcelain", "--untracked-files=no"])?;
        Ok(!out.is_empty())
    }

    fn current_branch(&self) -> Result<Option<String>> {
        let out = self
            .git()
            .args(["symbolic-ref", "--short", "-q", "HEAD"])
            .output()?;
        match out.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&out.stdout).trim().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(failure("symbolic-ref", out)),
        }
    }

    fn config_get(&self, key: &str) -> Result<Option<String>> {
        let out = self.git().args(["config", "--get", key]).output()?;
        match out.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&out.stdout).trim_end().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(failure("config", out)),
        }
    }

    fn config_set(&mut self, key: &str, value: &str) -> Result<()> {
        self.run("config", ["config", key, value])?;
        Ok(())
    }

    fn remote_names(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .run_text("remote", ["remote"])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn fetch(&mut self, remote: &str) -> Result<()> {
        self.run("fetch", ["fetch", "-q", remote])?;
        tracing::debug!(component = "VCS", remote, "fetched");
        Ok(())
    }
}

#[cfg(unix)]
fn mode_of(path: &Path) -> io::Result<&'static str> {
    use std::os::unix::fs::PermissionsExt;
    let mode = fs::metadata(path)?.permissions().mode();
    Ok(if mode & 0o111 != 0 { MODE_EXEC } else { MODE_FILE })
}

#[cfg(not(unix))]
fn mode_of(_path: &Path) -> io::Result<&'static str> {
    Ok(MODE_FILE)
}
