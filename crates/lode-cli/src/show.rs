//! Human-readable rendering of command results.

use std::fmt::Write;
use std::path::Path;

use lode_cas::ObjectStats;
use lode_journal::Timestamp;
use lode_repo::{BranchMerge, ReplicaInfo, RemoteSync, WhereIs};
use lode_vcs::MergeOutcome;

/// `path` relative to `root` when it lies beneath it.
pub fn relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// `%Y-%m-%d %H:%M:%S` in UTC, or the raw timestamp when out of range.
pub fn time(ts: &Timestamp) -> String {
    match ts.to_datetime() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

pub fn replica(info: &ReplicaInfo) -> String {
    let mut line = format!(
        "{} -- {} ({})",
        info.record.id,
        info.record.description,
        time(&info.record.created)
    );
    if info.here {
        line.push_str(" [here]");
    }
    for remote in &info.remotes {
        let _ = write!(line, " [git remote: {}]", remote);
    }
    line
}

pub fn whereis(w: &WhereIs) -> String {
    let mut out = format!("whereis {} ({} copies)\n", w.path, w.holders.len());
    for h in &w.holders {
        let _ = write!(out, "  \t{}", h.replica);
        if let Some(d) = &h.description {
            let _ = write!(out, " -- {}", d);
        }
        if h.here {
            out.push_str(" [here]");
        }
        out.push('\n');
    }
    out
}

pub fn remote_sync(r: &RemoteSync) -> String {
    let metadata = match &r.metadata {
        BranchMerge::Absent => "no metadata history".to_string(),
        BranchMerge::UpToDate => "metadata up to date".to_string(),
        BranchMerge::FastForward(c) => format!("metadata fast-forwarded to {}", short(&c.0)),
        BranchMerge::Merged(c) => format!("metadata merged as {}", short(&c.0)),
    };
    let main = match &r.main {
        None => "no matching branch".to_string(),
        Some(MergeOutcome::UpToDate) => "branch up to date".to_string(),
        Some(MergeOutcome::FastForward(c)) => format!("branch fast-forwarded to {}", short(&c.0)),
        Some(MergeOutcome::Merged(c)) => format!("branch merged as {}", short(&c.0)),
        Some(MergeOutcome::Conflicted(paths)) => format!("branch conflicted in {} paths", paths.len()),
    };
    let mut out = format!("sync {}: {}, {}\n", r.remote, metadata, main);
    if let Some(resolution) = &r.resolution {
        for rename in &resolution.renames {
            let _ = writeln!(out, "  {} -> {}, {}", rename.path, rename.ours, rename.theirs);
        }
    }
    out
}

pub fn stats(s: &ObjectStats) -> String {
    format!(
        "objects: {}\nbytes: {}\naverage size: {}\n\
         < 1KB: {}\n1KB-1MB: {}\n1MB-100MB: {}\n> 100MB: {}\n",
        s.object_count,
        s.total_bytes,
        s.avg_object_size(),
        s.small_objects,
        s.medium_objects,
        s.large_objects,
        s.huge_objects
    )
}

fn short(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_cas::ContentKey;
    use lode_journal::{ReplicaId, ReplicaRecord};
    use lode_repo::{Holder, Resolution, VariantRename};
    use lode_vcs::CommitId;

    const ID: &str = "2f1c2f9e-7a3b-4c1d-9e0f-0123456789ab";

    #[test]
    fn test_time_format() {
        let ts = Timestamp::new(1_700_000_000, 0);
        assert_eq!(time(&ts), "2023-11-14 22:13:20");
    }

    #[test]
    fn test_replica_line_marks_here_and_remotes() {
        let info = ReplicaInfo {
            record: ReplicaRecord::new(ReplicaId::parse(ID).unwrap(), "nas", Timestamp::new(0, 0)),
            here: true,
            remotes: vec!["origin".to_string()],
        };
        assert_eq!(
            replica(&info),
            format!("{} -- nas (1970-01-01 00:00:00) [here] [git remote: origin]", ID)
        );
    }

    #[test]
    fn test_whereis_lists_holders() {
        let w = WhereIs {
            path: "file1".to_string(),
            key: ContentKey::new(1, "ab", None),
            holders: vec![Holder {
                replica: ReplicaId::parse(ID).unwrap(),
                description: Some("laptop".to_string()),
                since: Timestamp::new(1, 0),
                here: false,
            }],
        };
        let text = whereis(&w);
        assert!(text.starts_with("whereis file1 (1 copies)\n"));
        assert!(text.contains(&format!("{} -- laptop\n", ID)));
    }

    #[test]
    fn test_remote_sync_lists_renames() {
        let r = RemoteSync {
            remote: "origin".to_string(),
            metadata: BranchMerge::Merged(CommitId("0123456789abcdef".to_string())),
            main: Some(MergeOutcome::Conflicted(vec!["file1".to_string()])),
            resolution: Some(Resolution {
                renames: vec![VariantRename {
                    path: "file1".to_string(),
                    ours: "file1.variant-9668".to_string(),
                    theirs: "file1.variant-09da".to_string(),
                }],
                commit: "c".to_string(),
            }),
        };
        assert_eq!(
            remote_sync(&r),
            "sync origin: metadata merged as 0123456789ab, branch conflicted in 1 paths\n  \
             file1 -> file1.variant-9668, file1.variant-09da\n"
        );
    }

    #[test]
    fn test_relative_strips_work_tree() {
        let root = Path::new("/w");
        assert_eq!(relative(Path::new("/w/.git/annex/x"), root), ".git/annex/x");
        assert_eq!(relative(Path::new("/elsewhere"), root), "/elsewhere");
    }
}
