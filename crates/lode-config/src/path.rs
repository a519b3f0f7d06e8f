//! Path helpers for locating the repository and naming files inside it.
//!
//! Tracked paths are always expressed relative to the work tree root with
//! `/` separators, whatever the caller's working directory was.

use anyhow::{bail, Context, Result};
use std::path::{Component, Path, PathBuf};

/// Walk up from `start` to the first directory containing `.git`.
pub fn find_repo_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    let start = start.as_ref();
    let start = start.canonicalize().unwrap_or_else(|_| start.to_path_buf());
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Express `path` relative to `root`.
///
/// Only the parent directory is resolved: the final component may be a
/// symlink (an annexed file) and must be named, not followed.
///
/// # Example
/// ```ignore
/// let rel = normalize_relative_to("/repo/photos/a.jpg", "/repo")?;
/// assert_eq!(rel, "photos/a.jpg");
/// ```
pub fn normalize_relative_to(path: impl AsRef<Path>, root: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let root = root.as_ref();

    let canonical_root = root
        .canonicalize()
        .with_context(|| format!("Cannot resolve root: {}", root.display()))?;

    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };
    let absolute = lexical_clean(&absolute);

    let resolved = match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .with_context(|| format!("Cannot resolve directory: {}", parent.display()))?
            .join(name),
        _ => absolute
            .canonicalize()
            .with_context(|| format!("Cannot resolve path: {}", absolute.display()))?,
    };

    let Ok(relative) = resolved.strip_prefix(&canonical_root) else {
        bail!(
            "{} is outside the repository at {}",
            path.display(),
            root.display()
        );
    };
    Ok(to_slash(relative))
}

/// Remove `.` and `..` components without touching the file system.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Render a relative path with `/` separators.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Relative link target from `path` (inside the work tree) to `target`
/// (also relative to the work tree root).
///
/// # Example
/// ```ignore
/// assert_eq!(link_target_from("a/b/file", ".git/annex/x"), "../../.git/annex/x");
/// ```
pub fn link_target_from(path: &str, target: &str) -> String {
    let depth = path.matches('/').count();
    format!("{}{}", "../".repeat(depth), target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_repo_root() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(".git")).unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();

        let root = find_repo_root(temp.path().join("a/b")).unwrap();
        assert_eq!(root, temp.path().canonicalize().unwrap());
    }

    #[test]
    fn test_normalize_relative_to() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("sub")).unwrap();

        let rel = normalize_relative_to(temp.path().join("sub/file"), temp.path()).unwrap();
        assert_eq!(rel, "sub/file");
        let rel = normalize_relative_to(temp.path().join("sub/../top"), temp.path()).unwrap();
        assert_eq!(rel, "top");
    }

    #[test]
    fn test_outside_root_is_rejected() {
        let repo = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        assert!(normalize_relative_to(other.path().join("f"), repo.path()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_final_symlink_is_not_followed() {
        let temp = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", temp.path().join("link")).unwrap();
        let rel = normalize_relative_to(temp.path().join("link"), temp.path()).unwrap();
        assert_eq!(rel, "link");
    }

    #[test]
    fn test_link_target_from() {
        assert_eq!(link_target_from("file1", ".git/annex/o"), ".git/annex/o");
        assert_eq!(
            link_target_from("a/b/file", ".git/annex/o"),
            "../../.git/annex/o"
        );
    }
}
