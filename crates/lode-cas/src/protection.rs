//! Write protection for stored objects.
//!
//! Objects are immutable once ingested: the file mode is dropped to 0444 so
//! an accidental write through a work-tree link fails instead of silently
//! corrupting content that other paths (and the location logs) refer to.

use std::fs;
use std::io;
use std::path::Path;

/// Read-only for everyone, never executable.
#[cfg(unix)]
pub const OBJECT_READ_ONLY_PERM: u32 = 0o444;

/// Mode restored before an object is removed.
#[cfg(unix)]
pub const OBJECT_WRITABLE_PERM: u32 = 0o644;

pub fn freeze(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(OBJECT_READ_ONLY_PERM))
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(path, perms)
    }
}

pub fn thaw(path: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(OBJECT_WRITABLE_PERM))
    }
    #[cfg(not(unix))]
    {
        let mut perms = fs::metadata(path)?.permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(path, perms)
    }
}

pub fn is_frozen(path: &Path) -> io::Result<bool> {
    Ok(fs::metadata(path)?.permissions().readonly())
}
