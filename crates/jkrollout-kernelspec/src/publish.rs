//! Directory renames used to publish a staged kernel.
//!
//! On Linux with glibc both operations are single `renameat2(2)` calls, so
//! the existence check and the rename cannot be separated by another
//! writer. Filesystems that reject the flags (some NFS mounts) and other
//! platforms fall back to a re-check immediately before a plain `rename(2)`,
//! and report `exchange` as [`io::ErrorKind::Unsupported`].

use std::io;
use std::path::Path;

/// Renames `from` to `to`, failing with `AlreadyExists` if `to` exists.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{AT_FDCWD, RenameFlags, renameat2};

    match renameat2(AT_FDCWD, from, AT_FDCWD, to, RenameFlags::RENAME_NOREPLACE) {
        Ok(()) => Ok(()),
        Err(Errno::EINVAL) => {
            tracing::debug!(to = %to.display(), "RENAME_NOREPLACE unsupported, using checked rename");
            checked_rename(from, to)
        }
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Atomically swaps `from` and `to`. Both must exist.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub fn exchange(from: &Path, to: &Path) -> io::Result<()> {
    use nix::errno::Errno;
    use nix::fcntl::{AT_FDCWD, RenameFlags, renameat2};

    match renameat2(AT_FDCWD, from, AT_FDCWD, to, RenameFlags::RENAME_EXCHANGE) {
        Ok(()) => Ok(()),
        Err(Errno::EINVAL) => Err(unsupported()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Renames `from` to `to`, failing with `AlreadyExists` if `to` exists.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    checked_rename(from, to)
}

/// Atomic exchange is not available on this platform.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub fn exchange(_from: &Path, _to: &Path) -> io::Result<()> {
    Err(unsupported())
}

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "atomic directory exchange is not supported here",
    )
}

fn checked_rename(from: &Path, to: &Path) -> io::Result<()> {
    if to.symlink_metadata().is_ok() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "target directory already exists",
        ));
    }
    std::fs::rename(from, to)
}
