//! Host access policy: the pluggable collaborator that performs all host
//! I/O on behalf of the drives.
//!
//! The drives never touch an open host file directly; every open, stat,
//! removal and directory creation is routed through an [`AccessPolicy`] so
//! an embedding application can deny writes, redirect paths or audit
//! access. [`HostPassthrough`] is the reference implementation that simply
//! forwards to `std::fs`.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::SystemTime;

use crate::drive::DriveId;

/// How the drive wants a host file opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMode {
    /// Read-only (`rb`).
    Read,
    /// Read-write, must exist (`rb+`).
    ReadWriteUpdate,
    /// Read-write, created or truncated (`wb+`).
    ReadWriteTruncate,
}

/// Host metadata for one path, as far as this layer cares.
#[derive(Debug, Clone)]
pub struct HostStat {
    pub is_directory: bool,
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

/// Access-policy and host-I/O collaborator for mounted drives.
///
/// Returning `None`/`false` from any method is an ordinary outcome the
/// drives translate into DOS semantics; implementations should not panic.
pub trait AccessPolicy: Send + Sync {
    /// Whether writes (create, truncate, unlink, mkdir) may touch `path`.
    fn allow_write(&self, path: &Path, drive: DriveId) -> bool;

    /// Open a host file. `None` means the file could not be opened in the
    /// requested mode, for whatever reason.
    fn open_file(&self, path: &Path, drive: DriveId, mode: HostMode) -> Option<File>;

    /// Remove a host file. `true` on success.
    fn remove_file(&self, path: &Path, drive: DriveId) -> bool;

    /// Whether the path exists at all (file or directory).
    fn path_exists(&self, path: &Path, drive: DriveId) -> bool;

    /// Whether the path exists and is a directory.
    fn is_directory(&self, path: &Path, drive: DriveId) -> bool;

    /// Stat a path. `None` when it does not exist or cannot be examined.
    fn stat_path(&self, path: &Path, drive: DriveId) -> Option<HostStat>;

    /// Create a host directory. `true` on success.
    fn create_dir(&self, path: &Path, drive: DriveId) -> bool;

    /// Fire-and-forget notification that the drive created a file.
    fn notify_created(&self, _path: &Path, _drive: DriveId) {}

    /// Fire-and-forget notification that the drive removed a file.
    fn notify_removed(&self, _path: &Path, _drive: DriveId) {}
}

/// Direct `std::fs` implementation with no policy of its own: every write
/// is allowed and paths are used as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPassthrough;

impl AccessPolicy for HostPassthrough {
    fn allow_write(&self, _path: &Path, _drive: DriveId) -> bool {
        true
    }

    fn open_file(&self, path: &Path, _drive: DriveId, mode: HostMode) -> Option<File> {
        let mut options = OpenOptions::new();
        match mode {
            HostMode::Read => options.read(true),
            HostMode::ReadWriteUpdate => options.read(true).write(true),
            HostMode::ReadWriteTruncate => {
                options.read(true).write(true).create(true).truncate(true)
            }
        };
        options.open(path).ok()
    }

    fn remove_file(&self, path: &Path, _drive: DriveId) -> bool {
        std::fs::remove_file(path).is_ok()
    }

    fn path_exists(&self, path: &Path, _drive: DriveId) -> bool {
        path.exists()
    }

    fn is_directory(&self, path: &Path, _drive: DriveId) -> bool {
        path.is_dir()
    }

    fn stat_path(&self, path: &Path, _drive: DriveId) -> Option<HostStat> {
        let meta = std::fs::metadata(path).ok()?;
        Some(HostStat {
            is_directory: meta.is_dir(),
            size: meta.len(),
            mtime: meta.modified().ok(),
        })
    }

    fn create_dir(&self, path: &Path, _drive: DriveId) -> bool {
        std::fs::create_dir(path).is_ok()
    }
}
