//! Mounted guest drives.
//!
//! [`DosDrive`] is the guest-facing surface every drive variant exposes;
//! [`LocalDrive`] backs a drive letter with a host directory and
//! [`CdromDrive`] wraps one with read-only, removable-media semantics.

mod cdrom;
mod local;

pub use cdrom::{CdromDrive, DiscSubsystem, StaticDisc};
pub use local::LocalDrive;

use bitflags::bitflags;

use crate::cache::SearchId;
use crate::error::{DosError, DosResult};
use crate::registry::{FileId, OpenHandleRegistry};

bitflags! {
    /// DOS file attribute byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u16 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME    = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

/// Identity of one mounted drive: the letter index (A = 0 ... Z = 25).
/// Used to match open handles to their drive without an ownership edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriveId(u8);

impl DriveId {
    pub fn from_letter(letter: char) -> DosResult<Self> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper as u8 - b'A'))
        } else {
            Err(DosError::InvalidDrive(letter))
        }
    }

    pub fn letter(self) -> char {
        (b'A' + self.0) as char
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for DriveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.letter())
    }
}

/// Media-id byte of a removable floppy; FindFirst on such a drive rescans
/// the host directory on every call.
pub const MEDIA_ID_FLOPPY: u8 = 0xF0;

/// Allocation geometry reported to the guest.
#[derive(Debug, Clone, Copy)]
pub struct DriveGeometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub total_clusters: u16,
    pub free_clusters: u16,
    pub media_id: u8,
}

impl DriveGeometry {
    /// Conventional fixed-disk geometry for a mounted host directory.
    pub const fn fixed_disk() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 32,
            total_clusters: 32765,
            free_clusters: 16000,
            media_id: 0xF8,
        }
    }

    /// 1.44M floppy geometry; triggers the per-FindFirst rescan.
    pub const fn floppy() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            total_clusters: 2880,
            free_clusters: 2880,
            media_id: MEDIA_ID_FLOPPY,
        }
    }

    /// CD-ROM geometry: 2048-byte sectors, nothing free.
    pub const fn cdrom() -> Self {
        Self {
            bytes_per_sector: 2048,
            sectors_per_cluster: 1,
            total_clusters: 65535,
            free_clusters: 0,
            media_id: 0xF8,
        }
    }
}

/// One FindFirst/FindNext result, shaped the way the guest's DTA wants it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub date: u16,
    pub time: u16,
    pub attr: FileAttributes,
}

/// Search parameters plus the enumeration cursor correlating one
/// FindFirst call with its FindNext successors.
#[derive(Debug, Clone)]
pub struct SearchState {
    pattern: String,
    attr: FileAttributes,
    dir_id: SearchId,
}

impl SearchState {
    /// `pattern` is the 8.3 wildcard mask; `attr` the requested attribute
    /// set (entries carrying Directory/Hidden/System bits outside it are
    /// filtered out).
    pub fn new(pattern: &str, attr: FileAttributes) -> Self {
        Self {
            pattern: pattern.to_uppercase(),
            attr,
            dir_id: 0,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn attr(&self) -> FileAttributes {
        self.attr
    }

    pub(crate) fn dir_id(&self) -> SearchId {
        self.dir_id
    }

    pub(crate) fn set_dir_id(&mut self, id: SearchId) {
        self.dir_id = id;
    }
}

/// Size/timestamp summary returned by `file_stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u32,
    pub date: u16,
    pub time: u16,
}

/// The guest-facing surface of a mounted drive.
///
/// The open-handle registry is passed in by the caller: handles live in the
/// process-wide inventory, not inside any drive, so aliases of the same
/// path can be found and flushed across all mounts.
pub trait DosDrive {
    /// Create (or truncate) a file and open it read-write.
    fn file_create(
        &mut self,
        files: &mut OpenHandleRegistry,
        name: &str,
        attr: FileAttributes,
    ) -> DosResult<FileId>;

    /// Open an existing file. `flags` carries the DOS access mode in the
    /// low nibble plus the inheritance bit.
    fn file_open(
        &mut self,
        files: &mut OpenHandleRegistry,
        name: &str,
        flags: u8,
    ) -> DosResult<FileId>;

    /// Remove a file, force-closing any open handles for it if necessary.
    fn file_unlink(&mut self, files: &mut OpenHandleRegistry, name: &str) -> DosResult<()>;

    /// Begin a directory enumeration; may directly yield the first entry.
    fn find_first(
        &mut self,
        search: &mut SearchState,
        dir: &str,
        fcb_search: bool,
    ) -> DosResult<DirEntry>;

    /// Yield the next matching entry for an enumeration in progress.
    fn find_next(&mut self, search: &mut SearchState) -> DosResult<DirEntry>;

    /// Attribute byte for a path; `None` when it does not exist. No error
    /// code accompanies the miss.
    fn file_attr(&mut self, name: &str) -> Option<FileAttributes>;

    fn make_dir(&mut self, dir: &str) -> DosResult<()>;

    fn remove_dir(&mut self, dir: &str) -> DosResult<()>;

    /// Whether `dir` names an existing directory.
    fn test_dir(&mut self, dir: &str) -> bool;

    /// Record a change of the guest's current directory on this drive.
    /// Validation is `test_dir`'s job; this is the bookkeeping entry point.
    fn change_dir(&mut self, dir: &str);

    fn rename(&mut self, old_name: &str, new_name: &str) -> DosResult<()>;

    fn allocation_info(&self) -> DriveGeometry;

    /// Whether `name` exists and is a plain file.
    fn file_exists(&mut self, name: &str) -> bool;

    /// Size and packed timestamp of a path; `None` when missing.
    fn file_stat(&mut self, name: &str) -> Option<FileStat>;

    fn media_byte(&self) -> u8;

    fn is_remote(&self) -> bool;

    fn is_removable(&self) -> bool;

    /// Release the drive. An `Err` leaves it mounted.
    fn unmount(&mut self) -> DosResult<()>;

    fn drive_id(&self) -> DriveId;
}
