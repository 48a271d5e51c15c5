//! DOS filesystem emulation over host directories.
//!
//! This crate maps DOS file-level services onto a host filesystem: drive
//! letters backed by host directories ([`LocalDrive`]), read-only
//! removable drives ([`CdromDrive`]), 8.3 names with case-insensitive
//! resolution, packed 16-bit timestamps and DOS error semantics.
//!
//! Open handles live in a shared [`OpenHandleRegistry`] rather than inside
//! any drive, and all host I/O is routed through a pluggable
//! [`AccessPolicy`] so the embedding emulator can veto or observe it.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dosfs_core::{
//!     DosDrive, DriveGeometry, FileAttributes, HostPassthrough, LocalDrive,
//!     OpenHandleRegistry, SearchState,
//! };
//!
//! let mut files = OpenHandleRegistry::new();
//! let mut drive = LocalDrive::new(
//!     'C',
//!     std::path::Path::new("/srv/dos/c"),
//!     DriveGeometry::fixed_disk(),
//!     Arc::new(HostPassthrough),
//! )?;
//!
//! let mut search = SearchState::new("*.EXE", FileAttributes::ARCHIVE);
//! let mut entry = drive.find_first(&mut search, "", false);
//! while let Ok(found) = entry {
//!     println!("{} ({} bytes)", found.name, found.size);
//!     entry = drive.find_next(&mut search);
//! }
//! # Ok::<(), dosfs_core::DosError>(())
//! ```

pub mod access;
pub mod cache;
pub mod dostime;
pub mod drive;
pub mod error;
pub mod file;
pub mod name;
pub mod registry;

pub use access::{AccessPolicy, HostMode, HostPassthrough, HostStat};
pub use cache::{DirCache, NameCache, SearchId, MAX_OPEN_SEARCHES};
pub use dostime::{date_parts, pack_date, pack_time, time_parts};
pub use drive::{
    CdromDrive, DirEntry, DiscSubsystem, DosDrive, DriveGeometry, DriveId, FileAttributes,
    FileStat, LocalDrive, SearchState, StaticDisc, MEDIA_ID_FLOPPY,
};
pub use error::{DosError, DosResult};
pub use file::{AccessMode, OpenFile, SeekOrigin};
pub use name::{same_name, validate_short_name, wild_match, DOS_NAME_LENGTH};
pub use registry::{FileId, OpenHandleRegistry, MAX_OPEN_FILES};
