//! CD-ROM drive: a [`LocalDrive`] wrapped with read-only, removable-media
//! semantics and a link to the disc subsystem that owns the actual media.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::access::AccessPolicy;
use crate::error::{DosError, DosResult};
use crate::file::{AccessMode, OPEN_WRITE};
use crate::registry::{FileId, OpenHandleRegistry};

use super::local::LocalDrive;
use super::{
    DirEntry, DosDrive, DriveGeometry, DriveId, FileAttributes, FileStat, SearchState,
};

/// The media-management service a CD-ROM drive registers with. Tracks which
/// drive letters carry a disc, names the mounted volume and reports media
/// changes so the drive can invalidate its caches.
pub trait DiscSubsystem: Send + Sync {
    /// Register a drive letter; returns the subunit the drive will use for
    /// all further queries.
    fn add_drive(&self, letter: char, host_path: &Path) -> DosResult<u8>;

    /// Deregister a drive letter. `false` when it was not registered.
    fn remove_drive(&self, letter: char) -> bool;

    /// Volume label of the mounted disc, if any.
    fn volume_name(&self, subunit: u8) -> Option<String>;

    /// Whether the media changed since the last call. Reading the flag
    /// clears it.
    fn has_media_changed(&self, subunit: u8) -> bool;
}

/// A [`DiscSubsystem`] for a single unchanging disc image; media changes
/// are signalled manually.
pub struct StaticDisc {
    label: Mutex<String>,
    mounted: Mutex<HashSet<char>>,
    media_changed: AtomicBool,
}

impl StaticDisc {
    pub fn new(label: &str) -> Self {
        Self {
            label: Mutex::new(label.to_string()),
            mounted: Mutex::new(HashSet::new()),
            media_changed: AtomicBool::new(false),
        }
    }

    /// Swap in a new disc: relabel and raise the media-change flag.
    pub fn swap_disc(&self, label: &str) {
        *self.label.lock().unwrap() = label.to_string();
        self.media_changed.store(true, Ordering::SeqCst);
    }
}

impl DiscSubsystem for StaticDisc {
    fn add_drive(&self, letter: char, _host_path: &Path) -> DosResult<u8> {
        let mut mounted = self.mounted.lock().unwrap();
        if !mounted.insert(letter.to_ascii_uppercase()) {
            return Err(DosError::InvalidDrive(letter));
        }
        Ok(0)
    }

    fn remove_drive(&self, letter: char) -> bool {
        self.mounted.lock().unwrap().remove(&letter.to_ascii_uppercase())
    }

    fn volume_name(&self, _subunit: u8) -> Option<String> {
        let label = self.label.lock().unwrap();
        if label.is_empty() {
            None
        } else {
            Some(label.clone())
        }
    }

    fn has_media_changed(&self, _subunit: u8) -> bool {
        self.media_changed.swap(false, Ordering::SeqCst)
    }
}

/// Read-only removable drive backed by a host directory holding the disc
/// contents. All mutation attempts are refused before they reach the host.
pub struct CdromDrive {
    inner: LocalDrive,
    disc: Arc<dyn DiscSubsystem>,
    subunit: u8,
    letter: char,
}

impl CdromDrive {
    pub fn new(
        letter: char,
        base_dir: &Path,
        disc: Arc<dyn DiscSubsystem>,
        policy: Arc<dyn AccessPolicy>,
    ) -> DosResult<Self> {
        let subunit = disc.add_drive(letter, base_dir)?;
        let mut inner = LocalDrive::new(letter, base_dir, DriveGeometry::cdrom(), policy)?;
        inner.set_synthetic_label_queries();
        if let Some(label) = disc.volume_name(subunit) {
            inner.set_label(&label);
        }
        Ok(Self {
            inner,
            disc,
            subunit,
            letter,
        })
    }

    pub fn label(&self) -> &str {
        self.inner.label()
    }

    /// Drop cached directory knowledge and relabel after a disc swap.
    fn refresh_if_media_changed(&mut self) {
        if !self.disc.has_media_changed(self.subunit) {
            return;
        }
        self.inner.cache_mut().empty_cache();
        let label = self.disc.volume_name(self.subunit).unwrap_or_default();
        self.inner.set_label(&label);
    }
}

impl DosDrive for CdromDrive {
    fn file_create(
        &mut self,
        _files: &mut OpenHandleRegistry,
        _name: &str,
        _attr: FileAttributes,
    ) -> DosResult<FileId> {
        Err(DosError::AccessDenied)
    }

    fn file_open(
        &mut self,
        files: &mut OpenHandleRegistry,
        name: &str,
        flags: u8,
    ) -> DosResult<FileId> {
        // Read-write requests quietly lose their write half; plain write
        // requests are refused.
        let flags = match AccessMode::from_flags(flags)? {
            AccessMode::ReadWrite => flags & 0xf0,
            AccessMode::Write => return Err(DosError::AccessDenied),
            AccessMode::Read | AccessMode::ReadNoMod => flags,
        };
        debug_assert_ne!(flags & 0x0f, OPEN_WRITE);
        let id = self.inner.file_open(files, name, flags)?;
        files.get_mut(id)?.set_read_only_medium();
        Ok(id)
    }

    fn file_unlink(&mut self, _files: &mut OpenHandleRegistry, _name: &str) -> DosResult<()> {
        Err(DosError::AccessDenied)
    }

    fn find_first(
        &mut self,
        search: &mut SearchState,
        dir: &str,
        fcb_search: bool,
    ) -> DosResult<DirEntry> {
        self.refresh_if_media_changed();
        self.inner.find_first(search, dir, fcb_search)
    }

    fn find_next(&mut self, search: &mut SearchState) -> DosResult<DirEntry> {
        self.inner.find_next(search)
    }

    fn file_attr(&mut self, name: &str) -> Option<FileAttributes> {
        self.inner
            .file_attr(name)
            .map(|attr| attr | FileAttributes::READ_ONLY)
    }

    fn make_dir(&mut self, _dir: &str) -> DosResult<()> {
        Err(DosError::AccessDenied)
    }

    fn remove_dir(&mut self, _dir: &str) -> DosResult<()> {
        Err(DosError::AccessDenied)
    }

    fn test_dir(&mut self, dir: &str) -> bool {
        self.inner.test_dir(dir)
    }

    fn change_dir(&mut self, dir: &str) {
        self.refresh_if_media_changed();
        self.inner.change_dir(dir);
    }

    fn rename(&mut self, _old_name: &str, _new_name: &str) -> DosResult<()> {
        Err(DosError::AccessDenied)
    }

    fn allocation_info(&self) -> DriveGeometry {
        self.inner.allocation_info()
    }

    fn file_exists(&mut self, name: &str) -> bool {
        self.inner.file_exists(name)
    }

    fn file_stat(&mut self, name: &str) -> Option<FileStat> {
        self.inner.file_stat(name)
    }

    fn media_byte(&self) -> u8 {
        self.inner.media_byte()
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn is_removable(&self) -> bool {
        true
    }

    fn unmount(&mut self) -> DosResult<()> {
        if self.disc.remove_drive(self.letter) {
            Ok(())
        } else {
            Err(DosError::UnmountFailed)
        }
    }

    fn drive_id(&self) -> DriveId {
        self.inner.drive_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::HostPassthrough;
    use crate::file::{OPEN_READWRITE, OPEN_WRITE};
    use std::fs;

    fn mounted(dir: &Path, disc: Arc<StaticDisc>) -> CdromDrive {
        CdromDrive::new('D', dir, disc, Arc::new(HostPassthrough)).unwrap()
    }

    #[test]
    fn test_static_disc_registration() {
        let disc = StaticDisc::new("INSTALL");
        assert_eq!(disc.add_drive('d', Path::new("/cd")).unwrap(), 0);
        assert!(disc.add_drive('D', Path::new("/cd")).is_err());
        assert!(disc.remove_drive('D'));
        assert!(!disc.remove_drive('D'));
    }

    #[test]
    fn test_mutations_denied() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DATA.BIN"), b"x").unwrap();
        let mut drive = mounted(dir.path(), Arc::new(StaticDisc::new("DISC1")));
        let mut files = OpenHandleRegistry::new();

        assert!(matches!(
            drive.file_create(&mut files, "X.TXT", FileAttributes::empty()),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(
            drive.file_unlink(&mut files, "DATA.BIN"),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(drive.make_dir("D"), Err(DosError::AccessDenied)));
        assert!(matches!(drive.remove_dir("D"), Err(DosError::AccessDenied)));
        assert!(matches!(
            drive.rename("DATA.BIN", "OTHER.BIN"),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(
            drive.file_open(&mut files, "DATA.BIN", OPEN_WRITE),
            Err(DosError::AccessDenied)
        ));
    }

    #[test]
    fn test_readwrite_open_degrades() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DATA.BIN"), b"abc").unwrap();
        let mut drive = mounted(dir.path(), Arc::new(StaticDisc::new("DISC1")));
        let mut files = OpenHandleRegistry::new();

        let id = drive
            .file_open(&mut files, "DATA.BIN", OPEN_READWRITE)
            .unwrap();
        assert_eq!(files.get(id).unwrap().information(), 0x40);
        let mut buf = [0u8; 3];
        assert_eq!(files.read(id, &mut buf).unwrap(), 3);
        assert!(matches!(
            files.write(id, b"zzz"),
            Err(DosError::AccessDenied)
        ));
    }

    #[test]
    fn test_attr_carries_read_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DATA.BIN"), b"x").unwrap();
        let mut drive = mounted(dir.path(), Arc::new(StaticDisc::new("DISC1")));

        let attr = drive.file_attr("DATA.BIN").unwrap();
        assert!(attr.contains(FileAttributes::READ_ONLY));
        assert!(attr.contains(FileAttributes::ARCHIVE));
    }

    #[test]
    fn test_media_change_relabels() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.TXT"), b"").unwrap();
        let disc = Arc::new(StaticDisc::new("DISC1"));
        let mut drive = mounted(dir.path(), Arc::clone(&disc));
        assert_eq!(drive.label(), "DISC1");

        disc.swap_disc("DISC2");
        let mut search = SearchState::new("*.*", FileAttributes::VOLUME);
        let entry = drive.find_first(&mut search, "", false).unwrap();
        assert_eq!(entry.name, "DISC2");
    }

    #[test]
    fn test_label_query_validates_search_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path(), Arc::new(StaticDisc::new("DISC1")));

        // A bad search directory still fails before the label short-circuit
        let mut search = SearchState::new("*.*", FileAttributes::VOLUME);
        assert!(matches!(
            drive.find_first(&mut search, "NODIR", false),
            Err(DosError::PathNotFound)
        ));

        // An unlabeled disc answers with a synthetic empty entry
        let mut drive = mounted(dir.path(), Arc::new(StaticDisc::new("")));
        let mut search = SearchState::new("*.*", FileAttributes::VOLUME);
        let entry = drive.find_first(&mut search, "", false).unwrap();
        assert_eq!(entry.name, "");
        assert_eq!(entry.attr, FileAttributes::VOLUME);
    }

    #[test]
    fn test_unmount_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let disc = Arc::new(StaticDisc::new("DISC1"));
        let mut drive = mounted(dir.path(), Arc::clone(&disc));

        drive.unmount().unwrap();
        assert!(matches!(drive.unmount(), Err(DosError::UnmountFailed)));
    }
}
