//! A drive letter backed by a host directory.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::access::{AccessPolicy, HostMode};
use crate::cache::{DirCache, NameCache, MAX_OPEN_SEARCHES};
use crate::dostime::{pack_system_time, FALLBACK_DATE, FALLBACK_TIME};
use crate::error::{DosError, DosResult};
use crate::file::{AccessMode, OpenFile, OPEN_READWRITE};
use crate::name::{validate_short_name, wild_match};
use crate::registry::{FileId, OpenHandleRegistry, MAX_OPEN_FILES};

use super::{
    DirEntry, DosDrive, DriveGeometry, DriveId, FileAttributes, FileStat, SearchState,
    MEDIA_ID_FLOPPY,
};

/// Host-directory drive: guest paths are resolved case-insensitively under
/// a base directory, and all host I/O goes through the [`AccessPolicy`].
pub struct LocalDrive {
    id: DriveId,
    base_dir: PathBuf,
    geometry: DriveGeometry,
    cache: Box<dyn NameCache>,
    policy: Arc<dyn AccessPolicy>,
    /// Paths already reported as write-protected, to log the notice once.
    write_protect_notices: HashSet<PathBuf>,
    /// Expanded host directory per enumeration cursor.
    search_dirs: Vec<PathBuf>,
    current_dir: String,
    /// Answer pure label queries with a synthetic entry even when no label
    /// is set; removable remote drives behave this way.
    synthetic_label_queries: bool,
}

impl LocalDrive {
    pub fn new(
        letter: char,
        base_dir: &Path,
        geometry: DriveGeometry,
        policy: Arc<dyn AccessPolicy>,
    ) -> DosResult<Self> {
        let id = DriveId::from_letter(letter)?;
        let mut search_dirs = Vec::with_capacity(MAX_OPEN_SEARCHES);
        search_dirs.resize_with(MAX_OPEN_SEARCHES, PathBuf::new);
        Ok(Self {
            id,
            base_dir: base_dir.to_path_buf(),
            geometry,
            cache: Box::new(DirCache::new(base_dir)),
            policy,
            write_protect_notices: HashSet::new(),
            search_dirs,
            current_dir: String::new(),
            synthetic_label_queries: false,
        })
    }

    /// Replace the default name cache.
    pub fn with_cache(mut self, mut cache: Box<dyn NameCache>) -> Self {
        cache.set_base_dir(&self.base_dir);
        self.cache = cache;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn current_dir(&self) -> &str {
        &self.current_dir
    }

    pub fn label(&self) -> &str {
        self.cache.label()
    }

    pub fn set_label(&mut self, label: &str) {
        self.cache.set_label(label);
    }

    pub(crate) fn cache_mut(&mut self) -> &mut dyn NameCache {
        self.cache.as_mut()
    }

    pub(crate) fn set_synthetic_label_queries(&mut self) {
        self.synthetic_label_queries = true;
    }

    /// Resolve a guest path (either separator, any casing) to a host path.
    fn host_path(&mut self, name: &str) -> PathBuf {
        let guest = name.replace('\\', "/");
        let raw = self.base_dir.join(guest.trim_start_matches('/'));
        self.cache.expand(&raw)
    }

    fn volume_label_entry(label: &str) -> DirEntry {
        DirEntry {
            name: label.to_string(),
            size: 0,
            date: 0,
            time: 0,
            attr: FileAttributes::VOLUME,
        }
    }
}

impl DosDrive for LocalDrive {
    fn file_create(
        &mut self,
        files: &mut OpenHandleRegistry,
        name: &str,
        attr: FileAttributes,
    ) -> DosResult<FileId> {
        let host = self.host_path(name);
        if !self.policy.allow_write(&host, self.id) {
            return Err(DosError::AccessDenied);
        }

        // An update-mode probe tells us whether the file already existed,
        // which decides whether the cache learns a new name.
        let existed = self
            .policy
            .open_file(&host, self.id, HostMode::ReadWriteUpdate)
            .is_some();
        let Some(stream) = self
            .policy
            .open_file(&host, self.id, HostMode::ReadWriteTruncate)
        else {
            warn!("creating file {} failed on {}", name, self.id);
            return Err(DosError::InvalidHandle);
        };
        if !existed {
            self.cache.add_entry(&host, false);
        }

        let mut file = OpenFile::new(name, host.clone(), stream, self.id, OPEN_READWRITE);
        file.attr = attr | FileAttributes::ARCHIVE;
        self.policy.notify_created(&host, self.id);
        files.insert(file)
    }

    fn file_open(
        &mut self,
        files: &mut OpenHandleRegistry,
        name: &str,
        flags: u8,
    ) -> DosResult<FileId> {
        let mode = AccessMode::from_flags(flags)?;
        let host = self.host_path(name);

        let mut effective_flags = flags;
        let mut host_mode = match mode {
            AccessMode::Read | AccessMode::ReadNoMod => HostMode::Read,
            AccessMode::Write | AccessMode::ReadWrite => HostMode::ReadWriteUpdate,
        };
        if host_mode == HostMode::ReadWriteUpdate && !self.policy.allow_write(&host, self.id) {
            if mode == AccessMode::ReadWrite {
                // Read-write requests degrade to read-only; plain write
                // requests cannot be satisfied at all.
                effective_flags &= 0xf0;
                host_mode = HostMode::Read;
            } else {
                return Err(DosError::AccessDenied);
            }
        }

        // Another handle on the same file may hold buffered writes the new
        // stream would not see yet.
        if let Some(alias) = files.find_open(self.id, name) {
            files.flush(alias)?;
        }

        let mut stream = self.policy.open_file(&host, self.id, host_mode);
        if stream.is_none() && host_mode == HostMode::ReadWriteUpdate {
            // The host refused write access; a read-only retry keeps e.g.
            // files on read-only exports usable.
            stream = self.policy.open_file(&host, self.id, HostMode::Read);
            if stream.is_some() {
                effective_flags &= 0xf0;
                if self.write_protect_notices.insert(host.clone()) {
                    let shown = host
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| name.to_string());
                    info!("FILESYSTEM: protected from modification: {}", shown);
                }
            }
        }
        let Some(stream) = stream else {
            return Err(DosError::InvalidHandle);
        };

        files.insert(OpenFile::new(name, host, stream, self.id, effective_flags))
    }

    fn file_unlink(&mut self, files: &mut OpenHandleRegistry, name: &str) -> DosResult<()> {
        let host = self.host_path(name);
        if !self.policy.allow_write(&host, self.id) {
            return Err(DosError::AccessDenied);
        }

        if self.policy.remove_file(&host, self.id) {
            self.cache.delete_entry(&host, false);
            self.policy.notify_removed(&host, self.id);
            return Ok(());
        }

        // The removal may be blocked by our own open handles; drain their
        // references so the host lets go, then retry once.
        let mut attempts = 0;
        while let Some(open) = files.find_open(self.id, name) {
            if attempts >= MAX_OPEN_FILES {
                break;
            }
            attempts += 1;
            let _ = files.close(open);
        }
        if self.policy.remove_file(&host, self.id) {
            self.cache.delete_entry(&host, false);
            self.policy.notify_removed(&host, self.id);
            Ok(())
        } else {
            debug!("unlink {} failed with every handle closed", name);
            Err(DosError::AccessDenied)
        }
    }

    fn find_first(
        &mut self,
        search: &mut SearchState,
        dir: &str,
        fcb_search: bool,
    ) -> DosResult<DirEntry> {
        let guest = dir.replace('\\', "/");
        let guest = guest.trim_start_matches('/');
        if self.geometry.media_id == MEDIA_ID_FLOPPY {
            // Removable media can change behind our back; rescan every time
            self.cache.empty_cache();
        }
        let host_dir = self.cache.expand(&self.base_dir.join(guest));
        let cursor = self
            .cache
            .find_first(&host_dir)
            .ok_or(DosError::PathNotFound)?;
        search.set_dir_id(cursor);
        // A misbehaving cache could hand out a cursor past the slot table
        let slot = self
            .search_dirs
            .get_mut(cursor as usize)
            .ok_or(DosError::PathNotFound)?;
        *slot = host_dir;

        // Volume-label queries are answered from the cache, not the listing
        if search.attr() == FileAttributes::VOLUME {
            let label = self.cache.label();
            if label.is_empty() && !self.synthetic_label_queries {
                return Err(DosError::NoMoreFiles);
            }
            return Ok(Self::volume_label_entry(label));
        }
        if search.attr().contains(FileAttributes::VOLUME)
            && guest.is_empty()
            && !fcb_search
            && !self.cache.label().is_empty()
            && wild_match(self.cache.label(), search.pattern())
        {
            let label = self.cache.label().to_string();
            return Ok(Self::volume_label_entry(&label));
        }

        self.find_next(search)
    }

    fn find_next(&mut self, search: &mut SearchState) -> DosResult<DirEntry> {
        let dir = self
            .search_dirs
            .get(search.dir_id() as usize)
            .cloned()
            .ok_or(DosError::NoMoreFiles)?;

        // The cursor yields a finite snapshot, so this terminates.
        loop {
            let raw = self
                .cache
                .find_next(search.dir_id())
                .ok_or(DosError::NoMoreFiles)?;
            if !wild_match(&raw, search.pattern()) {
                continue;
            }
            // Host names too long for 8.3 are invisible to the guest
            let Ok(short) = validate_short_name(&raw) else {
                continue;
            };
            let Some(stat) = self.policy.stat_path(&dir.join(&raw), self.id) else {
                continue;
            };

            let attr = if stat.is_directory {
                FileAttributes::DIRECTORY
            } else {
                FileAttributes::ARCHIVE
            };
            // Skip entry kinds the search did not ask for
            let masked = attr
                & (FileAttributes::DIRECTORY | FileAttributes::HIDDEN | FileAttributes::SYSTEM);
            if !search.attr().contains(masked) {
                continue;
            }

            let (date, time) = stat
                .mtime
                .map(pack_system_time)
                .unwrap_or((FALLBACK_DATE, FALLBACK_TIME));
            return Ok(DirEntry {
                name: short,
                size: stat.size.min(u32::MAX as u64) as u32,
                date,
                time,
                attr,
            });
        }
    }

    fn file_attr(&mut self, name: &str) -> Option<FileAttributes> {
        let host = self.host_path(name);
        let stat = self.policy.stat_path(&host, self.id)?;
        let mut attr = FileAttributes::ARCHIVE;
        if stat.is_directory {
            attr |= FileAttributes::DIRECTORY;
        }
        Some(attr)
    }

    fn make_dir(&mut self, dir: &str) -> DosResult<()> {
        let host = self.host_path(dir);
        if !self.policy.allow_write(&host, self.id) {
            return Err(DosError::AccessDenied);
        }
        if self.policy.create_dir(&host, self.id) {
            self.cache.cache_out(&host, true);
            Ok(())
        } else {
            Err(DosError::PathNotFound)
        }
    }

    fn remove_dir(&mut self, dir: &str) -> DosResult<()> {
        // Directory removal goes straight to the host; the policy's write
        // gate covers files only.
        let host = self.host_path(dir);
        if std::fs::remove_dir(&host).is_ok() {
            self.cache.delete_entry(&host, true);
            Ok(())
        } else {
            Err(DosError::PathNotFound)
        }
    }

    fn test_dir(&mut self, dir: &str) -> bool {
        let host = self.host_path(dir);
        self.policy.is_directory(&host, self.id)
    }

    fn change_dir(&mut self, dir: &str) {
        let guest = dir.replace('\\', "/");
        self.current_dir = guest.trim_matches('/').to_string();
    }

    fn rename(&mut self, old_name: &str, new_name: &str) -> DosResult<()> {
        // Renames also bypass the write gate, matching remove_dir.
        let old_host = self.host_path(old_name);
        let new_host = self.host_path(new_name);
        if std::fs::rename(&old_host, &new_host).is_ok() {
            self.cache.cache_out(&new_host, false);
            Ok(())
        } else {
            Err(DosError::PathNotFound)
        }
    }

    fn allocation_info(&self) -> DriveGeometry {
        self.geometry
    }

    fn file_exists(&mut self, name: &str) -> bool {
        let host = self.host_path(name);
        match self.policy.stat_path(&host, self.id) {
            Some(stat) => !stat.is_directory,
            None => false,
        }
    }

    fn file_stat(&mut self, name: &str) -> Option<FileStat> {
        let host = self.host_path(name);
        let stat = self.policy.stat_path(&host, self.id)?;
        let (date, time) = stat
            .mtime
            .map(pack_system_time)
            .unwrap_or((FALLBACK_DATE, FALLBACK_TIME));
        Some(FileStat {
            size: stat.size.min(u32::MAX as u64) as u32,
            date,
            time,
        })
    }

    fn media_byte(&self) -> u8 {
        self.geometry.media_id
    }

    fn is_remote(&self) -> bool {
        false
    }

    fn is_removable(&self) -> bool {
        false
    }

    fn unmount(&mut self) -> DosResult<()> {
        Ok(())
    }

    fn drive_id(&self) -> DriveId {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::HostPassthrough;
    use crate::file::{OPEN_READ, OPEN_WRITE};
    use std::fs;

    fn mounted(dir: &Path) -> LocalDrive {
        LocalDrive::new(
            'C',
            dir,
            DriveGeometry::fixed_disk(),
            Arc::new(HostPassthrough),
        )
        .unwrap()
    }

    #[test]
    fn test_create_write_reopen_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());
        let mut files = OpenHandleRegistry::new();

        let id = drive
            .file_create(&mut files, "NEW.TXT", FileAttributes::empty())
            .unwrap();
        assert_eq!(files.write(id, b"content").unwrap(), 7);
        files.close(id).unwrap();

        let id = drive.file_open(&mut files, "new.txt", OPEN_READ).unwrap();
        let mut buf = [0u8; 7];
        assert_eq!(files.read(id, &mut buf).unwrap(), 7);
        assert_eq!(&buf, b"content");
        files.close(id).unwrap();
        assert_eq!(files.open_count(), 0);
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());
        let mut files = OpenHandleRegistry::new();
        assert!(matches!(
            drive.file_open(&mut files, "NOPE.TXT", OPEN_READ),
            Err(DosError::InvalidHandle)
        ));
    }

    #[test]
    fn test_open_bad_access_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());
        let mut files = OpenHandleRegistry::new();
        assert!(matches!(
            drive.file_open(&mut files, "X.TXT", 0x03),
            Err(DosError::AccessCodeInvalid(0x03))
        ));
    }

    #[test]
    fn test_unlink_succeeds_while_file_is_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("DOOMED.TXT"), b"x").unwrap();
        let mut drive = mounted(dir.path());
        let mut files = OpenHandleRegistry::new();

        let id = drive
            .file_open(&mut files, "DOOMED.TXT", OPEN_READ)
            .unwrap();
        drive.file_unlink(&mut files, "DOOMED.TXT").unwrap();
        assert!(!dir.path().join("DOOMED.TXT").exists());
        // Any handle the unlink did not have to drain still closes cleanly
        if files.get(id).is_ok() {
            files.close(id).unwrap();
        }
        assert_eq!(files.open_count(), 0);
    }

    #[test]
    fn test_find_first_lists_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.TXT"), b"12345").unwrap();
        fs::write(dir.path().join("B.DOC"), b"").unwrap();
        fs::create_dir(dir.path().join("SUB")).unwrap();
        let mut drive = mounted(dir.path());

        // Pattern filter without the DIRECTORY bit: SUB is invisible
        let mut search = SearchState::new("*.TXT", FileAttributes::ARCHIVE);
        let entry = drive.find_first(&mut search, "", false).unwrap();
        assert_eq!(entry.name, "A.TXT");
        assert_eq!(entry.size, 5);
        assert!(entry.attr.contains(FileAttributes::ARCHIVE));
        assert!(matches!(
            drive.find_next(&mut search),
            Err(DosError::NoMoreFiles)
        ));

        // With the DIRECTORY bit the subdirectory shows up
        let mut search = SearchState::new(
            "*.*",
            FileAttributes::ARCHIVE | FileAttributes::DIRECTORY,
        );
        let mut names = Vec::new();
        let mut entry = drive.find_first(&mut search, "", false);
        while let Ok(e) = entry {
            names.push(e.name);
            entry = drive.find_next(&mut search);
        }
        assert_eq!(names, vec!["A.TXT", "B.DOC", "SUB"]);
    }

    #[test]
    fn test_find_first_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());
        let mut search = SearchState::new("*.*", FileAttributes::ARCHIVE);
        assert!(matches!(
            drive.find_first(&mut search, "NODIR", false),
            Err(DosError::PathNotFound)
        ));
    }

    #[test]
    fn test_find_skips_unrepresentable_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("averylongfilename.txt"), b"").unwrap();
        fs::write(dir.path().join("OK.TXT"), b"").unwrap();
        let mut drive = mounted(dir.path());

        let mut search = SearchState::new("*.*", FileAttributes::ARCHIVE);
        let entry = drive.find_first(&mut search, "", false).unwrap();
        assert_eq!(entry.name, "OK.TXT");
        assert!(drive.find_next(&mut search).is_err());
    }

    #[test]
    fn test_volume_label_search() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());

        let mut search = SearchState::new("*.*", FileAttributes::VOLUME);
        assert!(matches!(
            drive.find_first(&mut search, "", false),
            Err(DosError::NoMoreFiles)
        ));

        drive.set_label("GAMEDISK");
        let mut search = SearchState::new("*.*", FileAttributes::VOLUME);
        let entry = drive.find_first(&mut search, "", false).unwrap();
        assert_eq!(entry.name, "GAMEDISK");
        assert_eq!(entry.attr, FileAttributes::VOLUME);
    }

    #[test]
    fn test_dir_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path());

        drive.make_dir("GAMES").unwrap();
        assert!(drive.test_dir("games"));
        // Directories carry the Archive bit alongside Directory
        let attr = drive.file_attr("GAMES").unwrap();
        assert!(attr.contains(FileAttributes::DIRECTORY | FileAttributes::ARCHIVE));

        drive.remove_dir("GAMES").unwrap();
        assert!(!drive.test_dir("GAMES"));
        assert!(matches!(
            drive.remove_dir("GAMES"),
            Err(DosError::PathNotFound)
        ));
    }

    #[test]
    fn test_rename() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("OLD.TXT"), b"x").unwrap();
        let mut drive = mounted(dir.path());

        drive.rename("OLD.TXT", "NEW.TXT").unwrap();
        assert!(drive.file_exists("NEW.TXT"));
        assert!(!drive.file_exists("OLD.TXT"));
        assert!(matches!(
            drive.rename("OLD.TXT", "NEWER.TXT"),
            Err(DosError::PathNotFound)
        ));
    }

    struct RunawayCursorCache;

    impl NameCache for RunawayCursorCache {
        fn set_base_dir(&mut self, _base: &Path) {}
        fn expand(&mut self, path: &Path) -> PathBuf {
            path.to_path_buf()
        }
        fn find_first(&mut self, _dir: &Path) -> Option<crate::cache::SearchId> {
            Some(4096)
        }
        fn find_next(&mut self, _id: crate::cache::SearchId) -> Option<String> {
            None
        }
        fn add_entry(&mut self, _path: &Path, _is_dir: bool) {}
        fn delete_entry(&mut self, _path: &Path, _is_dir: bool) {}
        fn cache_out(&mut self, _path: &Path, _is_dir: bool) {}
        fn label(&self) -> &str {
            ""
        }
        fn set_label(&mut self, _label: &str) {}
        fn empty_cache(&mut self) {}
    }

    #[test]
    fn test_out_of_range_cursor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut drive = mounted(dir.path()).with_cache(Box::new(RunawayCursorCache));
        let mut search = SearchState::new("*.*", FileAttributes::ARCHIVE);
        assert!(matches!(
            drive.find_first(&mut search, "", false),
            Err(DosError::PathNotFound)
        ));
    }

    struct DenyWrites;

    impl AccessPolicy for DenyWrites {
        fn allow_write(&self, _path: &Path, _drive: DriveId) -> bool {
            false
        }
        fn open_file(
            &self,
            path: &Path,
            drive: DriveId,
            mode: HostMode,
        ) -> Option<std::fs::File> {
            HostPassthrough.open_file(path, drive, mode)
        }
        fn remove_file(&self, _path: &Path, _drive: DriveId) -> bool {
            false
        }
        fn path_exists(&self, path: &Path, drive: DriveId) -> bool {
            HostPassthrough.path_exists(path, drive)
        }
        fn is_directory(&self, path: &Path, drive: DriveId) -> bool {
            HostPassthrough.is_directory(path, drive)
        }
        fn stat_path(&self, path: &Path, drive: DriveId) -> Option<crate::access::HostStat> {
            HostPassthrough.stat_path(path, drive)
        }
        fn create_dir(&self, _path: &Path, _drive: DriveId) -> bool {
            false
        }
    }

    #[test]
    fn test_write_policy_denials_and_downgrade() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("RO.TXT"), b"data").unwrap();
        let mut drive = LocalDrive::new(
            'C',
            dir.path(),
            DriveGeometry::fixed_disk(),
            Arc::new(DenyWrites),
        )
        .unwrap();
        let mut files = OpenHandleRegistry::new();

        assert!(matches!(
            drive.file_create(&mut files, "X.TXT", FileAttributes::empty()),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(
            drive.file_unlink(&mut files, "RO.TXT"),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(
            drive.make_dir("D"),
            Err(DosError::AccessDenied)
        ));
        assert!(matches!(
            drive.file_open(&mut files, "RO.TXT", OPEN_WRITE),
            Err(DosError::AccessDenied)
        ));

        // Read-write opens degrade to read-only instead of failing
        let id = drive
            .file_open(&mut files, "RO.TXT", OPEN_READWRITE)
            .unwrap();
        assert_eq!(files.get(id).unwrap().flags() & 0x0f, 0);
        let mut buf = [0u8; 4];
        assert_eq!(files.read(id, &mut buf).unwrap(), 4);
        assert!(matches!(
            files.write(id, b"nope"),
            Err(DosError::AccessDenied)
        ));
    }
}
