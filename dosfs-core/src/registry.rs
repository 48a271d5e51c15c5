//! Process-wide inventory of open file handles.
//!
//! All drives share one [`OpenHandleRegistry`]; handles are addressed by
//! [`FileId`] slot index. Keeping the inventory outside the drives lets a
//! drive find aliases of a path opened through any mount, flush them
//! before handing out a second handle, and force-close them when the guest
//! unlinks a file that is still open.
//!
//! Slots carry a reference count. Handle duplication adds a reference;
//! closing drops one; the slot is freed when the count reaches zero.

use log::debug;

use crate::drive::DriveId;
use crate::error::{DosError, DosResult};
use crate::file::{OpenFile, SeekOrigin};

/// Most handles that can be open at once, matching the guest's file table.
pub const MAX_OPEN_FILES: usize = 127;

/// Index of one occupied registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u16);

impl FileId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-size arena of open handles with an optional activity hook that
/// fires after every successful read (the embedder's "disk light").
pub struct OpenHandleRegistry {
    slots: Vec<Option<OpenFile>>,
    activity_hook: Option<Box<dyn FnMut() + Send>>,
}

impl Default for OpenHandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenHandleRegistry {
    pub fn new() -> Self {
        let mut slots = Vec::with_capacity(MAX_OPEN_FILES);
        slots.resize_with(MAX_OPEN_FILES, || None);
        Self {
            slots,
            activity_hook: None,
        }
    }

    /// Install the read-activity callback.
    pub fn set_activity_hook(&mut self, hook: Box<dyn FnMut() + Send>) {
        self.activity_hook = Some(hook);
    }

    /// Place a handle in the first free slot.
    pub fn insert(&mut self, file: OpenFile) -> DosResult<FileId> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(FileId(index as u16));
            }
        }
        debug!("open handle table exhausted ({} slots)", MAX_OPEN_FILES);
        Err(DosError::TooManyOpenFiles)
    }

    pub fn get(&self, id: FileId) -> DosResult<&OpenFile> {
        self.slots
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(DosError::InvalidHandle)
    }

    pub fn get_mut(&mut self, id: FileId) -> DosResult<&mut OpenFile> {
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(DosError::InvalidHandle)
    }

    /// Find an open handle for `name` on `drive`, across all drives'
    /// insertions.
    pub fn find_open(&self, drive: DriveId, name: &str) -> Option<FileId> {
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.as_ref()
                .filter(|file| file.matches(drive, name))
                .map(|_| FileId(index as u16))
        })
    }

    /// Add a reference to an occupied slot (handle duplication).
    pub fn add_ref(&mut self, id: FileId) -> DosResult<()> {
        self.get_mut(id)?.add_ref();
        Ok(())
    }

    /// Drop a reference; the slot is freed when the count reaches zero.
    pub fn remove_ref(&mut self, id: FileId) -> DosResult<()> {
        let remaining = self.get_mut(id)?.dec_ref();
        if remaining == 0 {
            self.slots[id.index()] = None;
        }
        Ok(())
    }

    pub fn read(&mut self, id: FileId, buf: &mut [u8]) -> DosResult<usize> {
        let actual = self.get_mut(id)?.read(buf)?;
        if let Some(hook) = self.activity_hook.as_mut() {
            hook();
        }
        Ok(actual)
    }

    pub fn write(&mut self, id: FileId, buf: &[u8]) -> DosResult<usize> {
        self.get_mut(id)?.write(buf)
    }

    pub fn seek(&mut self, id: FileId, pos: i32, origin: SeekOrigin) -> DosResult<i32> {
        self.get_mut(id)?.seek(pos, origin)
    }

    pub fn flush(&mut self, id: FileId) -> DosResult<()> {
        self.get_mut(id)?.flush();
        Ok(())
    }

    /// Close one reference to a handle. The underlying resource is released
    /// when the last reference goes; a failure applying a pending timestamp
    /// is reported but the reference is dropped regardless.
    pub fn close(&mut self, id: FileId) -> DosResult<()> {
        let result = self.get_mut(id)?.close();
        self.remove_ref(id)?;
        result
    }

    /// Number of occupied slots.
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Drop every handle without running close logic; used on shutdown.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
