//! One logical open instance of a guest file.
//!
//! An [`OpenFile`] pairs a guest name with an optional host stream. The
//! stream is optional because removable backing media can vanish while the
//! guest still holds the handle; DOS programs expect such handles to keep
//! answering "ok" (zero bytes read, offset 0) rather than erroring.
//!
//! Host streams are independently buffered, so switching between reads and
//! writes requires an explicit re-seek to the current offset. The
//! `last_action` field tracks which direction the stream last moved and
//! the read/write paths insert the correction.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::debug;

use crate::dostime::{pack_system_time, unpack_to_system_time, FALLBACK_DATE, FALLBACK_TIME};
use crate::drive::{DriveId, FileAttributes};
use crate::error::{DosError, DosResult};
use crate::name::same_name;

/// DOS access-mode values (low nibble of the open flags).
pub const OPEN_READ: u8 = 0x00;
pub const OPEN_WRITE: u8 = 0x01;
pub const OPEN_READWRITE: u8 = 0x02;
/// Read without updating timestamps; used by some programs for probing.
pub const OPEN_READ_NO_MOD: u8 = 0x04;
/// Handle-inheritance bit carried alongside the access mode.
pub const OPEN_FLAG_INHERIT: u8 = 0x80;

/// Decoded access mode of an open request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
    ReadNoMod,
}

impl AccessMode {
    /// Decode the low nibble of a DOS open-flags byte.
    pub fn from_flags(flags: u8) -> DosResult<Self> {
        match flags & 0x0f {
            OPEN_READ => Ok(Self::Read),
            OPEN_WRITE => Ok(Self::Write),
            OPEN_READWRITE => Ok(Self::ReadWrite),
            OPEN_READ_NO_MOD => Ok(Self::ReadNoMod),
            other => Err(DosError::AccessCodeInvalid(other)),
        }
    }
}

/// Seek origin as the guest requests it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOrigin {
    Set,
    Current,
    End,
}

impl SeekOrigin {
    /// Decode the DOS seek-type byte (0/1/2).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Set),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// Direction the host stream last moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastAction {
    #[default]
    None,
    Read,
    Write,
}

/// One open guest file.
pub struct OpenFile {
    name: String,
    host_path: PathBuf,
    host: Option<File>,
    drive: DriveId,
    pub attr: FileAttributes,
    date: u16,
    time: u16,
    flags: u8,
    refs: u32,
    last_action: LastAction,
    stream_pos: u64,
    read_only_medium: bool,
    pending_stamp: bool,
    open: bool,
}

impl OpenFile {
    /// Wrap a freshly opened host stream. Snapshots the host modification
    /// time into the packed date/time fields.
    pub fn new(name: &str, host_path: PathBuf, host: File, drive: DriveId, flags: u8) -> Self {
        let mut file = Self {
            name: name.to_string(),
            host_path,
            host: Some(host),
            drive,
            attr: FileAttributes::ARCHIVE,
            date: FALLBACK_DATE,
            time: FALLBACK_TIME,
            flags,
            refs: 1,
            last_action: LastAction::None,
            stream_pos: 0,
            read_only_medium: false,
            pending_stamp: false,
            open: true,
        };
        file.update_date_time_from_host();
        file
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn drive(&self) -> DriveId {
        self.drive
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn date(&self) -> u16 {
        self.date
    }

    pub fn time(&self) -> u16 {
        self.time
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn access_mode(&self) -> AccessMode {
        // flags were validated at open time; Read is the safe default
        AccessMode::from_flags(self.flags).unwrap_or(AccessMode::Read)
    }

    pub fn set_read_only_medium(&mut self) {
        self.read_only_medium = true;
    }

    /// 0x40 when the handle sits on a read-only medium, 0 otherwise.
    pub fn information(&self) -> u16 {
        if self.read_only_medium {
            0x40
        } else {
            0
        }
    }

    /// Whether this is an open handle for `name` on `drive`.
    pub fn matches(&self, drive: DriveId, name: &str) -> bool {
        self.open && self.drive == drive && same_name(&self.name, name)
    }

    pub(crate) fn add_ref(&mut self) {
        self.refs += 1;
    }

    pub(crate) fn dec_ref(&mut self) -> u32 {
        self.refs = self.refs.saturating_sub(1);
        self.refs
    }

    /// Record the host stream's current offset.
    fn tell(&mut self) -> std::io::Result<u64> {
        let host = self
            .host
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))?;
        match host.stream_position() {
            Ok(pos) => {
                self.stream_pos = pos;
                Ok(pos)
            }
            Err(e) => {
                debug!("failed obtaining position in file {}", self.name);
                Err(e)
            }
        }
    }

    /// Re-seek the host stream to the recorded offset; the barrier
    /// between a read phase and a write phase.
    fn sync_position(&mut self) {
        if self.tell().is_ok() {
            if let Some(host) = self.host.as_mut() {
                if host.seek(SeekFrom::Start(self.stream_pos)).is_err() {
                    debug!(
                        "failed seeking to byte {} in file {}",
                        self.stream_pos, self.name
                    );
                }
            }
        }
    }

    /// Read into `buf`, honoring the access mode and the absent-resource
    /// contract. Returns the number of bytes actually transferred.
    pub fn read(&mut self, buf: &mut [u8]) -> DosResult<usize> {
        if self.access_mode() == AccessMode::Write {
            return Err(DosError::AccessDenied);
        }
        if self.host.is_none() {
            // Backing media is gone: report success with nothing read
            return Ok(0);
        }
        if self.last_action == LastAction::Write {
            self.sync_position();
        }
        self.last_action = LastAction::Read;

        let Some(host) = self.host.as_mut() else {
            return Ok(0);
        };
        let actual = host.read(buf)?;
        self.stream_pos += actual as u64;
        Ok(actual)
    }

    /// Write `buf`. An empty buffer means "truncate at the current
    /// offset". A short write is reported through the count, not an error.
    pub fn write(&mut self, buf: &[u8]) -> DosResult<usize> {
        match self.access_mode() {
            AccessMode::Read | AccessMode::ReadNoMod => return Err(DosError::AccessDenied),
            AccessMode::Write | AccessMode::ReadWrite => {}
        }
        if self.host.is_none() {
            return Ok(0);
        }
        if self.last_action == LastAction::Read {
            self.sync_position();
        }
        self.last_action = LastAction::Write;

        if buf.is_empty() {
            let pos = self.tell()?;
            if let Some(host) = self.host.as_ref() {
                if let Err(e) = host.set_len(pos) {
                    debug!("failed truncating file {}", self.name);
                    return Err(e.into());
                }
            }
            return Ok(0);
        }

        let Some(host) = self.host.as_mut() else {
            return Ok(0);
        };
        let actual = host.write(buf)?;
        self.stream_pos += actual as u64;
        if actual != buf.len() {
            debug!(
                "only wrote {} of {} requested bytes to file {}",
                actual,
                buf.len(),
                self.name
            );
        }
        Ok(actual)
    }

    /// Seek relative to `origin` and report the resulting absolute offset.
    /// A failed seek lands at end-of-file so the guest always ends up at a
    /// defined position.
    pub fn seek(&mut self, pos: i32, origin: SeekOrigin) -> DosResult<i32> {
        let Some(host) = self.host.as_mut() else {
            return Ok(0);
        };

        let target = match origin {
            SeekOrigin::Set if pos >= 0 => Some(SeekFrom::Start(pos as u64)),
            SeekOrigin::Set => None,
            SeekOrigin::Current => Some(SeekFrom::Current(pos as i64)),
            SeekOrigin::End => Some(SeekFrom::End(pos as i64)),
        };

        let landed = match target.map(|t| host.seek(t)) {
            Some(Ok(p)) => p,
            _ => {
                debug!("failed seeking to byte {} in file {}", pos, self.name);
                host.seek(SeekFrom::End(0)).unwrap_or(0)
            }
        };
        self.stream_pos = landed;
        self.last_action = LastAction::None;

        debug_assert!(landed <= i32::MAX as u64);
        Ok(landed.min(i32::MAX as u64) as i32)
    }

    /// Release the host resource if this is the last reference, applying
    /// any pending guest-set timestamp first. The timestamp conversion and
    /// application is the only way this can fail; the release itself never
    /// does.
    pub fn close(&mut self) -> DosResult<()> {
        if self.refs != 1 {
            return Ok(());
        }
        let stamp_result = self.apply_pending_stamp();
        self.host = None;
        self.open = false;
        stamp_result
    }

    fn apply_pending_stamp(&mut self) -> DosResult<()> {
        if !self.pending_stamp {
            return Ok(());
        }
        self.pending_stamp = false;
        let stamp = unpack_to_system_time(self.date, self.time)?;
        match &self.host {
            Some(host) => host.set_modified(stamp)?,
            None => {
                // The stream was dropped by willBecomeUnavailable; reach
                // the file through its resolved host path instead.
                let reopened = OpenOptions::new().write(true).open(&self.host_path)?;
                reopened.set_modified(stamp)?;
            }
        }
        Ok(())
    }

    /// Correct the host stream after a write phase. Does nothing unless
    /// the last action was a write. Called before a second concurrent open
    /// of the same name is granted.
    pub fn flush(&mut self) {
        if self.last_action != LastAction::Write {
            return;
        }
        self.sync_position();
        // Reset the state even if the stream is broken
        self.last_action = LastAction::None;
    }

    /// Snapshot the host modification time into the packed date/time
    /// fields. `false` when the handle has no live backing resource.
    pub fn update_date_time_from_host(&mut self) -> bool {
        if !self.open {
            return false;
        }
        let Some(host) = self.host.as_ref() else {
            return false;
        };
        self.date = FALLBACK_DATE;
        self.time = FALLBACK_TIME;
        if let Ok(meta) = host.metadata() {
            if let Ok(mtime) = meta.modified() {
                let (date, time) = pack_system_time(mtime);
                self.date = date;
                self.time = time;
            }
        }
        true
    }

    /// Record a guest-set timestamp to apply on the final close.
    pub fn set_pending_time(&mut self, date: u16, time: u16) {
        self.date = date;
        self.time = time;
        self.pending_stamp = true;
    }

    /// Drop the backing host resource while the logical handle stays open.
    /// Subsequent reads, writes and seeks succeed trivially.
    pub fn will_become_unavailable(&mut self) {
        self.host = None;
    }
}
