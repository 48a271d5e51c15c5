//! Error types for the DOS filesystem layer.

use thiserror::Error;

/// Errors reported to the guest or the embedding emulator.
///
/// The first five variants correspond to the DOS error codes this layer
/// hands back to the guest. The rest cover conditions the original code
/// signalled with a bare failure return and no code set.
#[derive(Error, Debug)]
pub enum DosError {
    #[error("access denied")]
    AccessDenied,

    #[error("invalid access code: {0:#04x}")]
    AccessCodeInvalid(u8),

    #[error("path not found")]
    PathNotFound,

    #[error("no more files")]
    NoMoreFiles,

    #[error("invalid file handle")]
    InvalidHandle,

    #[error("file name does not fit 8.3 format: {0}")]
    NameTooLong(String),

    #[error("invalid drive: {0}")]
    InvalidDrive(char),

    #[error("all file handle slots are in use")]
    TooManyOpenFiles,

    #[error("invalid packed timestamp")]
    InvalidTimestamp,

    #[error("drive could not be unmounted")]
    UnmountFailed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DOS filesystem operations.
pub type DosResult<T> = Result<T, DosError>;
