//! Error kinds for filesystem operations.
//!
//! Every operation on the core returns one of these; the FUSE bridge maps
//! them to errno values via [`FsError::errno`].

use thiserror::Error;

/// Operation failure, local and never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FsError {
    /// A path component does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// The target of create/mkdir is already present.
    #[error("file exists")]
    Exists,
    /// Directory operation on a file.
    #[error("not a directory")]
    NotDir,
    /// File operation on a directory.
    #[error("is a directory")]
    IsDir,
    /// rmdir or rename-over of a non-empty directory.
    #[error("directory not empty")]
    NotEmpty,
    /// A name component exceeds the 511-byte limit.
    #[error("file name too long")]
    NameTooLong,
    /// Capacity reservation failed.
    #[error("no space left on device")]
    OutOfSpace,
}

impl FsError {
    /// The positive errno value for `reply.error(...)` at the FUSE boundary.
    pub fn errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::NotDir => libc::ENOTDIR,
            FsError::IsDir => libc::EISDIR,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::OutOfSpace => libc::ENOSPC,
        }
    }
}
