//! Engine error kinds and their numeric contract.

use std::fmt;
use std::io;

/// Result of engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine.
///
/// Host syscall failures that do not correspond to one of the named
/// kinds travel through [`Error::Host`] with their raw errno, so the
/// kernel binding sees exactly what the host reported.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The guest path resolves to neither a permissions entry nor a
    /// store entry.
    NotFound,
    /// A creation request collided with an existing entry.
    AlreadyExists,
    /// A directory operation named a non-directory.
    NotADirectory,
    /// A non-directory operation named a directory.
    IsADirectory,
    /// The guest named the sidecar file, or tried to delete an entry
    /// of the wrong type.
    NotPermitted,
    /// Invalid argument, e.g. a readlink on an object other than a
    /// symbolic link.
    InvalidArgument,
    /// Requested mode bits fall outside the supported set.
    Unsupported,
    /// Sidecar magic/version mismatch, corrupt free-list, or a
    /// truncated record read.
    Io,
    /// A free-list index would overflow `u32`.
    NoSpace,
    /// Any other host syscall error, passed through by errno.
    Host(i32),
}

impl Error {
    /// Numeric errno for this kind.
    pub fn errno(self) -> i32 {
        match self {
            Error::NotFound => libc::ENOENT,
            Error::AlreadyExists => libc::EEXIST,
            Error::NotADirectory => libc::ENOTDIR,
            Error::IsADirectory => libc::EISDIR,
            Error::NotPermitted => libc::EPERM,
            Error::InvalidArgument => libc::EINVAL,
            Error::Unsupported => libc::EOPNOTSUPP,
            Error::Io => libc::EIO,
            Error::NoSpace => libc::ENOSPC,
            Error::Host(errno) => errno,
        }
    }

    /// Negated errno, the form the kernel binding expects.
    pub fn negated(self) -> i32 {
        -self.errno()
    }

    /// Classify a raw errno.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENOENT => Error::NotFound,
            libc::EEXIST => Error::AlreadyExists,
            libc::ENOTDIR => Error::NotADirectory,
            libc::EISDIR => Error::IsADirectory,
            libc::EPERM => Error::NotPermitted,
            libc::EINVAL => Error::InvalidArgument,
            libc::EOPNOTSUPP => Error::Unsupported,
            libc::EIO => Error::Io,
            libc::ENOSPC => Error::NoSpace,
            other => Error::Host(other),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(errno) => Error::from_errno(errno),
            None => Error::Io,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Host(errno) => write!(f, "host error (errno {errno})"),
            other => write!(f, "{}", io::Error::from_raw_os_error(other.errno())),
        }
    }
}

impl std::error::Error for Error {}
