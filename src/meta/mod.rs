//! Metadata backend: where a path's mode/uid/gid/time come from.
//!
//! Two implementations, selected at mount time: [`split::SplitBackend`]
//! delegates to the native inodes of the permissions root, and
//! [`ps::PsBackend`] delegates to the per-directory sidecar table. Both
//! speak the same `(dir_fd, path)` surface so the adapter's recipes do
//! not care which tree answers.

pub mod ps;
pub mod split;

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::os::fd::BorrowedFd;
use std::path::Path;

use crate::error::Result;
use crate::host;
use crate::vfs::{Caller, SetTime, TimeSpec};

/// Metadata record for one guest file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Meta {
    /// Full mode word, type bits included.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub rdev: u64,
    pub ino: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Meta {
    pub fn from_stat(st: &host::Stat) -> Meta {
        Meta {
            mode: st.mode,
            nlink: st.nlink,
            uid: st.uid,
            gid: st.gid,
            size: st.size,
            rdev: st.rdev,
            ino: st.ino,
            atime: st.atime,
            mtime: st.mtime,
            ctime: st.ctime,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }
}

/// Descriptor returned by [`MetaBackend::open`].
///
/// In Split mode this is the permissions-root inode itself; in PS mode
/// it is the sidecar descriptor, unlocked, with the entry's offset
/// remembered for later timestamp updates.
#[derive(Debug)]
pub struct MetaFile {
    pub file: File,
    pub entry_offset: Option<u64>,
}

/// Uniform metadata operations over one of the two trees.
///
/// All path-taking operations address `(dir_fd, relative path)`. Calls
/// against a permissions root are bracketed by the impersonation layer
/// at the adapter; backends never switch identity themselves.
pub trait MetaBackend: Send + Sync {
    fn stat(&self, dir: BorrowedFd<'_>, path: &Path) -> Result<Meta>;

    /// Stat through an open metadata descriptor.
    fn fstat(&self, file: &MetaFile) -> Result<Meta>;

    fn mknod(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        caller: &Caller,
        mode: u32,
        dev: u64,
    ) -> Result<()>;

    fn mkdir(&self, dir: BorrowedFd<'_>, path: &Path, caller: &Caller, mode: u32) -> Result<()>;

    fn unlink(&self, dir: BorrowedFd<'_>, path: &Path, remove_dir: bool) -> Result<()>;

    /// Permission-bit chmod; the type bits survive.
    fn chmod(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()>;

    /// Full-mode chmod, type bits included. Only the sidecar backend can
    /// actually retype a file; it exists for the PS symlink two-phase.
    fn chmod_harder(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()>;

    fn chown(&self, dir: BorrowedFd<'_>, path: &Path, uid: u32, gid: u32) -> Result<()>;

    fn rename(
        &self,
        old_dir: BorrowedFd<'_>,
        old_path: &Path,
        new_dir: BorrowedFd<'_>,
        new_path: &Path,
    ) -> Result<()>;

    fn open(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        caller: &Caller,
        flags: i32,
        mode: u32,
    ) -> Result<MetaFile>;

    fn utimens(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()>;

    fn futimens(&self, file: &MetaFile, atime: SetTime, mtime: SetTime) -> Result<()>;

    fn symlink(&self, dir: BorrowedFd<'_>, target: &OsStr, path: &Path) -> Result<()>;

    fn readlink(&self, dir: BorrowedFd<'_>, path: &Path) -> Result<OsString>;

    /// Materialize a metadata entry for a store-only file, mirroring the
    /// store's native stat. Runs as the mount owner.
    fn mkfull(&self, dir: BorrowedFd<'_>, path: &Path, stat: &host::Stat) -> Result<()>;
}
