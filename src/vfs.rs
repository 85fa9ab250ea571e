//! Defines the guest-facing Virtual File System interface --- [`Vfs`].
//!
//! This is the contract a kernel filesystem-in-userspace binding drives:
//! one method per VFS callback, taking the guest caller's identity and
//! returning engine [`Result`]s whose errors carry the errno the binding
//! must reply with.

use std::ffi::{OsStr, OsString};
use std::path::Path;

use async_trait::async_trait;

pub use crate::error::{Error, Result};
pub use crate::host::{FsStat, RecordLock, RecordLockCmd, RecordLockKind};

/// Maximum length of a single name component, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// The mode bits the engine supports: permission bits plus the three
/// file types an overlay can represent.
pub const SUPPORTED_MODES: u32 = 0o7777 | libc::S_IFLNK | libc::S_IFREG | libc::S_IFDIR;

/// Time of file events, host epoch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: u32,
}

/// Strategy for updating a timestamp.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SetTime {
    /// Leave the stored value untouched.
    Omit,
    /// Stamp the engine's current time.
    Now,
    /// Store the caller-provided time.
    Set(TimeSpec),
}

/// File type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    BlockDevice,
    CharacterDevice,
    Socket,
    Fifo,
}

impl FileType {
    /// Classify the `S_IFMT` bits of a mode.
    pub fn from_mode(mode: u32) -> FileType {
        match mode & libc::S_IFMT {
            libc::S_IFDIR => FileType::Directory,
            libc::S_IFLNK => FileType::Symlink,
            libc::S_IFBLK => FileType::BlockDevice,
            libc::S_IFCHR => FileType::CharacterDevice,
            libc::S_IFSOCK => FileType::Socket,
            libc::S_IFIFO => FileType::Fifo,
            _ => FileType::Regular,
        }
    }
}

/// File attributes as presented to the guest.
#[derive(Debug, Copy, Clone)]
pub struct FileAttr {
    pub file_type: FileType,
    /// Full mode word, type bits included.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    /// Bytes used on the store, from the store's block count.
    pub used: u64,
    pub rdev: u64,
    pub ino: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl FileAttr {
    pub(crate) fn from_stat(st: &crate::host::Stat) -> FileAttr {
        FileAttr {
            file_type: FileType::from_mode(st.mode),
            mode: st.mode,
            nlink: st.nlink,
            uid: st.uid,
            gid: st.gid,
            size: st.size,
            used: st.blocks.saturating_mul(512),
            rdev: st.rdev,
            ino: st.ino,
            atime: st.atime,
            mtime: st.mtime,
            ctime: st.ctime,
        }
    }
}

/// The guest caller's identity, as delivered by the kernel binding with
/// every request.
#[derive(Debug, Copy, Clone)]
pub struct Caller {
    pub uid: u32,
    pub gid: u32,
    pub umask: u32,
}

impl Caller {
    pub fn new(uid: u32, gid: u32, umask: u32) -> Self {
        Caller { uid, gid, umask }
    }
}

/// Raw open flags from the binding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpenFlags(pub i32);

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags(libc::O_RDONLY);
    pub const READ_WRITE: OpenFlags = OpenFlags(libc::O_RDWR);
    pub const WRITE_ONLY: OpenFlags = OpenFlags(libc::O_WRONLY);

    /// True when the access mode permits writing.
    pub fn wants_write(self) -> bool {
        matches!(self.0 & libc::O_ACCMODE, libc::O_WRONLY | libc::O_RDWR)
    }

    pub fn truncates(self) -> bool {
        self.0 & libc::O_TRUNC != 0
    }
}

/// Opaque token naming an open file inside the engine's handle table.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Handle(pub u64);

/// One merged directory entry, name already demangled for presentation.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: OsString,
    pub attr: FileAttr,
}

/// Virtual File System interface.
#[async_trait]
pub trait Vfs: Send + Sync {
    async fn get_attr(&self, caller: &Caller, path: &Path) -> Result<FileAttr>;

    async fn read_link(&self, caller: &Caller, path: &Path) -> Result<OsString>;

    async fn mk_node(&self, caller: &Caller, path: &Path, mode: u32, dev: u64) -> Result<()>;

    async fn mk_dir(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()>;

    async fn symlink(&self, caller: &Caller, target: &OsStr, path: &Path) -> Result<()>;

    async fn rename(&self, caller: &Caller, from: &Path, to: &Path) -> Result<()>;

    async fn remove(&self, caller: &Caller, path: &Path) -> Result<()>;

    async fn rm_dir(&self, caller: &Caller, path: &Path) -> Result<()>;

    async fn ch_mod(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()>;

    async fn ch_own(&self, caller: &Caller, path: &Path, uid: u32, gid: u32) -> Result<()>;

    async fn truncate(&self, caller: &Caller, path: &Path, size: u64) -> Result<()>;

    async fn utimens(
        &self,
        caller: &Caller,
        path: &Path,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()>;

    async fn open(&self, caller: &Caller, path: &Path, flags: OpenFlags) -> Result<Handle>;

    async fn create(
        &self,
        caller: &Caller,
        path: &Path,
        mode: u32,
        flags: OpenFlags,
    ) -> Result<Handle>;

    async fn read(&self, handle: Handle, offset: u64, count: u32) -> Result<Vec<u8>>;

    async fn write(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<u32>;

    async fn flush(&self, handle: Handle) -> Result<()>;

    async fn release(&self, handle: Handle) -> Result<()>;

    async fn fsync(&self, handle: Handle, datasync: bool) -> Result<()>;

    async fn ftruncate(&self, handle: Handle, size: u64) -> Result<()>;

    async fn fget_attr(&self, handle: Handle) -> Result<FileAttr>;

    async fn futimens(&self, handle: Handle, atime: SetTime, mtime: SetTime) -> Result<()>;

    async fn read_dir(&self, caller: &Caller, path: &Path) -> Result<Vec<DirEntry>>;

    async fn access(&self, caller: &Caller, path: &Path, mask: u32) -> Result<()>;

    async fn statfs(&self, caller: &Caller, path: &Path) -> Result<FsStat>;

    async fn lock(
        &self,
        handle: Handle,
        cmd: RecordLockCmd,
        lock: RecordLock,
    ) -> Result<RecordLock>;
}
