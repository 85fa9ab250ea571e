//! Thin wrappers over the host's `*at` filesystem interface.
//!
//! Everything the engine does to a host tree goes through a directory
//! descriptor plus a relative path, so the two roots can be held open
//! once and never re-resolved. Errors are plain [`io::Error`]s; the
//! engine converts them at its boundary.

use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

use crate::vfs::{SetTime, TimeSpec};

fn cstr(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Host stat result, trimmed to the fields the engine consumes.
#[derive(Debug, Copy, Clone)]
pub struct Stat {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub rdev: u64,
    pub size: u64,
    pub blocks: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
    pub ctime: TimeSpec,
}

impl Stat {
    fn from_raw(st: &libc::stat) -> Self {
        Stat {
            dev: st.st_dev as u64,
            ino: st.st_ino as u64,
            mode: st.st_mode as u32,
            nlink: st.st_nlink as u32,
            uid: st.st_uid,
            gid: st.st_gid,
            rdev: st.st_rdev as u64,
            size: st.st_size as u64,
            blocks: st.st_blocks as u64,
            atime: TimeSpec { sec: st.st_atime, nsec: st.st_atime_nsec as u32 },
            mtime: TimeSpec { sec: st.st_mtime, nsec: st.st_mtime_nsec as u32 },
            ctime: TimeSpec { sec: st.st_ctime, nsec: st.st_ctime_nsec as u32 },
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFDIR
    }

    pub fn is_regular(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFREG
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT == libc::S_IFLNK
    }
}

/// Open a root directory for `*at` use.
pub fn open_root(path: &Path) -> io::Result<OwnedFd> {
    let c = cstr(path)?;
    let fd = cvt(unsafe {
        libc::open(c.as_ptr(), libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC)
    })?;
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// `openat`, returning an owned [`File`].
pub fn open_at(dir: BorrowedFd<'_>, path: &Path, flags: i32, mode: u32) -> io::Result<File> {
    let c = cstr(path)?;
    let fd = cvt(unsafe {
        libc::openat(dir.as_raw_fd(), c.as_ptr(), flags | libc::O_CLOEXEC, mode as libc::c_uint)
    })?;
    Ok(unsafe { File::from_raw_fd(fd) })
}

/// Open a subdirectory read-only for further `*at` calls.
pub fn open_dir_at(dir: BorrowedFd<'_>, path: &Path) -> io::Result<OwnedFd> {
    let file = open_at(dir, path, libc::O_RDONLY | libc::O_DIRECTORY, 0)?;
    Ok(OwnedFd::from(file))
}

pub fn stat_at(dir: BorrowedFd<'_>, path: &Path, follow: bool) -> io::Result<Stat> {
    let c = cstr(path)?;
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::fstatat(dir.as_raw_fd(), c.as_ptr(), &mut st, flags) })?;
    Ok(Stat::from_raw(&st))
}

pub fn fstat(fd: RawFd) -> io::Result<Stat> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::fstat(fd, &mut st) })?;
    Ok(Stat::from_raw(&st))
}

pub fn mknod_at(dir: BorrowedFd<'_>, path: &Path, mode: u32, dev: u64) -> io::Result<()> {
    let c = cstr(path)?;
    cvt(unsafe {
        libc::mknodat(dir.as_raw_fd(), c.as_ptr(), mode as libc::mode_t, dev as libc::dev_t)
    })?;
    Ok(())
}

pub fn mkdir_at(dir: BorrowedFd<'_>, path: &Path, mode: u32) -> io::Result<()> {
    let c = cstr(path)?;
    cvt(unsafe { libc::mkdirat(dir.as_raw_fd(), c.as_ptr(), mode as libc::mode_t) })?;
    Ok(())
}

pub fn unlink_at(dir: BorrowedFd<'_>, path: &Path, remove_dir: bool) -> io::Result<()> {
    let c = cstr(path)?;
    let flags = if remove_dir { libc::AT_REMOVEDIR } else { 0 };
    cvt(unsafe { libc::unlinkat(dir.as_raw_fd(), c.as_ptr(), flags) })?;
    Ok(())
}

pub fn rename_at(
    old_dir: BorrowedFd<'_>,
    old_path: &Path,
    new_dir: BorrowedFd<'_>,
    new_path: &Path,
) -> io::Result<()> {
    let old_c = cstr(old_path)?;
    let new_c = cstr(new_path)?;
    cvt(unsafe {
        libc::renameat(old_dir.as_raw_fd(), old_c.as_ptr(), new_dir.as_raw_fd(), new_c.as_ptr())
    })?;
    Ok(())
}

pub fn chmod_at(dir: BorrowedFd<'_>, path: &Path, mode: u32) -> io::Result<()> {
    let c = cstr(path)?;
    cvt(unsafe { libc::fchmodat(dir.as_raw_fd(), c.as_ptr(), mode as libc::mode_t, 0) })?;
    Ok(())
}

pub fn chown_at(
    dir: BorrowedFd<'_>,
    path: &Path,
    uid: u32,
    gid: u32,
    follow: bool,
) -> io::Result<()> {
    let c = cstr(path)?;
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    cvt(unsafe { libc::fchownat(dir.as_raw_fd(), c.as_ptr(), uid, gid, flags) })?;
    Ok(())
}

pub fn symlink_at(target: &OsStr, dir: BorrowedFd<'_>, path: &Path) -> io::Result<()> {
    let target_c = CString::new(target.as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let c = cstr(path)?;
    cvt(unsafe { libc::symlinkat(target_c.as_ptr(), dir.as_raw_fd(), c.as_ptr()) })?;
    Ok(())
}

pub fn readlink_at(dir: BorrowedFd<'_>, path: &Path) -> io::Result<OsString> {
    let c = cstr(path)?;
    let mut buf = vec![0u8; libc::PATH_MAX as usize];
    let len = unsafe {
        libc::readlinkat(dir.as_raw_fd(), c.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(len as usize);
    Ok(OsString::from_vec(buf))
}

pub fn access_at(dir: BorrowedFd<'_>, path: &Path, mask: u32) -> io::Result<()> {
    let c = cstr(path)?;
    cvt(unsafe { libc::faccessat(dir.as_raw_fd(), c.as_ptr(), mask as libc::c_int, 0) })?;
    Ok(())
}

fn to_timespec(time: SetTime) -> libc::timespec {
    match time {
        SetTime::Omit => libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_OMIT },
        SetTime::Now => libc::timespec { tv_sec: 0, tv_nsec: libc::UTIME_NOW },
        SetTime::Set(ts) => libc::timespec { tv_sec: ts.sec, tv_nsec: ts.nsec as libc::c_long },
    }
}

pub fn utimens_at(
    dir: BorrowedFd<'_>,
    path: &Path,
    atime: SetTime,
    mtime: SetTime,
    follow: bool,
) -> io::Result<()> {
    let c = cstr(path)?;
    let flags = if follow { 0 } else { libc::AT_SYMLINK_NOFOLLOW };
    let times = [to_timespec(atime), to_timespec(mtime)];
    cvt(unsafe { libc::utimensat(dir.as_raw_fd(), c.as_ptr(), times.as_ptr(), flags) })?;
    Ok(())
}

pub fn futimens(fd: RawFd, atime: SetTime, mtime: SetTime) -> io::Result<()> {
    let times = [to_timespec(atime), to_timespec(mtime)];
    cvt(unsafe { libc::futimens(fd, times.as_ptr()) })?;
    Ok(())
}

/// Advisory whole-file lock operations.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flock {
    Shared,
    Exclusive,
    Unlock,
}

pub fn flock(fd: RawFd, op: Flock) -> io::Result<()> {
    let op = match op {
        Flock::Shared => libc::LOCK_SH,
        Flock::Exclusive => libc::LOCK_EX,
        Flock::Unlock => libc::LOCK_UN,
    };
    cvt(unsafe { libc::flock(fd, op) })?;
    Ok(())
}

/// Filesystem statistics, straight from `fstatvfs`.
#[derive(Debug, Copy, Clone, Default)]
pub struct FsStat {
    pub block_size: u64,
    pub fragment_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub files_available: u64,
    pub name_max: u64,
}

pub fn fstatvfs(fd: RawFd) -> io::Result<FsStat> {
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    cvt(unsafe { libc::fstatvfs(fd, &mut st) })?;
    Ok(FsStat {
        block_size: st.f_bsize as u64,
        fragment_size: st.f_frsize as u64,
        blocks: st.f_blocks as u64,
        blocks_free: st.f_bfree as u64,
        blocks_available: st.f_bavail as u64,
        files: st.f_files as u64,
        files_free: st.f_ffree as u64,
        files_available: st.f_favail as u64,
        name_max: st.f_namemax as u64,
    })
}

/// List the names in a directory, `.` and `..` excluded.
///
/// A fresh descriptor is opened so the caller's directory fd keeps its
/// position untouched.
pub fn dir_entries(dir: BorrowedFd<'_>) -> io::Result<Vec<OsString>> {
    let fd = open_dir_at(dir, Path::new("."))?;
    let stream = unsafe { libc::fdopendir(fd.as_raw_fd()) };
    if stream.is_null() {
        return Err(io::Error::last_os_error());
    }
    // fdopendir took ownership of the descriptor.
    std::mem::forget(fd);

    let mut names = Vec::new();
    loop {
        unsafe { *libc::__errno_location() = 0 };
        let entry = unsafe { libc::readdir(stream) };
        if entry.is_null() {
            let err = io::Error::last_os_error();
            unsafe { libc::closedir(stream) };
            if err.raw_os_error() == Some(0) {
                break;
            }
            return Err(err);
        }
        let name = unsafe { std::ffi::CStr::from_ptr((*entry).d_name.as_ptr()) };
        let bytes = name.to_bytes();
        if bytes == b"." || bytes == b".." {
            continue;
        }
        names.push(OsString::from_vec(bytes.to_vec()));
    }
    Ok(names)
}

/// Sequential read on a raw descriptor, for non-seekable handles.
pub fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Sequential write on a raw descriptor, for non-seekable handles.
pub fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// POSIX record-lock description, mirrored from the binding's view.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RecordLock {
    pub kind: RecordLockKind,
    pub whence: i16,
    pub start: i64,
    pub len: i64,
    pub pid: i32,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordLockKind {
    Read,
    Write,
    Unlock,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecordLockCmd {
    Get,
    Set,
    SetWait,
}

pub fn record_lock(fd: RawFd, cmd: RecordLockCmd, lock: &mut RecordLock) -> io::Result<()> {
    let mut fl = libc::flock {
        l_type: match lock.kind {
            RecordLockKind::Read => libc::F_RDLCK as libc::c_short,
            RecordLockKind::Write => libc::F_WRLCK as libc::c_short,
            RecordLockKind::Unlock => libc::F_UNLCK as libc::c_short,
        },
        l_whence: lock.whence,
        l_start: lock.start,
        l_len: lock.len,
        l_pid: lock.pid,
    };
    let cmd = match cmd {
        RecordLockCmd::Get => libc::F_GETLK,
        RecordLockCmd::Set => libc::F_SETLK,
        RecordLockCmd::SetWait => libc::F_SETLKW,
    };
    cvt(unsafe { libc::fcntl(fd, cmd, &mut fl) })?;
    lock.kind = match fl.l_type as libc::c_int {
        libc::F_RDLCK => RecordLockKind::Read,
        libc::F_WRLCK => RecordLockKind::Write,
        _ => RecordLockKind::Unlock,
    };
    lock.whence = fl.l_whence;
    lock.start = fl.l_start;
    lock.len = fl.l_len;
    lock.pid = fl.l_pid;
    Ok(())
}
