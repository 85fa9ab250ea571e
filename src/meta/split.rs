//! Split-mode metadata backend: one-to-one `*at` wrappers over the
//! permissions root. The host inode is the metadata record.

use std::ffi::{OsStr, OsString};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use filetime::FileTime;

use crate::error::{Error, Result};
use crate::host;
use crate::vfs::{Caller, SetTime};

use super::{Meta, MetaBackend, MetaFile};

#[derive(Debug, Default)]
pub struct SplitBackend;

/// Create every missing ancestor of `path` under `dir`.
///
/// Used by the symlink and rename retry paths, which may land in a
/// permissions-side directory that was never materialized.
pub fn mkdir_p(dir: BorrowedFd<'_>, path: &Path) -> Result<()> {
    let mut sofar = PathBuf::new();
    for comp in path.components() {
        sofar.push(comp);
        match host::mkdir_at(dir, &sofar, 0o755) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::EEXIST) => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn to_file_time(time: SetTime) -> Option<FileTime> {
    match time {
        SetTime::Omit => None,
        SetTime::Now => Some(FileTime::now()),
        SetTime::Set(ts) => Some(FileTime::from_unix_time(ts.sec, ts.nsec)),
    }
}

impl MetaBackend for SplitBackend {
    fn stat(&self, dir: BorrowedFd<'_>, path: &Path) -> Result<Meta> {
        let st = host::stat_at(dir, path, false)?;
        Ok(Meta::from_stat(&st))
    }

    fn fstat(&self, file: &MetaFile) -> Result<Meta> {
        let st = host::fstat(file.file.as_raw_fd())?;
        Ok(Meta::from_stat(&st))
    }

    fn mknod(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        _caller: &Caller,
        mode: u32,
        dev: u64,
    ) -> Result<()> {
        host::mknod_at(dir, path, mode, dev)?;
        Ok(())
    }

    fn mkdir(&self, dir: BorrowedFd<'_>, path: &Path, _caller: &Caller, mode: u32) -> Result<()> {
        host::mkdir_at(dir, path, mode)?;
        Ok(())
    }

    fn unlink(&self, dir: BorrowedFd<'_>, path: &Path, remove_dir: bool) -> Result<()> {
        host::unlink_at(dir, path, remove_dir)?;
        Ok(())
    }

    fn chmod(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()> {
        host::chmod_at(dir, path, mode & 0o7777)?;
        Ok(())
    }

    fn chmod_harder(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()> {
        // A native inode cannot change type; the permission bits are all
        // that can move.
        self.chmod(dir, path, mode)
    }

    fn chown(&self, dir: BorrowedFd<'_>, path: &Path, uid: u32, gid: u32) -> Result<()> {
        host::chown_at(dir, path, uid, gid, false)?;
        Ok(())
    }

    fn rename(
        &self,
        old_dir: BorrowedFd<'_>,
        old_path: &Path,
        new_dir: BorrowedFd<'_>,
        new_path: &Path,
    ) -> Result<()> {
        host::rename_at(old_dir, old_path, new_dir, new_path)?;
        Ok(())
    }

    fn open(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        _caller: &Caller,
        flags: i32,
        mode: u32,
    ) -> Result<MetaFile> {
        let file = host::open_at(dir, path, flags, mode)?;
        Ok(MetaFile { file, entry_offset: None })
    }

    fn utimens(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        host::utimens_at(dir, path, atime, mtime, false)?;
        Ok(())
    }

    fn futimens(&self, file: &MetaFile, atime: SetTime, mtime: SetTime) -> Result<()> {
        filetime::set_file_handle_times(&file.file, to_file_time(atime), to_file_time(mtime))?;
        Ok(())
    }

    fn symlink(&self, dir: BorrowedFd<'_>, target: &OsStr, path: &Path) -> Result<()> {
        host::symlink_at(target, dir, path)?;
        Ok(())
    }

    fn readlink(&self, dir: BorrowedFd<'_>, path: &Path) -> Result<OsString> {
        let target = host::readlink_at(dir, path)?;
        if target.as_bytes().is_empty() {
            return Err(Error::Io);
        }
        Ok(target)
    }

    fn mkfull(&self, dir: BorrowedFd<'_>, path: &Path, stat: &host::Stat) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                mkdir_p(dir, parent)?;
            }
        }
        let perm = stat.mode & 0o7777;
        match stat.mode & libc::S_IFMT {
            libc::S_IFDIR => host::mkdir_at(dir, path, perm)?,
            libc::S_IFLNK => return Err(Error::Unsupported),
            file_type => host::mknod_at(dir, path, file_type | perm, stat.rdev)?,
        }
        Ok(())
    }
}
