//! PS-mode metadata backend.
//!
//! Every operation funnels through [`PsBackend::ps_open`], the single
//! choke point that resolves a path to its sidecar entry: it splits the
//! path, opens the directory and its table, locks shared or exclusive,
//! scans for the name, and creates the entry when asked to. Creation
//! under a shared lock re-opens with the exclusive lock instead of
//! upgrading in place.
//!
//! Symlink targets are not a sidecar concern: the adapter stores them as
//! store-file content, so `symlink`/`readlink` here are unsupported.

use std::ffi::{OsStr, OsString};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::resolve::split_path;
use crate::table::{self, Entry, LockMode, Table, ENTRY_LEN, META_FILE};
use crate::vfs::{Caller, SetTime, SUPPORTED_MODES};

use super::{Meta, MetaBackend, MetaFile};

/// What a [`PsBackend::ps_open`] call intends to do with the entry.
#[derive(Debug, Copy, Clone, Default)]
struct Request {
    /// Create the entry (and the sidecar) when missing.
    create: bool,
    /// With `create`: fail on an existing entry.
    excl: bool,
    /// Take the exclusive lock; the entry will be mutated.
    exclusive: bool,
}

/// A resolved sidecar entry, its byte offset, and the locked table it
/// came from.
struct PsOpen {
    entry: Entry,
    offset: u64,
    table: Table,
}

#[derive(Debug)]
pub struct PsBackend {
    /// Fold the final path component to lower case; the store is
    /// assumed case-insensitive.
    decap: bool,
}

impl PsBackend {
    pub fn new(decap: bool) -> Self {
        PsBackend { decap }
    }

    /// The choke point. `owner` supplies the uid/gid recorded when a
    /// new entry is created.
    fn ps_open(
        &self,
        root: BorrowedFd<'_>,
        path: &Path,
        req: Request,
        mode: u32,
        owner: (u32, u32),
    ) -> Result<PsOpen> {
        if mode & SUPPORTED_MODES != mode {
            return Err(Error::Unsupported);
        }

        let (dir, file) = split_path(path.as_os_str(), self.decap);
        if file == *META_FILE {
            // The sidecar itself is never addressable.
            return Err(Error::NotPermitted);
        }

        let dir_fd = host::open_dir_at(root, &dir)?;
        let lock = if req.exclusive { LockMode::Exclusive } else { LockMode::Shared };
        let table = Table::open(dir_fd.as_fd(), req.create, lock)?;

        if let Some((entry, offset)) = table.lookup(&file)? {
            if req.create && req.excl {
                return Err(Error::AlreadyExists);
            }
            return Ok(PsOpen { entry, offset, table });
        }

        if req.create {
            if !req.exclusive {
                // Creation needs the exclusive lock; re-open rather than
                // upgrade while holding shared.
                drop(table);
                drop(dir_fd);
                return self.ps_open(root, path, Request { exclusive: true, ..req }, mode, owner);
            }
            let entry = Entry::new(&file, owner.0, owner.1, mode);
            let offset = table.allocate(&entry)?;
            return Ok(PsOpen { entry, offset, table });
        }

        Err(Error::NotFound)
    }

    /// Shared chmod body; `full_mode` overwrites the type bits too.
    fn chmod_prime(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32, full_mode: bool) -> Result<()> {
        let mut open =
            self.ps_open(dir, path, Request { exclusive: true, ..Request::default() }, 0, (0, 0))?;
        open.entry.mode = if full_mode {
            mode as u16
        } else {
            (open.entry.mode & libc::S_IFMT as u16) | (mode & 0o7777) as u16
        };
        open.entry.ctime = table::Time::now();
        open.table.write_entry(open.offset, &open.entry)
    }
}

fn meta_from_entry(entry: &Entry) -> Meta {
    Meta {
        mode: entry.mode32(),
        nlink: 1,
        uid: entry.uid,
        gid: entry.gid,
        size: 0,
        rdev: 0,
        ino: 0,
        atime: entry.mtime.to_timespec(),
        mtime: entry.mtime.to_timespec(),
        ctime: entry.ctime.to_timespec(),
    }
}

fn apply_set_time(stored: table::Time, requested: SetTime) -> table::Time {
    match requested {
        SetTime::Omit => stored,
        SetTime::Now => table::Time::now(),
        SetTime::Set(ts) => table::Time::from_timespec(ts),
    }
}

impl MetaBackend for PsBackend {
    fn stat(&self, dir: BorrowedFd<'_>, path: &Path) -> Result<Meta> {
        let open = self.ps_open(dir, path, Request::default(), 0, (0, 0))?;
        Ok(meta_from_entry(&open.entry))
    }

    /// Stat through the open sidecar descriptor, subject to the same
    /// free/realloc hazard as [`MetaBackend::futimens`].
    fn fstat(&self, file: &MetaFile) -> Result<Meta> {
        let Some(offset) = file.entry_offset else {
            // Directory opens bypass the table.
            let st = host::fstat(file.file.as_raw_fd())?;
            return Ok(Meta::from_stat(&st));
        };
        let fd = file.file.as_raw_fd();
        host::flock(fd, host::Flock::Shared)?;
        let result = (|| {
            let mut buf = [0u8; ENTRY_LEN as usize];
            file.file.read_exact_at(&mut buf, offset).map_err(|_| Error::Io)?;
            let entry = Entry::decode(&buf)?;
            if entry.is_unused() {
                return Err(Error::Io);
            }
            Ok(meta_from_entry(&entry))
        })();
        let _ = host::flock(fd, host::Flock::Unlock);
        result
    }

    fn mknod(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        caller: &Caller,
        mode: u32,
        _dev: u64,
    ) -> Result<()> {
        if mode & SUPPORTED_MODES != mode {
            return Err(Error::Unsupported);
        }
        let mode = if mode & libc::S_IFMT == 0 { mode | libc::S_IFREG } else { mode };
        self.ps_open(
            dir,
            path,
            Request { create: true, excl: true, exclusive: false },
            mode,
            (caller.uid, caller.gid),
        )?;
        Ok(())
    }

    fn mkdir(&self, dir: BorrowedFd<'_>, path: &Path, caller: &Caller, mode: u32) -> Result<()> {
        self.ps_open(
            dir,
            path,
            Request { create: true, excl: true, exclusive: false },
            libc::S_IFDIR | (mode & 0o7777),
            (caller.uid, caller.gid),
        )?;
        Ok(())
    }

    fn unlink(&self, dir: BorrowedFd<'_>, path: &Path, remove_dir: bool) -> Result<()> {
        let open =
            self.ps_open(dir, path, Request { exclusive: true, ..Request::default() }, 0, (0, 0))?;
        let is_dir = open.entry.mode32() & libc::S_IFMT == libc::S_IFDIR;
        if is_dir != remove_dir {
            return Err(Error::NotPermitted);
        }
        open.table.free(open.offset)
    }

    fn chmod(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()> {
        self.chmod_prime(dir, path, mode, false)
    }

    fn chmod_harder(&self, dir: BorrowedFd<'_>, path: &Path, mode: u32) -> Result<()> {
        self.chmod_prime(dir, path, mode, true)
    }

    fn chown(&self, dir: BorrowedFd<'_>, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let mut open =
            self.ps_open(dir, path, Request { exclusive: true, ..Request::default() }, 0, (0, 0))?;
        open.entry.uid = uid;
        open.entry.gid = gid;
        open.entry.ctime = table::Time::now();
        open.table.write_entry(open.offset, &open.entry)
    }

    fn rename(
        &self,
        old_dir: BorrowedFd<'_>,
        old_path: &Path,
        new_dir: BorrowedFd<'_>,
        new_path: &Path,
    ) -> Result<()> {
        let (old_sub, old_file) = split_path(old_path.as_os_str(), self.decap);
        let (new_sub, new_file) = split_path(new_path.as_os_str(), self.decap);
        if old_file == *META_FILE || new_file == *META_FILE {
            return Err(Error::NotPermitted);
        }

        let old_sub_fd = host::open_dir_at(old_dir, &old_sub)?;
        let new_sub_fd = host::open_dir_at(new_dir, &new_sub)?;
        let old_st = host::fstat(old_sub_fd.as_raw_fd())?;
        let new_st = host::fstat(new_sub_fd.as_raw_fd())?;

        if old_st.dev == new_st.dev && old_st.ino == new_st.ino {
            return same_dir_rename(new_sub_fd.as_fd(), &old_file, &new_file);
        }
        cross_dir_rename(old_sub_fd.as_fd(), &old_file, new_sub_fd.as_fd(), &new_file)
    }

    fn open(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        caller: &Caller,
        flags: i32,
        mode: u32,
    ) -> Result<MetaFile> {
        if flags & libc::O_DIRECTORY != 0 {
            // Directories are opened directly, not through their entry.
            let file = host::open_at(dir, path, flags, mode)?;
            return Ok(MetaFile { file, entry_offset: None });
        }

        let req = Request {
            create: flags & libc::O_CREAT != 0,
            excl: flags & libc::O_EXCL != 0,
            exclusive: false,
        };
        let open = self.ps_open(
            dir,
            path,
            req,
            libc::S_IFREG | (mode & 0o777),
            (caller.uid, caller.gid),
        )?;

        // The descriptor outlives this operation; it must not leave
        // locked.
        let offset = open.offset;
        let file = open.table.into_file()?;
        Ok(MetaFile { file, entry_offset: Some(offset) })
    }

    fn utimens(
        &self,
        dir: BorrowedFd<'_>,
        path: &Path,
        _atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        let mut open =
            self.ps_open(dir, path, Request { exclusive: true, ..Request::default() }, 0, (0, 0))?;
        open.entry.mtime = apply_set_time(open.entry.mtime, mtime);
        open.entry.ctime = table::Time::now();
        open.table.write_entry(open.offset, &open.entry)
    }

    /// Update the mtime of the entry this descriptor was opened at.
    ///
    /// The offset is revalidated only as far as "still a used entry": a
    /// free/realloc race between two callers can land the update on an
    /// unrelated entry. Holding the table lock for the life of an open
    /// file would be worse; the behavior is accepted and documented.
    fn futimens(&self, file: &MetaFile, _atime: SetTime, mtime: SetTime) -> Result<()> {
        let offset = file.entry_offset.ok_or(Error::Io)?;
        let fd = file.file.as_raw_fd();
        host::flock(fd, host::Flock::Exclusive)?;
        let result = (|| {
            let mut buf = [0u8; ENTRY_LEN as usize];
            file.file.read_exact_at(&mut buf, offset).map_err(|_| Error::Io)?;
            let mut entry = Entry::decode(&buf)?;
            if entry.is_unused() {
                return Err(Error::Io);
            }
            entry.mtime = apply_set_time(entry.mtime, mtime);
            file.file.write_all_at(&entry.encode(), offset)?;
            Ok(())
        })();
        let _ = host::flock(fd, host::Flock::Unlock);
        result
    }

    fn symlink(&self, _dir: BorrowedFd<'_>, _target: &OsStr, _path: &Path) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn readlink(&self, _dir: BorrowedFd<'_>, _path: &Path) -> Result<OsString> {
        Err(Error::Unsupported)
    }

    fn mkfull(&self, dir: BorrowedFd<'_>, path: &Path, stat: &host::Stat) -> Result<()> {
        let file_type = stat.mode & libc::S_IFMT;
        if !matches!(file_type, libc::S_IFREG | libc::S_IFDIR | libc::S_IFLNK) {
            return Err(Error::Unsupported);
        }
        self.ps_open(
            dir,
            path,
            Request { create: true, excl: false, exclusive: false },
            stat.mode & SUPPORTED_MODES,
            (stat.uid, stat.gid),
        )?;
        Ok(())
    }
}

/// Rename within a single sidecar: both records resolved under one
/// exclusive lock, target overwritten with the source's metadata, source
/// freed. One attempt only; a failed sanity re-read means a concurrent
/// operation got there first.
fn same_dir_rename(dir: BorrowedFd<'_>, old_file: &OsStr, new_file: &OsStr) -> Result<()> {
    let tbl = Table::open(dir, true, LockMode::Exclusive)?;

    let (src, src_off) = tbl.lookup(old_file)?.ok_or(Error::NotFound)?;
    let (mut tgt, tgt_off) = match tbl.lookup(new_file)? {
        Some(found) => found,
        None => {
            let fresh = Entry::new(new_file, src.uid, src.gid, src.mode32());
            let off = tbl.allocate(&fresh)?;
            (fresh, off)
        }
    };

    // Metadata already in the right spot.
    if src_off == tgt_off {
        return Ok(());
    }

    // Sanity: the source must still be what we resolved.
    let check = tbl.read_entry(src_off)?;
    if check.is_unused() || !check.matches(old_file) {
        return Err(Error::NotFound);
    }

    tgt.uid = src.uid;
    tgt.gid = src.gid;
    tgt.mode = src.mode;
    tgt.reserved = 0;
    tgt.mtime = src.mtime;
    tgt.ctime = src.ctime;
    tbl.write_entry(tgt_off, &tgt)?;
    tbl.free(src_off)
}

/// Rename across two sidecars without ever nesting their locks: read
/// the source under its lock, install the target under its lock, then
/// come back and free the source if it still matches. A mismatch on the
/// way back means a concurrent operation won; the target is already
/// correct, so it is logged and tolerated.
fn cross_dir_rename(
    old_dir: BorrowedFd<'_>,
    old_file: &OsStr,
    new_dir: BorrowedFd<'_>,
    new_file: &OsStr,
) -> Result<()> {
    let (src, src_off) = {
        let tbl = Table::open(old_dir, false, LockMode::Shared)?;
        tbl.lookup(old_file)?.ok_or(Error::NotFound)?
    };
    let src_is_dir = src.mode32() & libc::S_IFMT == libc::S_IFDIR;

    {
        let tbl = Table::open(new_dir, true, LockMode::Exclusive)?;
        let (mut tgt, tgt_off) = match tbl.lookup(new_file)? {
            Some((existing, off)) => {
                let tgt_is_dir = existing.mode32() & libc::S_IFMT == libc::S_IFDIR;
                if src_is_dir && !tgt_is_dir {
                    return Err(Error::NotADirectory);
                }
                if !src_is_dir && tgt_is_dir {
                    return Err(Error::IsADirectory);
                }
                (existing, off)
            }
            None => {
                let fresh = Entry::new(new_file, src.uid, src.gid, src.mode32());
                let off = tbl.allocate(&fresh)?;
                (fresh, off)
            }
        };
        tgt.uid = src.uid;
        tgt.gid = src.gid;
        tgt.mode = src.mode;
        tgt.reserved = 0;
        tgt.mtime = src.mtime;
        tgt.ctime = src.ctime;
        tbl.write_entry(tgt_off, &tgt)?;
    }

    let tbl = Table::open(old_dir, false, LockMode::Exclusive)?;
    match tbl.lookup(old_file)? {
        Some((_, off)) if off == src_off => tbl.free(off),
        _ => {
            tracing::warn!(
                file = %old_file.to_string_lossy(),
                "source entry changed during cross-directory rename; leaving it"
            );
            Ok(())
        }
    }
}
