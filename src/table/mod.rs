//! Per-directory sidecar permissions table.
//!
//! A [`Table`] owns the sidecar descriptor together with its advisory
//! whole-file lock: shared for read-only passes, exclusive for any
//! mutation. The lock is released when the handle drops, or explicitly
//! by [`Table::into_file`] when the descriptor outlives the operation
//! (open files keep the sidecar fd for later timestamp updates).

pub mod entry;


use std::ffi::OsStr;
use std::fs::File;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;

pub use entry::{Entry, Header, Time, ENTRY_LEN, HEADER_LEN, META_FILE, NAME_LEN, NO_ENTRY};

/// Lock strength to open the table with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// An open, locked sidecar table.
#[derive(Debug)]
pub struct Table {
    file: File,
}

impl Table {
    /// Open (and with `create`, lazily initialize) the sidecar in `dir`.
    ///
    /// Rejects files whose magic or version do not check out. An empty
    /// file is only acceptable when `create` is set; it receives a fresh
    /// header with an empty free-list.
    pub fn open(dir: BorrowedFd<'_>, create: bool, lock: LockMode) -> Result<Table> {
        let flags = if create {
            libc::O_RDWR | libc::O_CREAT
        } else {
            libc::O_RDWR
        };
        let file = host::open_at(dir, Path::new(META_FILE), flags, 0o600)?;
        let op = match lock {
            LockMode::Shared => host::Flock::Shared,
            LockMode::Exclusive => host::Flock::Exclusive,
        };
        host::flock(file.as_raw_fd(), op)?;

        let table = Table { file };
        table.check_header(create)?;
        Ok(table)
    }

    fn check_header(&self, create: bool) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN as usize];
        let read = self.file.read_at(&mut buf, 0)?;
        if read == 0 && create {
            self.write_header(&Header::fresh())?;
            return Ok(());
        }
        if read != HEADER_LEN as usize {
            return Err(Error::Io);
        }
        Header::decode(&buf).map(|_| ())
    }

    pub fn header(&self) -> Result<Header> {
        let mut buf = [0u8; HEADER_LEN as usize];
        self.file.read_exact_at(&mut buf, 0).map_err(|_| Error::Io)?;
        Header::decode(&buf)
    }

    fn write_header(&self, header: &Header) -> Result<()> {
        self.file.write_all_at(&header.encode(), 0)?;
        Ok(())
    }

    pub fn read_entry(&self, offset: u64) -> Result<Entry> {
        let mut buf = [0u8; ENTRY_LEN as usize];
        self.file.read_exact_at(&mut buf, offset).map_err(|_| Error::Io)?;
        Entry::decode(&buf)
    }

    pub fn write_entry(&self, offset: u64, entry: &Entry) -> Result<()> {
        self.file.write_all_at(&entry.encode(), offset)?;
        Ok(())
    }

    /// Find the used entry whose stored name equals `name`.
    pub fn lookup(&self, name: &OsStr) -> Result<Option<(Entry, u64)>> {
        for item in self.entries() {
            let (entry, offset) = item?;
            if entry.matches(name) {
                return Ok(Some((entry, offset)));
            }
        }
        Ok(None)
    }

    /// Claim a slot for `entry`: pop the free-list head, or append when
    /// the list is empty. Returns the entry's byte offset.
    pub fn allocate(&self, entry: &Entry) -> Result<u64> {
        let mut header = self.header()?;

        if header.free_list == NO_ENTRY {
            let end = self.file.metadata()?.len();
            if (end - HEADER_LEN) % ENTRY_LEN != 0 {
                // Table is corrupted.
                return Err(Error::Io);
            }
            let index = (end - HEADER_LEN) / ENTRY_LEN;
            if index >= NO_ENTRY as u64 {
                return Err(Error::NoSpace);
            }
            self.write_entry(end, entry)?;
            return Ok(end);
        }

        let offset = HEADER_LEN + header.free_list as u64 * ENTRY_LEN;
        let old = self.read_entry(offset)?;
        if !old.is_unused() {
            // Free-list points at a used entry.
            return Err(Error::Io);
        }
        header.free_list = old.next_free();
        self.write_header(&header)?;
        self.write_entry(offset, entry)?;
        Ok(offset)
    }

    /// Return the entry at `offset` to the free-list.
    pub fn free(&self, offset: u64) -> Result<()> {
        let mut header = self.header()?;
        self.write_entry(offset, &Entry::free_sentinel(header.free_list))?;
        header.free_list = ((offset - HEADER_LEN) / ENTRY_LEN) as u32;
        self.write_header(&header)
    }

    /// Iterate every slot in file order, used and unused alike.
    pub fn entries(&self) -> Entries<'_> {
        Entries { table: self, offset: HEADER_LEN }
    }

    /// True when no used entry remains.
    pub fn is_empty(&self) -> Result<bool> {
        for item in self.entries() {
            let (entry, _) = item?;
            if !entry.is_unused() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Release the advisory lock and hand the raw descriptor out, for
    /// callers that keep it beyond this operation.
    pub fn into_file(self) -> Result<File> {
        host::flock(self.file.as_raw_fd(), host::Flock::Unlock)?;
        Ok(self.file)
    }
}

/// Iterator over table slots. Stops at the first short read, so a
/// trailing partial record terminates iteration the way the original
/// table scan does.
pub struct Entries<'a> {
    table: &'a Table,
    offset: u64,
}

impl Iterator for Entries<'_> {
    type Item = Result<(Entry, u64)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = [0u8; ENTRY_LEN as usize];
        match self.table.file.read_at(&mut buf, self.offset) {
            Ok(n) if n == ENTRY_LEN as usize => {
                let offset = self.offset;
                self.offset += ENTRY_LEN;
                Some(Entry::decode(&buf).map(|entry| (entry, offset)))
            }
            Ok(_) => None,
            Err(err) => Some(Err(err.into())),
        }
    }
}

/// Remove the sidecar in `dir` when it holds no used entry.
///
/// Missing sidecars are fine; a populated one is left alone.
pub fn unlink_if_empty(dir: BorrowedFd<'_>) -> Result<()> {
    let table = match Table::open(dir, false, LockMode::Exclusive) {
        Ok(table) => table,
        Err(Error::NotFound) => return Ok(()),
        Err(err) => return Err(err),
    };
    if table.is_empty()? {
        host::unlink_at(dir, Path::new(META_FILE), false)?;
    }
    Ok(())
}
