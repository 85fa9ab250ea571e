//! On-disk layout of the sidecar permissions table.
//!
//! All integers are little-endian and the records are packed: the entry
//! codec below, not a struct dump, is the format. An unused entry
//! reinterprets its first eight bytes as `{tag, next_free}` and is
//! recognized by `tag == NO_ENTRY`.

use std::ffi::OsStr;
use std::io::{Cursor, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::vfs::TimeSpec;

pub const MAGIC: &[u8; 8] = b"UpFSPTbl";
pub const VERSION: u32 = 1;

/// Sidecar filename within each directory.
pub const META_FILE: &str = ".upfs";

/// Free-list terminator and unused-entry tag.
pub const NO_ENTRY: u32 = u32::MAX;

pub const NAME_LEN: usize = 256;
pub const HEADER_LEN: u64 = 16;
/// uid + gid + mode + reserved + two timestamps + name.
pub const ENTRY_LEN: u64 = 4 + 4 + 2 + 2 + 12 + 12 + NAME_LEN as u64;

/// Table header: magic, format version, free-list head index.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub free_list: u32,
}

impl Header {
    pub fn fresh() -> Header {
        Header { version: VERSION, free_list: NO_ENTRY }
    }

    /// Decode and validate a header block. A reader at version V accepts
    /// any stored version `<= V`.
    pub fn decode(buf: &[u8]) -> Result<Header> {
        let mut cur = Cursor::new(buf);
        let mut magic = [0u8; 8];
        cur.read_exact(&mut magic).map_err(|_| Error::Io)?;
        if &magic != MAGIC {
            return Err(Error::Io);
        }
        let version = cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?;
        if version > VERSION {
            return Err(Error::Io);
        }
        let free_list = cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?;
        Ok(Header { version, free_list })
    }

    pub fn encode(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_all(MAGIC).expect("header buffer");
        cur.write_u32::<LittleEndian>(self.version).expect("header buffer");
        cur.write_u32::<LittleEndian>(self.free_list).expect("header buffer");
        buf
    }
}

/// Timestamp as stored in an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Time {
    pub sec: u64,
    pub nsec: u32,
}

impl Time {
    pub fn now() -> Time {
        let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Time { sec: elapsed.as_secs(), nsec: elapsed.subsec_nanos() }
    }

    pub fn to_timespec(self) -> TimeSpec {
        TimeSpec { sec: self.sec as i64, nsec: self.nsec }
    }

    pub fn from_timespec(ts: TimeSpec) -> Time {
        Time { sec: ts.sec.max(0) as u64, nsec: ts.nsec }
    }
}

/// One child's metadata record.
#[derive(Copy, Clone)]
pub struct Entry {
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub reserved: u16,
    pub mtime: Time,
    pub ctime: Time,
    pub name: [u8; NAME_LEN],
}

impl Entry {
    /// Build a fresh used entry. The name is truncated to 255 bytes and
    /// NUL-padded.
    pub fn new(name: &OsStr, uid: u32, gid: u32, mode: u32) -> Entry {
        let mut stored = [0u8; NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(NAME_LEN - 1);
        stored[..len].copy_from_slice(&bytes[..len]);
        let now = Time::now();
        Entry {
            uid,
            gid,
            mode: mode as u16,
            reserved: 0,
            mtime: now,
            ctime: now,
            name: stored,
        }
    }

    /// Sentinel for a freed slot: tag plus next-free index, rest zero.
    pub fn free_sentinel(next_free: u32) -> Entry {
        Entry {
            uid: NO_ENTRY,
            gid: next_free,
            mode: 0,
            reserved: 0,
            mtime: Time::default(),
            ctime: Time::default(),
            name: [0u8; NAME_LEN],
        }
    }

    pub fn is_unused(&self) -> bool {
        self.uid == NO_ENTRY
    }

    /// Next free-list index; only meaningful on an unused entry, where
    /// the second word of the record holds it.
    pub fn next_free(&self) -> u32 {
        self.gid
    }

    /// Full mode word as a `u32`.
    pub fn mode32(&self) -> u32 {
        self.mode as u32
    }

    /// Stored name, trimmed at the first NUL. A name that fills all 256
    /// bytes comes back whole.
    pub fn name_bytes(&self) -> &[u8] {
        match self.name.iter().position(|&b| b == 0) {
            Some(pos) => &self.name[..pos],
            None => &self.name[..],
        }
    }

    /// Bounded name comparison, never a C-string compare.
    pub fn matches(&self, name: &OsStr) -> bool {
        !self.is_unused() && self.name_bytes() == name.as_bytes()
    }

    pub fn decode(buf: &[u8]) -> Result<Entry> {
        let mut cur = Cursor::new(buf);
        let uid = cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?;
        let gid = cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?;
        let mode = cur.read_u16::<LittleEndian>().map_err(|_| Error::Io)?;
        let reserved = cur.read_u16::<LittleEndian>().map_err(|_| Error::Io)?;
        let mtime = Time {
            sec: cur.read_u64::<LittleEndian>().map_err(|_| Error::Io)?,
            nsec: cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?,
        };
        let ctime = Time {
            sec: cur.read_u64::<LittleEndian>().map_err(|_| Error::Io)?,
            nsec: cur.read_u32::<LittleEndian>().map_err(|_| Error::Io)?,
        };
        let mut name = [0u8; NAME_LEN];
        cur.read_exact(&mut name).map_err(|_| Error::Io)?;
        Ok(Entry { uid, gid, mode, reserved, mtime, ctime, name })
    }

    pub fn encode(&self) -> [u8; ENTRY_LEN as usize] {
        let mut buf = [0u8; ENTRY_LEN as usize];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_u32::<LittleEndian>(self.uid).expect("entry buffer");
        cur.write_u32::<LittleEndian>(self.gid).expect("entry buffer");
        cur.write_u16::<LittleEndian>(self.mode).expect("entry buffer");
        cur.write_u16::<LittleEndian>(self.reserved).expect("entry buffer");
        cur.write_u64::<LittleEndian>(self.mtime.sec).expect("entry buffer");
        cur.write_u32::<LittleEndian>(self.mtime.nsec).expect("entry buffer");
        cur.write_u64::<LittleEndian>(self.ctime.sec).expect("entry buffer");
        cur.write_u32::<LittleEndian>(self.ctime.nsec).expect("entry buffer");
        cur.write_all(&self.name).expect("entry buffer");
        buf
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_unused() {
            f.debug_struct("Entry").field("unused", &true).field("next_free", &self.gid).finish()
        } else {
            f.debug_struct("Entry")
                .field("uid", &self.uid)
                .field("gid", &self.gid)
                .field("mode", &format_args!("{:o}", self.mode))
                .field("name", &String::from_utf8_lossy(self.name_bytes()))
                .finish()
        }
    }
}
