//! Open-file bookkeeping.
//!
//! The binding sees a bare `u64`; the engine keeps the real state in a
//! side table. Each open file owns exactly two host descriptors: the
//! store file that carries the bytes and the metadata descriptor that
//! carries everything else.

use std::collections::HashMap;
use std::fs::File;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::meta::MetaFile;
use crate::vfs::{Handle, OpenFlags};

/// State behind one guest file handle.
#[derive(Debug)]
pub struct OpenFile {
    pub meta: MetaFile,
    pub store: File,
    pub flags: OpenFlags,
    /// I/O is served straight off the metadata descriptor (a device
    /// node simulated on the permissions root).
    pub direct: bool,
    pub nonseekable: bool,
    /// A write landed on this handle.
    pub wrote: AtomicBool,
    /// Split mode: the per-write timestamp update already ran, release
    /// must not stamp a second one.
    pub mtime_current: AtomicBool,
}

impl OpenFile {
    pub fn new(meta: MetaFile, store: File, flags: OpenFlags) -> OpenFile {
        OpenFile {
            meta,
            store,
            flags,
            direct: false,
            nonseekable: false,
            wrote: AtomicBool::new(false),
            mtime_current: AtomicBool::new(false),
        }
    }

    pub fn mark_wrote(&self) {
        self.wrote.store(true, Ordering::Relaxed);
    }

    pub fn mark_mtime_current(&self) {
        self.mtime_current.store(true, Ordering::Relaxed);
    }
}

/// Table of live handles.
#[derive(Debug, Default)]
pub struct Handles {
    next: AtomicU64,
    map: Mutex<HashMap<u64, Arc<OpenFile>>>,
}

impl Handles {
    pub fn insert(&self, open: OpenFile) -> Handle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.map.lock().expect("handle table poisoned").insert(id, Arc::new(open));
        Handle(id)
    }

    /// Look a handle up; a token the table does not know is a stale
    /// descriptor from the binding's point of view.
    pub fn get(&self, handle: Handle) -> Result<Arc<OpenFile>> {
        self.map
            .lock()
            .expect("handle table poisoned")
            .get(&handle.0)
            .cloned()
            .ok_or(Error::Host(libc::EBADF))
    }

    /// Detach a handle for release; the descriptors close when the last
    /// in-flight operation drops its reference.
    pub fn remove(&self, handle: Handle) -> Result<Arc<OpenFile>> {
        self.map
            .lock()
            .expect("handle table poisoned")
            .remove(&handle.0)
            .ok_or(Error::Host(libc::EBADF))
    }
}
