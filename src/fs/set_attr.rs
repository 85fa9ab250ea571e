//! Metadata mutation: chmod, chown, utimens, truncate, and their
//! descriptor-based variants.
//!
//! Each path-based mutation shares the materialize-then-retry shape: a
//! missing permissions entry over an existing store file is created on
//! demand (as the mount owner, mirroring the store's native stat) and
//! the operation retried once.

use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::resolve::Resolved;
use crate::vfs::{Caller, FileAttr, Handle, SetTime};

use super::get_attr::{attr_from_meta, merge_attr};
use super::{MountMode, UpFs};

impl UpFs {
    /// Run `op` impersonated; on `NotFound`, confirm the store side
    /// exists, materialize the permissions side, and retry once.
    fn with_materialize<T>(
        &self,
        caller: &Caller,
        resolved: &Resolved,
        op: impl Fn() -> Result<T>,
    ) -> Result<T> {
        match self.impersonated(caller, &op) {
            Err(Error::NotFound) => {
                let st = host::stat_at(self.store_fd(), &resolved.store, false)?;
                self.backend().mkfull(self.perm_fd(), &resolved.perm, &st)?;
                self.impersonated(caller, &op)
            }
            other => other,
        }
    }

    pub(crate) fn ch_mod_blocking(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()> {
        let resolved = self.resolve(path);
        self.with_materialize(caller, &resolved, || {
            self.backend().chmod(self.perm_fd(), &resolved.perm, mode & 0o7777)
        })
    }

    pub(crate) fn ch_own_blocking(
        &self,
        caller: &Caller,
        path: &Path,
        uid: u32,
        gid: u32,
    ) -> Result<()> {
        let resolved = self.resolve(path);
        self.with_materialize(caller, &resolved, || {
            self.backend().chown(self.perm_fd(), &resolved.perm, uid, gid)
        })
    }

    pub(crate) fn utimens_blocking(
        &self,
        caller: &Caller,
        path: &Path,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        let resolved = self.resolve(path);
        self.with_materialize(caller, &resolved, || {
            self.backend().utimens(self.perm_fd(), &resolved.perm, atime, mtime)
        })
    }

    pub(crate) fn truncate_blocking(&self, caller: &Caller, path: &Path, size: u64) -> Result<()> {
        let resolved = self.resolve(path);

        // The permissions side is the access check; open it for writing
        // under the caller's identity before touching any data.
        let meta_file = self.with_materialize(caller, &resolved, || {
            self.backend()
                .open(self.perm_fd(), &resolved.perm, caller, libc::O_WRONLY, 0)
        })?;

        let store = host::open_at(self.store_fd(), &resolved.store, libc::O_WRONLY, 0)?;
        store.set_len(size)?;

        self.backend().futimens(&meta_file, SetTime::Omit, SetTime::Now)
    }

    pub(crate) fn ftruncate_blocking(&self, handle: Handle, size: u64) -> Result<()> {
        let open = self.handles().get(handle)?;
        open.store.set_len(size)?;
        match self.mode() {
            MountMode::Split => {
                self.backend().futimens(&open.meta, SetTime::Omit, SetTime::Now)?;
                open.mark_mtime_current();
            }
            MountMode::PermsInStore => open.mark_wrote(),
        }
        Ok(())
    }

    pub(crate) fn fget_attr_blocking(&self, handle: Handle) -> Result<FileAttr> {
        let open = self.handles().get(handle)?;
        let meta = self.backend().fstat(&open.meta)?;
        if open.direct {
            return Ok(attr_from_meta(&meta));
        }
        let store = host::fstat(open.store.as_raw_fd())?;
        Ok(merge_attr(&meta, &store))
    }

    pub(crate) fn futimens_blocking(
        &self,
        handle: Handle,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        let open = self.handles().get(handle)?;
        self.backend().futimens(&open.meta, atime, mtime)?;
        open.mark_mtime_current();
        Ok(())
    }
}
