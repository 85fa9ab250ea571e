//! Flush, fsync, release, and advisory locks on open handles.

use std::os::fd::AsRawFd;
use std::sync::atomic::Ordering;

use crate::error::Result;
use crate::host;
use crate::vfs::{Handle, RecordLock, RecordLockCmd, SetTime};

use super::{MountMode, UpFs};

impl UpFs {
    /// Probe writability by duplicating the store descriptor and
    /// closing the duplicate; errors the host held back surface here
    /// without closing the real handle.
    pub(crate) fn flush_blocking(&self, handle: Handle) -> Result<()> {
        let open = self.handles().get(handle)?;
        let dup = open.store.try_clone()?;
        drop(dup);
        Ok(())
    }

    pub(crate) fn fsync_blocking(&self, handle: Handle, datasync: bool) -> Result<()> {
        let open = self.handles().get(handle)?;
        if datasync {
            open.store.sync_data()?;
        } else {
            open.store.sync_all()?;
        }
        Ok(())
    }

    pub(crate) fn release_blocking(&self, handle: Handle) -> Result<()> {
        let open = self.handles().remove(handle)?;

        let wrote = open.wrote.load(Ordering::Relaxed);
        let stamped = open.mtime_current.load(Ordering::Relaxed);
        let update = match self.mode() {
            // Writes stamp as they go; cover the write-intent open that
            // never wrote (truncate-on-open and friends).
            MountMode::Split => open.flags.wants_write() && !stamped,
            // The deferred PS update: once per written handle.
            MountMode::PermsInStore => wrote,
        };
        if update {
            if let Err(err) = self.backend().futimens(&open.meta, SetTime::Omit, SetTime::Now) {
                tracing::warn!(error = %err, "mtime update on release failed");
            }
        }

        // Both descriptors close when `open` drops here (or when the
        // last concurrent operation lets go of it).
        Ok(())
    }

    pub(crate) fn lock_blocking(
        &self,
        handle: Handle,
        cmd: RecordLockCmd,
        mut lock: RecordLock,
    ) -> Result<RecordLock> {
        let open = self.handles().get(handle)?;
        host::record_lock(open.store.as_raw_fd(), cmd, &mut lock)?;
        Ok(lock)
    }
}
