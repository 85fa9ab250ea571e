//! Access checks.
//!
//! In Split mode the permissions side answers, impersonated; the store
//! is then probed for plain reachability, execute excluded (store modes
//! are meaningless there). In PS mode the engine's own metadata is the
//! authority and callers mount with kernel-side permission checking, so
//! only the reachability probe remains.

use std::path::Path;

use crate::error::Result;
use crate::host;
use crate::vfs::Caller;

use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn access_blocking(&self, caller: &Caller, path: &Path, mask: u32) -> Result<()> {
        let resolved = self.resolve(path);

        if self.mode() == MountMode::Split {
            self.impersonated(caller, || {
                host::access_at(self.perm_fd(), &resolved.perm, mask).map_err(Into::into)
            })?;
        }

        let store_mask = mask & !(libc::X_OK as u32);
        host::access_at(self.store_fd(), &resolved.store, store_mask)?;
        Ok(())
    }
}
