//! Node creation: permissions entry first, store counterpart second.

use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::vfs::{Caller, SUPPORTED_MODES};

use super::UpFs;

impl UpFs {
    pub(crate) fn mk_node_blocking(
        &self,
        caller: &Caller,
        path: &Path,
        mode: u32,
        dev: u64,
    ) -> Result<()> {
        if mode & SUPPORTED_MODES != mode {
            return Err(Error::Unsupported);
        }
        let mode = if mode & libc::S_IFMT == 0 { mode | libc::S_IFREG } else { mode };
        let resolved = self.resolve(path);

        self.impersonated(caller, || {
            self.backend().mknod(self.perm_fd(), &resolved.perm, caller, mode, dev)
        })?;

        // A permissions entry must not dangle over nonexistent data.
        let store = host::open_at(
            self.store_fd(),
            &resolved.store,
            libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL,
            0o600,
        );
        match store {
            Ok(_) => Ok(()),
            Err(err) => {
                self.roll_back_meta(&resolved.perm, false);
                Err(err.into())
            }
        }
    }

    /// Undo a freshly created permissions entry after the store side
    /// failed. Runs as the mount owner; a failure here only leaves a
    /// detectable orphan for the next call to clean up.
    pub(crate) fn roll_back_meta(&self, perm_path: &Path, is_dir: bool) {
        if let Err(err) = self.backend().unlink(self.perm_fd(), perm_path, is_dir) {
            tracing::warn!(
                path = %perm_path.display(),
                error = %err,
                "could not roll back permissions entry"
            );
        }
    }
}
