//! Directory creation.

use std::path::Path;

use crate::host;
use crate::error::Result;
use crate::vfs::Caller;

use super::UpFs;

impl UpFs {
    pub(crate) fn mk_dir_blocking(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()> {
        let resolved = self.resolve(path);

        self.impersonated(caller, || {
            self.backend().mkdir(self.perm_fd(), &resolved.perm, caller, mode & 0o7777)
        })?;

        match host::mkdir_at(self.store_fd(), &resolved.store, 0o700) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.roll_back_meta(&resolved.perm, true);
                Err(err.into())
            }
        }
    }
}
