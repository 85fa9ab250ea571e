//! Directory removal. PS mode first retires the directory's own
//! sidecar, which only succeeds once every entry in it is gone.

use std::os::fd::AsFd;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::table;
use crate::vfs::Caller;

use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn rm_dir_blocking(&self, caller: &Caller, path: &Path) -> Result<()> {
        let resolved = self.resolve(path);

        if self.mode() == MountMode::PermsInStore {
            match host::open_dir_at(self.store_fd(), &resolved.store) {
                Ok(dir) => table::unlink_if_empty(dir.as_fd())?,
                Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let store_gone = match host::unlink_at(self.store_fd(), &resolved.store, true) {
            Ok(()) => true,
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => false,
            Err(err) => return Err(err.into()),
        };

        let meta_gone = match self.impersonated(caller, || {
            self.backend().unlink(self.perm_fd(), &resolved.perm, true)
        }) {
            Ok(()) => true,
            Err(Error::NotFound) => false,
            Err(err) => return Err(err),
        };

        if store_gone || meta_gone {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}
