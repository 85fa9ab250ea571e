//! Unlink: store first, then the permissions entry, so a metadata
//! record never outlives its visibility while the data still exists.

use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::vfs::Caller;

use super::UpFs;

impl UpFs {
    pub(crate) fn remove_blocking(&self, caller: &Caller, path: &Path) -> Result<()> {
        let resolved = self.resolve(path);

        let meta = self.impersonated(caller, || {
            self.backend().stat(self.perm_fd(), &resolved.perm)
        });
        let meta = match meta {
            Ok(meta) => {
                if meta.is_dir() {
                    return Err(Error::IsADirectory);
                }
                Some(meta)
            }
            Err(Error::NotFound) => None,
            Err(err) => return Err(err),
        };

        let store_gone = match host::unlink_at(self.store_fd(), &resolved.store, false) {
            Ok(()) => true,
            Err(err) if err.raw_os_error() == Some(libc::ENOENT) => false,
            Err(err) => return Err(err.into()),
        };

        let meta_gone = match meta {
            Some(_) => {
                match self.impersonated(caller, || {
                    self.backend().unlink(self.perm_fd(), &resolved.perm, false)
                }) {
                    Ok(()) => true,
                    Err(Error::NotFound) => false,
                    Err(err) => return Err(err),
                }
            }
            None => false,
        };

        if store_gone || meta_gone {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }
}
