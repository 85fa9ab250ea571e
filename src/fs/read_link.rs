//! Symlink target retrieval.

use std::ffi::OsString;
use std::io::Read;
use std::os::unix::ffi::OsStringExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::vfs::Caller;

use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn read_link_blocking(&self, caller: &Caller, path: &Path) -> Result<OsString> {
        let resolved = self.resolve(path);

        match self.mode() {
            MountMode::Split => self.impersonated(caller, || {
                self.backend().readlink(self.perm_fd(), &resolved.perm)
            }),
            MountMode::PermsInStore => {
                let meta = self.backend().stat(self.perm_fd(), &resolved.perm)?;
                if !meta.is_symlink() {
                    return Err(Error::InvalidArgument);
                }

                // The target bytes live in the store file of the same
                // name.
                let mut file =
                    host::open_at(self.store_fd(), &resolved.store, libc::O_RDONLY, 0)?;
                let mut target = Vec::new();
                file.by_ref()
                    .take(libc::PATH_MAX as u64 - 1)
                    .read_to_end(&mut target)?;
                if target.is_empty() {
                    // A symlink entry whose store file carries no target
                    // is corruption.
                    return Err(Error::Io);
                }
                Ok(OsString::from_vec(target))
            }
        }
    }
}
