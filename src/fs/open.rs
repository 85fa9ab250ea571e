//! Open and create: the permissions side is opened under the caller's
//! identity (that is where the access check happens), the store as the
//! mount owner. Store-only files get a permissions entry materialized
//! before the open proceeds.

use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::vfs::{Caller, Handle, OpenFlags, SUPPORTED_MODES};

use super::handle::OpenFile;
use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn open_blocking(
        &self,
        caller: &Caller,
        path: &Path,
        flags: OpenFlags,
    ) -> Result<Handle> {
        let resolved = self.resolve(path);
        // Creation went through `create`; never create here.
        let oflags = flags.0 & !(libc::O_CREAT | libc::O_EXCL);

        let meta_file = match self.impersonated(caller, || {
            self.backend().open(self.perm_fd(), &resolved.perm, caller, oflags, 0)
        }) {
            Ok(meta_file) => meta_file,
            Err(Error::NotFound) => {
                // Store-only file: materialize the permissions side,
                // then try again.
                let st = host::stat_at(self.store_fd(), &resolved.store, false)?;
                self.backend().mkfull(self.perm_fd(), &resolved.perm, &st)?;
                self.impersonated(caller, || {
                    self.backend().open(self.perm_fd(), &resolved.perm, caller, oflags, 0)
                })?
            }
            Err(err) => return Err(err),
        };

        if self.mode() == MountMode::Split {
            let st = host::fstat(meta_file.file.as_raw_fd())?;
            if !st.is_regular() && !st.is_dir() {
                // A device node simulated on the permissions side:
                // serve I/O straight off its descriptor.
                let dup = meta_file.file.try_clone()?;
                let mut open = OpenFile::new(meta_file, dup, flags);
                open.direct = true;
                open.nonseekable = true;
                return Ok(self.handles().insert(open));
            }
        }

        let store = host::open_at(self.store_fd(), &resolved.store, oflags, 0)?;
        Ok(self.handles().insert(OpenFile::new(meta_file, store, flags)))
    }

    pub(crate) fn create_blocking(
        &self,
        caller: &Caller,
        path: &Path,
        mode: u32,
        flags: OpenFlags,
    ) -> Result<Handle> {
        if mode & SUPPORTED_MODES != mode {
            return Err(Error::Unsupported);
        }
        let resolved = self.resolve(path);
        let create_flags = libc::O_RDWR | libc::O_CREAT | libc::O_EXCL;

        // The permissions side carries the caller's mode.
        let meta_file = self.impersonated(caller, || {
            self.backend().open(self.perm_fd(), &resolved.perm, caller, create_flags, mode)
        })?;

        // The store file is neutral.
        let store = match host::open_at(self.store_fd(), &resolved.store, create_flags, 0o600) {
            Ok(store) => store,
            Err(err) => {
                self.roll_back_meta(&resolved.perm, false);
                return Err(err.into());
            }
        };

        Ok(self.handles().insert(OpenFile::new(meta_file, store, flags)))
    }
}
