//! Symlink creation.
//!
//! Split mode stores a native symlink on the permissions side and a
//! placeholder file on the store. PS mode runs a two-phase create: a
//! regular entry, the target bytes as store content, then a full-mode
//! chmod that retypes the entry to a symlink.

use std::ffi::OsStr;
use std::io::Write;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::meta::split;
use crate::resolve::split_path;
use crate::vfs::Caller;

use super::{MountMode, UpFs};

/// Mode given to a PS symlink entry once the target is in place.
const PS_SYMLINK_MODE: u32 = libc::S_IFLNK | 0o644;

impl UpFs {
    pub(crate) fn symlink_blocking(
        &self,
        caller: &Caller,
        target: &OsStr,
        path: &Path,
    ) -> Result<()> {
        // On a case-merged store, `ln -s foo FOO` names the same file
        // twice; treat the pure case-rename as a no-op.
        if self.names().case_insensitive() {
            let (_, file) = split_path(path.as_os_str(), false);
            if file.eq_ignore_ascii_case(target) {
                return Ok(());
            }
        }

        let resolved = self.resolve(path);
        match self.mode() {
            MountMode::Split => self.symlink_split(caller, target, &resolved),
            MountMode::PermsInStore => self.symlink_ps(caller, target, &resolved),
        }
    }

    fn symlink_split(
        &self,
        caller: &Caller,
        target: &OsStr,
        resolved: &crate::resolve::Resolved,
    ) -> Result<()> {
        let made = self.impersonated(caller, || {
            self.backend().symlink(self.perm_fd(), target, &resolved.perm)
        });
        match made {
            Ok(()) => {}
            Err(Error::NotFound) => {
                // The permissions-side parents were never materialized;
                // build them and retry once.
                if let Some(parent) = resolved.perm.parent() {
                    split::mkdir_p(self.perm_fd(), parent)?;
                }
                self.impersonated(caller, || {
                    self.backend().symlink(self.perm_fd(), target, &resolved.perm)
                })?;
            }
            Err(err) => return Err(err),
        }

        // Store placeholder so the tree structures stay congruent.
        match host::open_at(
            self.store_fd(),
            &resolved.store,
            libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL,
            0o600,
        ) {
            Ok(_) => Ok(()),
            Err(err) if err.raw_os_error() == Some(libc::EEXIST) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn symlink_ps(
        &self,
        caller: &Caller,
        target: &OsStr,
        resolved: &crate::resolve::Resolved,
    ) -> Result<()> {
        // Phase one: a plain regular entry reserves the name.
        self.backend().mknod(
            self.perm_fd(),
            &resolved.perm,
            caller,
            libc::S_IFREG | 0o644,
            0,
        )?;

        // Phase two: the target bytes become the store content.
        let written = host::open_at(
            self.store_fd(),
            &resolved.store,
            libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL,
            0o600,
        )
        .map_err(Error::from)
        .and_then(|mut file| {
            file.write_all(target.as_bytes())?;
            Ok(())
        });
        if let Err(err) = written {
            self.roll_back_meta(&resolved.perm, false);
            return Err(err);
        }

        // Phase three: retype the entry. Only now does the guest see a
        // symlink.
        self.backend().chmod_harder(self.perm_fd(), &resolved.perm, PS_SYMLINK_MODE)
    }
}
