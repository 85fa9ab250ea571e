//! Directory listing: iterate the store, hide the sidecar, undo the
//! name mangling, and stat each entry through the merged path.

use std::ffi::OsStr;
use std::os::fd::AsFd;
use std::path::Path;

use crate::error::Result;
use crate::host;
use crate::table::META_FILE;
use crate::vfs::{Caller, DirEntry};

use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn read_dir_blocking(&self, caller: &Caller, path: &Path) -> Result<Vec<DirEntry>> {
        let resolved = self.resolve(path);
        let dir = host::open_dir_at(self.store_fd(), &resolved.store)?;
        let mut names = host::dir_entries(dir.as_fd())?;
        drop(dir);
        names.sort();

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            if self.mode() == MountMode::PermsInStore && name == OsStr::new(META_FILE) {
                continue;
            }
            let presented = self.names().present(&name);
            let child = path.join(&presented);
            match self.get_attr_blocking(caller, &child) {
                Ok(attr) => entries.push(DirEntry { name: presented, attr }),
                Err(err) => {
                    // The entry raced away between listing and stat.
                    tracing::debug!(
                        name = %presented.to_string_lossy(),
                        error = %err,
                        "skipping unlistable directory entry"
                    );
                }
            }
        }
        Ok(entries)
    }
}
