//! Filesystem statistics delegate to the store.

use std::os::fd::AsRawFd;
use std::path::Path;

use crate::error::Result;
use crate::host;
use crate::vfs::{Caller, FsStat};

use super::UpFs;

impl UpFs {
    pub(crate) fn statfs_blocking(&self, _caller: &Caller, path: &Path) -> Result<FsStat> {
        let resolved = self.resolve(path);
        let file = host::open_at(self.store_fd(), &resolved.store, libc::O_RDONLY, 0)?;
        Ok(host::fstatvfs(file.as_raw_fd())?)
    }
}
