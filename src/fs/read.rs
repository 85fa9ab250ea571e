//! Reads route to the store descriptor, positional unless the handle is
//! device-like.

use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;

use crate::error::Result;
use crate::host;
use crate::vfs::Handle;

use super::UpFs;

impl UpFs {
    pub(crate) fn read_blocking(&self, handle: Handle, offset: u64, count: u32) -> Result<Vec<u8>> {
        let open = self.handles().get(handle)?;
        let mut data = vec![0u8; count as usize];

        if open.nonseekable {
            let n = host::read_fd(open.store.as_raw_fd(), &mut data)?;
            data.truncate(n);
            return Ok(data);
        }

        let mut filled = 0;
        while filled < data.len() {
            let n = open.store.read_at(&mut data[filled..], offset + filled as u64)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        data.truncate(filled);
        Ok(data)
    }
}
