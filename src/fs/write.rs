//! Writes route to the store descriptor. Split mode stamps the
//! permissions-side mtime as it goes; PS mode defers the sidecar update
//! to release so a write burst costs one table lock, not many.

use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;

use crate::error::Result;
use crate::host;
use crate::vfs::{Handle, SetTime};

use super::{MountMode, UpFs};

impl UpFs {
    pub(crate) fn write_blocking(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<u32> {
        let open = self.handles().get(handle)?;

        if open.nonseekable {
            let mut written = 0;
            while written < data.len() {
                let n = host::write_fd(open.store.as_raw_fd(), &data[written..])?;
                if n == 0 {
                    break;
                }
                written += n;
            }
            open.mark_wrote();
            return Ok(written as u32);
        }

        open.store.write_all_at(data, offset)?;
        open.mark_wrote();

        if self.mode() == MountMode::Split {
            self.backend().futimens(&open.meta, SetTime::Omit, SetTime::Now)?;
            open.mark_mtime_current();
        }

        Ok(data.len() as u32)
    }
}
