//! Merged stat: metadata from the permissions side, sizes from the
//! store, with a fallback to the store's native values for files the
//! permissions side has never seen.

use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::meta::Meta;
use crate::vfs::{Caller, FileAttr, FileType, SUPPORTED_MODES};

use super::UpFs;

/// Attributes straight from a metadata record, nothing to overlay.
pub(crate) fn attr_from_meta(meta: &Meta) -> FileAttr {
    FileAttr {
        file_type: FileType::from_mode(meta.mode),
        mode: meta.mode,
        nlink: meta.nlink,
        uid: meta.uid,
        gid: meta.gid,
        size: meta.size,
        used: 0,
        rdev: meta.rdev,
        ino: meta.ino,
        atime: meta.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
    }
}

/// Permissions from the metadata record, size/blocks/identity from the
/// store inode.
pub(crate) fn merge_attr(meta: &Meta, store: &host::Stat) -> FileAttr {
    FileAttr {
        file_type: FileType::from_mode(meta.mode),
        mode: meta.mode,
        nlink: meta.nlink,
        uid: meta.uid,
        gid: meta.gid,
        size: store.size,
        used: store.blocks.saturating_mul(512),
        rdev: meta.rdev,
        ino: store.ino,
        atime: store.atime,
        mtime: meta.mtime,
        ctime: meta.ctime,
    }
}

/// The store's native metadata, shown when no permissions entry shadows
/// the file. Mode bits outside the supported set are masked off.
pub(crate) fn unshadowed_attr(store: &host::Stat) -> FileAttr {
    let mode = store.mode & SUPPORTED_MODES;
    let mut attr = FileAttr::from_stat(store);
    attr.mode = mode;
    attr.file_type = FileType::from_mode(mode);
    attr
}

impl UpFs {
    pub(crate) fn get_attr_blocking(&self, caller: &Caller, path: &Path) -> Result<FileAttr> {
        let resolved = self.resolve(path);

        let meta = self.impersonated(caller, || {
            self.backend().stat(self.perm_fd(), &resolved.perm)
        });

        match meta {
            Ok(meta) => {
                if meta.is_symlink() {
                    return Ok(attr_from_meta(&meta));
                }
                match host::stat_at(self.store_fd(), &resolved.store, false) {
                    Ok(store) => Ok(merge_attr(&meta, &store)),
                    // A dangling permissions entry still answers with
                    // its metadata; the next mutation repairs the pair.
                    Err(err) if err.raw_os_error() == Some(libc::ENOENT) => {
                        Ok(attr_from_meta(&meta))
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Err(Error::NotFound) => {
                let store = host::stat_at(self.store_fd(), &resolved.store, false)?;
                Ok(unshadowed_attr(&store))
            }
            Err(err) => Err(err),
        }
    }
}
