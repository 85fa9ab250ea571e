//! The filesystem engine: composes the path resolver, the metadata
//! backend, the impersonation layer, and host I/O into the per-operation
//! recipes of the overlay.
//!
//! [`UpFs`] is a cheap handle around shared state; clones serve
//! concurrent callbacks. Every syscall sequence runs inside one
//! `spawn_blocking` closure so identity guards never cross an await
//! point.

mod access;
mod get_attr;
mod handle;
mod mk_dir;
mod mk_node;
mod open;
mod read;
mod read_dir;
mod read_link;
mod release;
mod remove;
mod rename;
mod rm_dir;
mod set_attr;
mod statfs;
mod symlink;
mod write;

use std::ffi::{OsStr, OsString};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task;

use crate::error::{Error, Result};
use crate::host;
use crate::ident::Impersonator;
use crate::meta::{ps::PsBackend, split::SplitBackend, MetaBackend};
use crate::resolve::{NamePolicy, Resolved};
use crate::vfs::{
    Caller, DirEntry, FileAttr, FsStat, Handle, OpenFlags, RecordLock, RecordLockCmd, SetTime,
    Vfs,
};

use handle::Handles;

/// How the engine maps metadata onto the host.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MountMode {
    /// Two trees: permissions root + store root.
    Split,
    /// One tree with per-directory sidecar tables.
    PermsInStore,
}

struct Inner {
    mode: MountMode,
    perm: OwnedFd,
    perm_path: PathBuf,
    store: OwnedFd,
    store_path: PathBuf,
    backend: Box<dyn MetaBackend>,
    imp: Impersonator,
    names: NamePolicy,
    handles: Handles,
}

/// The engine instance handed to the kernel binding.
#[derive(Clone)]
pub struct UpFs {
    inner: Arc<Inner>,
}

impl UpFs {
    /// Mount over two trees: metadata on `perm_root`, bytes on
    /// `store_root`.
    ///
    /// Impersonation turns on only when the process actually holds the
    /// privilege to switch filesystem identities.
    pub fn split(perm_root: &Path, store_root: &Path, names: NamePolicy) -> Result<UpFs> {
        let perm = host::open_root(perm_root)?;
        let store = host::open_root(store_root)?;
        let imp = Impersonator::new(Impersonator::host_privileged());
        tracing::debug!(
            perm = %perm_root.display(),
            store = %store_root.display(),
            impersonation = imp.is_enabled(),
            "split engine ready"
        );
        Ok(UpFs {
            inner: Arc::new(Inner {
                mode: MountMode::Split,
                perm,
                perm_path: perm_root.to_path_buf(),
                store,
                store_path: store_root.to_path_buf(),
                backend: Box::new(SplitBackend),
                imp,
                names,
                handles: Handles::default(),
            }),
        })
    }

    /// Mount over a single tree, metadata in sidecar tables.
    ///
    /// The store is assumed case-insensitive, so the final component of
    /// every path folds to lower case. The engine owns all permission
    /// checks here; impersonation is a no-op.
    pub fn perms_in_store(root: &Path, names: NamePolicy) -> Result<UpFs> {
        let names = NamePolicy { decap: true, ..names };
        let perm = host::open_root(root)?;
        let store = perm.try_clone().map_err(Error::from)?;
        tracing::debug!(root = %root.display(), "permissions-in-store engine ready");
        Ok(UpFs {
            inner: Arc::new(Inner {
                mode: MountMode::PermsInStore,
                perm,
                perm_path: root.to_path_buf(),
                store,
                store_path: root.to_path_buf(),
                backend: Box::new(PsBackend::new(true)),
                imp: Impersonator::disabled(),
                names,
                handles: Handles::default(),
            }),
        })
    }

    pub fn mode(&self) -> MountMode {
        self.inner.mode
    }

    pub fn perm_root(&self) -> &Path {
        &self.inner.perm_path
    }

    pub fn store_root(&self) -> &Path {
        &self.inner.store_path
    }

    fn perm_fd(&self) -> BorrowedFd<'_> {
        self.inner.perm.as_fd()
    }

    fn store_fd(&self) -> BorrowedFd<'_> {
        self.inner.store.as_fd()
    }

    fn backend(&self) -> &dyn MetaBackend {
        self.inner.backend.as_ref()
    }

    fn names(&self) -> &NamePolicy {
        &self.inner.names
    }

    fn handles(&self) -> &Handles {
        &self.inner.handles
    }

    fn resolve(&self, path: &Path) -> Resolved {
        self.inner.names.resolve(path)
    }

    /// Run a metadata operation under the caller's identity.
    fn impersonated<T>(&self, caller: &Caller, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.inner.imp.assume(caller);
        f()
    }
}

impl std::fmt::Debug for UpFs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpFs")
            .field("mode", &self.inner.mode)
            .field("perm", &self.inner.perm_path)
            .field("store", &self.inner.store_path)
            .finish()
    }
}

/// Run `f` on the blocking pool; a lost worker surfaces as an I/O
/// error rather than a panic.
async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    task::spawn_blocking(f).await.map_err(|_| Error::Io)?
}

#[async_trait]
impl Vfs for UpFs {
    async fn get_attr(&self, caller: &Caller, path: &Path) -> Result<FileAttr> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.get_attr_blocking(&caller, &path)).await
    }

    async fn read_link(&self, caller: &Caller, path: &Path) -> Result<OsString> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.read_link_blocking(&caller, &path)).await
    }

    async fn mk_node(&self, caller: &Caller, path: &Path, mode: u32, dev: u64) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.mk_node_blocking(&caller, &path, mode, dev)).await
    }

    async fn mk_dir(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.mk_dir_blocking(&caller, &path, mode)).await
    }

    async fn symlink(&self, caller: &Caller, target: &OsStr, path: &Path) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        let target = target.to_os_string();
        run_blocking(move || fs.symlink_blocking(&caller, &target, &path)).await
    }

    async fn rename(&self, caller: &Caller, from: &Path, to: &Path) -> Result<()> {
        let (fs, caller) = (self.clone(), *caller);
        let (from, to) = (from.to_path_buf(), to.to_path_buf());
        run_blocking(move || fs.rename_blocking(&caller, &from, &to)).await
    }

    async fn remove(&self, caller: &Caller, path: &Path) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.remove_blocking(&caller, &path)).await
    }

    async fn rm_dir(&self, caller: &Caller, path: &Path) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.rm_dir_blocking(&caller, &path)).await
    }

    async fn ch_mod(&self, caller: &Caller, path: &Path, mode: u32) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.ch_mod_blocking(&caller, &path, mode)).await
    }

    async fn ch_own(&self, caller: &Caller, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.ch_own_blocking(&caller, &path, uid, gid)).await
    }

    async fn truncate(&self, caller: &Caller, path: &Path, size: u64) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.truncate_blocking(&caller, &path, size)).await
    }

    async fn utimens(
        &self,
        caller: &Caller,
        path: &Path,
        atime: SetTime,
        mtime: SetTime,
    ) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.utimens_blocking(&caller, &path, atime, mtime)).await
    }

    async fn open(&self, caller: &Caller, path: &Path, flags: OpenFlags) -> Result<Handle> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.open_blocking(&caller, &path, flags)).await
    }

    async fn create(
        &self,
        caller: &Caller,
        path: &Path,
        mode: u32,
        flags: OpenFlags,
    ) -> Result<Handle> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.create_blocking(&caller, &path, mode, flags)).await
    }

    async fn read(&self, handle: Handle, offset: u64, count: u32) -> Result<Vec<u8>> {
        let fs = self.clone();
        run_blocking(move || fs.read_blocking(handle, offset, count)).await
    }

    async fn write(&self, handle: Handle, offset: u64, data: &[u8]) -> Result<u32> {
        let fs = self.clone();
        let data = data.to_vec();
        run_blocking(move || fs.write_blocking(handle, offset, &data)).await
    }

    async fn flush(&self, handle: Handle) -> Result<()> {
        let fs = self.clone();
        run_blocking(move || fs.flush_blocking(handle)).await
    }

    async fn release(&self, handle: Handle) -> Result<()> {
        let fs = self.clone();
        run_blocking(move || fs.release_blocking(handle)).await
    }

    async fn fsync(&self, handle: Handle, datasync: bool) -> Result<()> {
        let fs = self.clone();
        run_blocking(move || fs.fsync_blocking(handle, datasync)).await
    }

    async fn ftruncate(&self, handle: Handle, size: u64) -> Result<()> {
        let fs = self.clone();
        run_blocking(move || fs.ftruncate_blocking(handle, size)).await
    }

    async fn fget_attr(&self, handle: Handle) -> Result<FileAttr> {
        let fs = self.clone();
        run_blocking(move || fs.fget_attr_blocking(handle)).await
    }

    async fn futimens(&self, handle: Handle, atime: SetTime, mtime: SetTime) -> Result<()> {
        let fs = self.clone();
        run_blocking(move || fs.futimens_blocking(handle, atime, mtime)).await
    }

    async fn read_dir(&self, caller: &Caller, path: &Path) -> Result<Vec<DirEntry>> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.read_dir_blocking(&caller, &path)).await
    }

    async fn access(&self, caller: &Caller, path: &Path, mask: u32) -> Result<()> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.access_blocking(&caller, &path, mask)).await
    }

    async fn statfs(&self, caller: &Caller, path: &Path) -> Result<FsStat> {
        let (fs, caller, path) = (self.clone(), *caller, path.to_path_buf());
        run_blocking(move || fs.statfs_blocking(&caller, &path)).await
    }

    async fn lock(
        &self,
        handle: Handle,
        cmd: RecordLockCmd,
        lock: RecordLock,
    ) -> Result<RecordLock> {
        let fs = self.clone();
        run_blocking(move || fs.lock_blocking(handle, cmd, lock)).await
    }
}
