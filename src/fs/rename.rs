//! Rename: the two-phase move with a permissions-side placeholder.
//!
//! The placeholder machine is `None -> Created -> Adopted | RolledBack`:
//! a reserved name on the permissions side (a mode-0 node, or an
//! existing target chmod'ed to 0) deters concurrent tampering between
//! the store rename and the permissions rename. Rollback is best
//! effort; it succeeds absent concurrent adversaries.

use std::path::Path;

use crate::error::{Error, Result};
use crate::host;
use crate::meta::{split, Meta};
use crate::resolve::Resolved;
use crate::vfs::Caller;

use super::{MountMode, UpFs};

/// What was done to reserve the target name.
enum Placeholder {
    /// Nothing to reserve (symlink target; no deterrent possible).
    None,
    /// A fresh mode-0 entry was created at the target.
    Created { is_dir: bool },
    /// An existing target was chmod'ed to 0; its old bits are kept for
    /// rollback.
    Adopted { old_mode: u32 },
}

impl UpFs {
    pub(crate) fn rename_blocking(&self, caller: &Caller, from: &Path, to: &Path) -> Result<()> {
        let from_r = self.resolve(from);
        let to_r = self.resolve(to);

        // Same host inode: nothing moves.
        if let (Ok(a), Ok(b)) = (
            host::stat_at(self.store_fd(), &from_r.store, false),
            host::stat_at(self.store_fd(), &to_r.store, false),
        ) {
            if a.dev == b.dev && a.ino == b.ino {
                return Ok(());
            }
        }

        let source = self.impersonated(caller, || {
            self.backend().stat(self.perm_fd(), &from_r.perm)
        });
        let source = match source {
            Ok(meta) => meta,
            Err(Error::NotFound) => {
                // No permissions entry to carry along; a plain store
                // rename is the whole move.
                host::rename_at(self.store_fd(), &from_r.store, self.store_fd(), &to_r.store)?;
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        match self.mode() {
            MountMode::Split => self.rename_split(caller, &from_r, &to_r, &source),
            MountMode::PermsInStore => self.rename_ps(&from_r, &to_r),
        }
    }

    fn rename_split(
        &self,
        caller: &Caller,
        from: &Resolved,
        to: &Resolved,
        source: &Meta,
    ) -> Result<()> {
        let placeholder = self.reserve_target(caller, to, source)?;

        if let Err(err) =
            host::rename_at(self.store_fd(), &from.store, self.store_fd(), &to.store)
        {
            self.roll_back_placeholder(to, &placeholder);
            return Err(err.into());
        }

        let moved = self.impersonated(caller, || {
            self.backend()
                .rename(self.perm_fd(), &from.perm, self.perm_fd(), &to.perm)
        });
        if let Err(err) = moved {
            // Put the store back so the trees stay congruent, then drop
            // the reservation.
            if let Err(back) =
                host::rename_at(self.store_fd(), &to.store, self.store_fd(), &from.store)
            {
                tracing::warn!(
                    from = %from.store.display(),
                    error = %back,
                    "store rename rollback failed"
                );
            }
            self.roll_back_placeholder(to, &placeholder);
            return Err(err);
        }

        // Placeholder adopted: the permissions rename replaced it.
        Ok(())
    }

    /// Step three of the recipe: reserve the target name on the
    /// permissions side.
    fn reserve_target(
        &self,
        caller: &Caller,
        to: &Resolved,
        source: &Meta,
    ) -> Result<Placeholder> {
        let target = self.impersonated(caller, || {
            self.backend().stat(self.perm_fd(), &to.perm)
        });
        match target {
            Err(Error::NotFound) => {
                match self.make_placeholder(caller, to, source.is_dir()) {
                    Ok(()) => Ok(Placeholder::Created { is_dir: source.is_dir() }),
                    Err(Error::NotFound) => {
                        // Target directory never materialized; build the
                        // parents and retry once.
                        if let Some(parent) = to.perm.parent() {
                            split::mkdir_p(self.perm_fd(), parent)?;
                        }
                        self.make_placeholder(caller, to, source.is_dir())?;
                        Ok(Placeholder::Created { is_dir: source.is_dir() })
                    }
                    Err(err) => Err(err),
                }
            }
            Ok(existing) if !existing.is_symlink() => {
                let old_mode = existing.mode & 0o7777;
                self.impersonated(caller, || {
                    self.backend().chmod(self.perm_fd(), &to.perm, 0)
                })?;
                Ok(Placeholder::Adopted { old_mode })
            }
            Ok(_) => Ok(Placeholder::None),
            Err(err) => Err(err),
        }
    }

    fn make_placeholder(&self, caller: &Caller, to: &Resolved, is_dir: bool) -> Result<()> {
        self.impersonated(caller, || {
            if is_dir {
                self.backend().mkdir(self.perm_fd(), &to.perm, caller, 0)
            } else {
                self.backend().mknod(self.perm_fd(), &to.perm, caller, libc::S_IFREG, 0)
            }
        })
    }

    fn roll_back_placeholder(&self, to: &Resolved, placeholder: &Placeholder) {
        let undone = match placeholder {
            Placeholder::None => Ok(()),
            Placeholder::Created { is_dir } => {
                self.backend().unlink(self.perm_fd(), &to.perm, *is_dir)
            }
            Placeholder::Adopted { old_mode } => {
                self.backend().chmod(self.perm_fd(), &to.perm, *old_mode)
            }
        };
        if let Err(err) = undone {
            tracing::warn!(
                target = %to.perm.display(),
                error = %err,
                "rename placeholder rollback failed"
            );
        }
    }

    /// PS mode: the store moves first, then the sidecar records. The
    /// backend handles the same-directory and cross-directory table
    /// protocols.
    fn rename_ps(&self, from: &Resolved, to: &Resolved) -> Result<()> {
        host::rename_at(self.store_fd(), &from.store, self.store_fd(), &to.store)?;

        match self
            .backend()
            .rename(self.perm_fd(), &from.perm, self.perm_fd(), &to.perm)
        {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Err(back) =
                    host::rename_at(self.store_fd(), &to.store, self.store_fd(), &from.store)
                {
                    tracing::warn!(
                        from = %from.store.display(),
                        error = %back,
                        "store rename rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}
