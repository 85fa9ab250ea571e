//! Per-thread impersonation of the guest caller.
//!
//! Every permissions-root operation runs between a drop to the caller's
//! filesystem identity and a regain of the mount owner's, so host
//! permission checks see the guest, not root. The fsuid/fsgid machinery
//! is per-thread; a [`Guard`] must therefore live entirely inside one
//! blocking closure and never cross an await point. Restoring preserves
//! the errno of the bracketed call.
//!
//! An identity change that fails on an enabled layer aborts the process:
//! a mounted filesystem in a half-switched identity state is unsafe.

use crate::vfs::Caller;

/// Umask installed when the caller reports none.
const DEFAULT_UMASK: u32 = 0o022;

/// Mount-time switch around the fsuid/fsgid bracket.
///
/// Disabled in PS mode (the engine owns its permission checks) and when
/// the process lacks the privilege to switch identities at all.
#[derive(Debug, Copy, Clone)]
pub struct Impersonator {
    enabled: bool,
}

fn set_fsids(uid: u32, gid: u32) -> bool {
    unsafe {
        libc::setfsuid(uid);
        libc::setfsgid(gid);
        // setfs* report the previous id; a second call reads the result
        // back.
        libc::setfsuid(uid) == uid as libc::c_int && libc::setfsgid(gid) == gid as libc::c_int
    }
}

impl Impersonator {
    pub fn new(enabled: bool) -> Self {
        Impersonator { enabled }
    }

    pub fn disabled() -> Self {
        Impersonator { enabled: false }
    }

    /// Whether this process can impersonate at all.
    pub fn host_privileged() -> bool {
        unsafe { libc::geteuid() == 0 }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Adopt the caller's filesystem identity and umask until the guard
    /// drops.
    pub fn assume(&self, caller: &Caller) -> Guard {
        if !self.enabled {
            return Guard { saved_umask: None };
        }

        if !set_fsids(caller.uid, caller.gid) {
            // Cannot run callbacks with an unknown identity.
            tracing::error!(uid = caller.uid, gid = caller.gid, "identity change refused");
            std::process::abort();
        }

        let umask = effective_umask(caller.umask);
        let saved = unsafe { libc::umask(umask as libc::mode_t) };
        Guard { saved_umask: Some(saved as u32) }
    }
}

/// The caller's umask, with `022` standing in for an unset one.
pub fn effective_umask(umask: u32) -> u32 {
    if umask == 0 {
        DEFAULT_UMASK
    } else {
        umask
    }
}

/// Restores root identity and the saved umask on drop.
pub struct Guard {
    saved_umask: Option<u32>,
}

impl Drop for Guard {
    fn drop(&mut self) {
        let Some(saved) = self.saved_umask else {
            return;
        };
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        if !set_fsids(0, 0) {
            tracing::error!("could not regain mount identity");
            std::process::abort();
        }
        unsafe {
            libc::umask(saved as libc::mode_t);
            *libc::__errno_location() = errno;
        }
    }
}
