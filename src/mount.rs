//! Mount-surface plumbing: root syntax, option rewriting, premounts.
//!
//! The engine-private options (`mount_p`, `mount_s`, `mount_r`) are
//! stripped before the remainder is forwarded to the kernel binding,
//! and the options the overlay cannot work without are appended:
//! `allow_other` in both modes, plus `nonempty,default_permissions` in
//! PS mode where the kernel performs the permission checks against the
//! engine's answers.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::fs::MountMode;

/// Options every mount must carry, per mode.
pub fn required_options(mode: MountMode) -> &'static [&'static str] {
    match mode {
        MountMode::Split => &["allow_other"],
        MountMode::PermsInStore => &["nonempty", "allow_other", "default_permissions"],
    }
}

/// Split a `<perm root>:<store root>` argument.
pub fn parse_roots(arg: &str) -> Option<(PathBuf, PathBuf)> {
    let (perm, store) = arg.split_once(':')?;
    if perm.is_empty() || store.is_empty() {
        return None;
    }
    Some((PathBuf::from(perm), PathBuf::from(store)))
}

/// Which host premounts were requested via engine-private options.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Premounts {
    pub perm: bool,
    pub store: bool,
    pub root: bool,
}

/// Rewrite a comma-separated `-o` option string: pull out the
/// engine-private options and append the required ones that are not
/// already present.
pub fn rewrite_options(options: &str, mode: MountMode) -> (Vec<String>, Premounts) {
    let mut premounts = Premounts::default();
    let mut kept: Vec<String> = Vec::new();

    for opt in options.split(',').filter(|opt| !opt.is_empty()) {
        match opt {
            "mount_p" => premounts.perm = true,
            "mount_s" => premounts.store = true,
            "mount_r" => premounts.root = true,
            other => kept.push(other.to_owned()),
        }
    }

    for required in required_options(mode) {
        if !kept.iter().any(|opt| opt == required) {
            kept.push((*required).to_owned());
        }
    }

    (kept, premounts)
}

/// One host mount to run before the overlay starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountCommand {
    pub argv: Vec<PathBuf>,
    /// Device-style mounts must succeed; a table-style mount may fail
    /// quietly (the fstab entry may already be active).
    pub fatal_on_failure: bool,
    /// Device mounts land the tree at the target, which becomes the
    /// effective root.
    pub remapped_root: Option<PathBuf>,
}

/// Plan the premount for one root.
///
/// A directory root becomes a table-style `mount <dir>`; anything else
/// (a block device, an image file) becomes a device-style
/// `mount <dev> <target>` whose failure aborts the setup.
pub fn plan_premount(root: &Path, target: &Path) -> Option<MountCommand> {
    let meta = std::fs::metadata(root).ok()?;
    if meta.is_dir() {
        Some(MountCommand {
            argv: vec![PathBuf::from("/bin/mount"), root.to_path_buf()],
            fatal_on_failure: false,
            remapped_root: None,
        })
    } else {
        Some(MountCommand {
            argv: vec![
                PathBuf::from("/bin/mount"),
                root.to_path_buf(),
                target.to_path_buf(),
            ],
            fatal_on_failure: true,
            remapped_root: Some(target.to_path_buf()),
        })
    }
}

/// Execute a planned premount. Returns `false` when a fatal mount
/// failed; the caller reports and exits non-zero.
pub fn run_premount(command: &MountCommand) -> bool {
    let status = Command::new(&command.argv[0]).args(&command.argv[1..]).status();
    match status {
        Ok(status) if status.success() => true,
        Ok(status) => {
            if command.fatal_on_failure {
                eprintln!("upfs: {:?} failed with {status}", command.argv);
                false
            } else {
                true
            }
        }
        Err(err) => {
            eprintln!("upfs: cannot run {:?}: {err}", command.argv[0]);
            !command.fatal_on_failure
        }
    }
}
