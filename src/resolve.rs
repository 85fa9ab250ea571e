//! Guest path resolution.
//!
//! Turns a guest-facing absolute path into the pair of host-relative
//! paths the two trees are addressed by, applying the optional FAT-safe
//! store mangling and permission-side case folding.

use std::ffi::{OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Bytes that cannot appear in a FAT filename, plus the escape byte.
const FAT_RESERVED: &[u8] = b" ?:*|<>$\\";

/// Name-rewriting switches, fixed at mount time.
#[derive(Debug, Copy, Clone, Default)]
pub struct NamePolicy {
    /// Rewrite reserved bytes in store names as `$hh`.
    pub fat_safe: bool,
    /// Also rewrite `A..Z` in store names (case-insensitive stores).
    pub fat_lowercase: bool,
    /// Fold `A..Z` to `a..z` on the permissions side.
    pub casefold_perm: bool,
    /// Lower-case the final component during split (the store is
    /// assumed case-insensitive; always on in PS mode).
    pub decap: bool,
}

impl NamePolicy {
    /// True when any switch makes names compare case-insensitively,
    /// which turns case-only self-symlinks into no-ops.
    pub fn case_insensitive(&self) -> bool {
        self.fat_lowercase || self.casefold_perm || self.decap
    }
}

/// Resolved host paths for one guest path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub perm: PathBuf,
    pub store: PathBuf,
}

/// Split a path into its directory and final component.
///
/// Trailing slashes are stripped; a path with no slash gets `"."` as its
/// directory; an empty final component becomes `"."`. With `decap` the
/// final component is folded to lower case.
pub fn split_path(path: &OsStr, decap: bool) -> (PathBuf, OsString) {
    let mut bytes = path.as_bytes();
    while bytes.first() == Some(&b'/') {
        bytes = &bytes[1..];
    }
    while bytes.last() == Some(&b'/') {
        bytes = &bytes[..bytes.len() - 1];
    }

    let (dir, file) = match bytes.iter().rposition(|&b| b == b'/') {
        Some(pos) => (&bytes[..pos], &bytes[pos + 1..]),
        None => (&b"."[..], bytes),
    };
    let dir = if dir.is_empty() { b"." } else { dir };
    let file = if file.is_empty() { b"." } else { file };

    let file = if decap {
        file.iter().map(|b| b.to_ascii_lowercase()).collect()
    } else {
        file.to_vec()
    };

    (
        PathBuf::from(OsString::from_vec(dir.to_vec())),
        OsString::from_vec(file),
    )
}

/// Rewrite one name for the store side.
pub fn mangle(name: &OsStr, fat_lowercase: bool) -> OsString {
    let mut out = Vec::with_capacity(name.len());
    for &b in name.as_bytes() {
        if FAT_RESERVED.contains(&b) || (fat_lowercase && b.is_ascii_uppercase()) {
            out.push(b'$');
            out.extend_from_slice(format!("{b:02x}").as_bytes());
        } else {
            out.push(b);
        }
    }
    OsString::from_vec(out)
}

/// Invert [`mangle`] for presentation. Malformed escapes pass through
/// unchanged.
pub fn demangle(name: &OsStr) -> OsString {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 2 < bytes.len() {
            let hex = &bytes[i + 1..i + 3];
            if hex.iter().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b)) {
                let hi = (hex[0] as char).to_digit(16).unwrap_or(0);
                let lo = (hex[1] as char).to_digit(16).unwrap_or(0);
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    OsString::from_vec(out)
}

fn casefold(name: &OsStr) -> OsString {
    OsString::from_vec(name.as_bytes().iter().map(|b| b.to_ascii_lowercase()).collect())
}

impl NamePolicy {
    /// Resolve a guest path into its `(perm, store)` host paths.
    ///
    /// The leading `/` is stripped and an empty path becomes `"."` on
    /// both sides.
    pub fn resolve(&self, path: &Path) -> Resolved {
        let mut bytes = path.as_os_str().as_bytes();
        while bytes.first() == Some(&b'/') {
            bytes = &bytes[1..];
        }
        while bytes.last() == Some(&b'/') {
            bytes = &bytes[..bytes.len() - 1];
        }
        if bytes.is_empty() {
            return Resolved { perm: PathBuf::from("."), store: PathBuf::from(".") };
        }

        let mut perm = PathBuf::new();
        let mut store = PathBuf::new();
        for comp in bytes.split(|&b| b == b'/') {
            if comp.is_empty() {
                continue;
            }
            let comp = OsStr::from_bytes(comp);
            perm.push(if self.casefold_perm { casefold(comp) } else { comp.to_os_string() });
            store.push(if self.fat_safe {
                mangle(comp, self.fat_lowercase)
            } else {
                comp.to_os_string()
            });
        }
        Resolved { perm, store }
    }

    /// Undo the store mangling on a directory entry name.
    pub fn present(&self, name: &OsStr) -> OsString {
        if self.fat_safe {
            demangle(name)
        } else {
            name.to_os_string()
        }
    }
}
