use std::path::{Path, PathBuf};

use tempfile::TempDir;

use upfs::resolve::NamePolicy;
use upfs::vfs::Caller;
use upfs::UpFs;

/// Split-mode engine over two scratch trees.
pub struct SplitFixture {
    pub perm: TempDir,
    pub store: TempDir,
    pub fs: UpFs,
}

impl SplitFixture {
    pub fn new() -> Self {
        Self::with_names(NamePolicy::default())
    }

    pub fn with_names(names: NamePolicy) -> Self {
        let perm = TempDir::new().expect("create perm root");
        let store = TempDir::new().expect("create store root");
        let fs = UpFs::split(perm.path(), store.path(), names).expect("split engine");
        SplitFixture { perm, store, fs }
    }

    pub fn perm_path(&self, rel: &str) -> PathBuf {
        self.perm.path().join(rel)
    }

    pub fn store_path(&self, rel: &str) -> PathBuf {
        self.store.path().join(rel)
    }
}

/// PS-mode engine over one scratch tree.
pub struct PsFixture {
    pub root: TempDir,
    pub fs: UpFs,
}

impl PsFixture {
    pub fn new() -> Self {
        let root = TempDir::new().expect("create root");
        let fs = UpFs::perms_in_store(root.path(), NamePolicy::default()).expect("ps engine");
        PsFixture { root, fs }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    pub fn sidecar(&self, rel: &str) -> PathBuf {
        if rel.is_empty() {
            self.root.path().join(".upfs")
        } else {
            self.root.path().join(rel).join(".upfs")
        }
    }
}

pub fn caller() -> Caller {
    Caller::new(1000, 1000, 0o022)
}

pub fn guest(path: &str) -> &Path {
    Path::new(path)
}

/// Live descriptor count for leak checks.
pub fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").expect("read fd table").count()
}
