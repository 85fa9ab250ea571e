use std::ffi::OsStr;

use super::common::{caller, guest, PsFixture, SplitFixture};

use upfs::resolve::NamePolicy;
use upfs::vfs::{FileType, Vfs as _};
use upfs::Error;

#[tokio::test]
async fn split_symlink_round_trips() {
    let fx = SplitFixture::new();
    let caller = caller();

    fx.fs
        .symlink(&caller, OsStr::new("../target/file"), guest("/link"))
        .await
        .expect("symlink");

    let target = fx.fs.read_link(&caller, guest("/link")).await.expect("readlink");
    assert_eq!(target, OsStr::new("../target/file"));

    // Native symlink on the permissions side, placeholder on the store.
    assert!(fx.perm_path("link").symlink_metadata().unwrap().file_type().is_symlink());
    assert!(fx.store_path("link").metadata().unwrap().file_type().is_file());

    let attr = fx.fs.get_attr(&caller, guest("/link")).await.unwrap();
    assert_eq!(attr.file_type, FileType::Symlink);
}

#[tokio::test]
async fn ps_symlink_round_trips() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.symlink(&caller, OsStr::new("deep/target"), guest("/ln")).await.expect("symlink");

    let attr = fx.fs.get_attr(&caller, guest("/ln")).await.expect("stat");
    assert_eq!(attr.file_type, FileType::Symlink);
    assert_eq!(attr.mode & 0o7777, 0o644);

    let target = fx.fs.read_link(&caller, guest("/ln")).await.expect("readlink");
    assert_eq!(target, OsStr::new("deep/target"));

    // The target bytes live in an ordinary store file.
    assert_eq!(std::fs::read(fx.path("ln")).unwrap(), b"deep/target");
}

#[tokio::test]
async fn ps_symlink_is_invisible_until_retyped() {
    // A colliding store file makes phase two fail; the reserved entry
    // must be rolled back, leaving nothing guest-visible.
    let fx = PsFixture::new();
    let caller = caller();
    std::fs::write(fx.path("taken"), b"occupied").unwrap();

    let err = fx
        .fs
        .symlink(&caller, OsStr::new("anywhere"), guest("/taken"))
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadyExists);
    // The store file is untouched and no symlink entry exists.
    assert_eq!(std::fs::read(fx.path("taken")).unwrap(), b"occupied");
    let attr = fx.fs.get_attr(&caller, guest("/taken")).await.unwrap();
    assert_eq!(attr.file_type, FileType::Regular);
}

#[tokio::test]
async fn case_only_self_symlink_is_a_no_op() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.symlink(&caller, OsStr::new("foo"), guest("/FOO")).await.expect("no-op symlink");
    // Neither side came into being.
    assert!(!fx.path("FOO").exists());
    assert!(!fx.path("foo").exists());
    assert_eq!(fx.fs.get_attr(&caller, guest("/foo")).await.unwrap_err(), Error::NotFound);

    // The same spelling with a real target still creates a link.
    let fx2 = SplitFixture::with_names(NamePolicy {
        fat_safe: true,
        fat_lowercase: true,
        casefold_perm: false,
        decap: false,
    });
    fx2.fs.symlink(&caller, OsStr::new("bar"), guest("/BAR")).await.expect("no-op symlink");
    assert!(!fx2.store_path("$42$41$52").exists());
}

#[tokio::test]
async fn symlink_into_unmaterialized_perm_directory() {
    let fx = SplitFixture::new();
    let caller = caller();
    std::fs::create_dir(fx.store_path("sub")).unwrap();

    fx.fs
        .symlink(&caller, OsStr::new("elsewhere"), guest("/sub/link"))
        .await
        .expect("symlink with mkdir_p retry");
    assert!(fx.perm_path("sub/link").symlink_metadata().unwrap().file_type().is_symlink());
}

#[tokio::test]
async fn readlink_of_regular_file_is_invalid() {
    let fx = PsFixture::new();
    let caller = caller();
    fx.fs.mk_node(&caller, guest("/plain"), libc::S_IFREG | 0o644, 0).await.expect("mknod");

    let err = fx.fs.read_link(&caller, guest("/plain")).await.unwrap_err();
    assert_eq!(err, Error::InvalidArgument);
}

#[tokio::test]
async fn long_targets_round_trip() {
    let fx = PsFixture::new();
    let caller = caller();
    let target = "x/".repeat(900) + "end";

    fx.fs
        .symlink(&caller, OsStr::new(&target), guest("/long"))
        .await
        .expect("symlink long target");
    let read = fx.fs.read_link(&caller, guest("/long")).await.expect("readlink");
    assert_eq!(read, OsStr::new(&target));
}
