use super::common::{caller, guest, PsFixture, SplitFixture};

use upfs::vfs::{SetTime, TimeSpec, Vfs as _};
use upfs::Error;

#[tokio::test]
async fn rename_preserves_identity_in_ps_mode() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.mk_node(&caller, guest("/a"), libc::S_IFREG | 0o640, 0).await.expect("mknod");
    fx.fs.ch_own(&caller, guest("/a"), 42, 43).await.expect("chown");
    let when = TimeSpec { sec: 1_111_111_111, nsec: 0 };
    fx.fs
        .utimens(&caller, guest("/a"), SetTime::Omit, SetTime::Set(when))
        .await
        .expect("utimens");
    let before = fx.fs.get_attr(&caller, guest("/a")).await.unwrap();

    fx.fs.rename(&caller, guest("/a"), guest("/b")).await.expect("rename");

    assert_eq!(fx.fs.get_attr(&caller, guest("/a")).await.unwrap_err(), Error::NotFound);
    let after = fx.fs.get_attr(&caller, guest("/b")).await.unwrap();
    assert_eq!((after.uid, after.gid), (before.uid, before.gid));
    assert_eq!(after.mode, before.mode);
    assert_eq!(after.mtime, before.mtime);
    assert_eq!(after.ctime, before.ctime);
}

#[tokio::test]
async fn ps_rename_across_directories_moves_data_and_metadata() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.mk_dir(&caller, guest("/src"), 0o755).await.expect("mkdir src");
    fx.fs.mk_dir(&caller, guest("/dst"), 0o755).await.expect("mkdir dst");
    fx.fs.mk_node(&caller, guest("/src/x"), libc::S_IFREG | 0o600, 0).await.expect("mknod");
    std::fs::write(fx.path("src/x"), b"cargo").unwrap();

    fx.fs.rename(&caller, guest("/src/x"), guest("/dst/y")).await.expect("rename");

    assert!(!fx.path("src/x").exists());
    assert_eq!(std::fs::read(fx.path("dst/y")).unwrap(), b"cargo");
    let attr = fx.fs.get_attr(&caller, guest("/dst/y")).await.unwrap();
    assert_eq!(attr.mode, libc::S_IFREG | 0o600);
    assert_eq!(attr.uid, 1000);
}

#[tokio::test]
async fn s5_split_rename_materializes_target_parents() {
    let fx = SplitFixture::new();
    let caller = caller();

    fx.fs.mk_dir(&caller, guest("/a"), 0o755).await.expect("mkdir");
    fx.fs.mk_node(&caller, guest("/a/x"), libc::S_IFREG | 0o640, 0).await.expect("mknod");
    let before = fx.fs.get_attr(&caller, guest("/a/x")).await.unwrap();

    // `/b` exists only on the store; the permissions side has never
    // seen it.
    std::fs::create_dir(fx.store_path("b")).unwrap();

    fx.fs.rename(&caller, guest("/a/x"), guest("/b/y")).await.expect("rename");

    let after = fx.fs.get_attr(&caller, guest("/b/y")).await.unwrap();
    assert_eq!(after.mode, before.mode);
    assert!(fx.perm_path("b/y").exists());
    assert!(fx.store_path("b/y").exists());
    assert!(!fx.store_path("a/x").exists());
}

#[tokio::test]
async fn rename_overwrites_compatible_target() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.mk_node(&caller, guest("/from"), libc::S_IFREG | 0o600, 0).await.expect("mknod");
    fx.fs.mk_node(&caller, guest("/to"), libc::S_IFREG | 0o644, 0).await.expect("mknod");
    fx.fs.ch_own(&caller, guest("/from"), 7, 8).await.expect("chown");

    fx.fs.rename(&caller, guest("/from"), guest("/to")).await.expect("rename");

    let attr = fx.fs.get_attr(&caller, guest("/to")).await.unwrap();
    assert_eq!((attr.uid, attr.gid), (7, 8));
    assert_eq!(attr.mode, libc::S_IFREG | 0o600);
    assert_eq!(fx.fs.get_attr(&caller, guest("/from")).await.unwrap_err(), Error::NotFound);
}

#[tokio::test]
async fn rename_store_only_file_moves_the_store() {
    let fx = SplitFixture::new();
    let caller = caller();
    std::fs::write(fx.store_path("loose"), b"bytes").unwrap();

    fx.fs.rename(&caller, guest("/loose"), guest("/found")).await.expect("rename");
    assert!(!fx.store_path("loose").exists());
    assert_eq!(std::fs::read(fx.store_path("found")).unwrap(), b"bytes");
}

#[tokio::test]
async fn rename_to_same_inode_is_a_no_op() {
    let fx = SplitFixture::new();
    let caller = caller();
    fx.fs.mk_node(&caller, guest("/same"), libc::S_IFREG | 0o644, 0).await.expect("mknod");

    fx.fs.rename(&caller, guest("/same"), guest("/same")).await.expect("self rename");
    assert!(fx.store_path("same").exists());
    assert!(fx.perm_path("same").exists());
}

#[tokio::test]
async fn split_rename_keeps_trees_congruent() {
    let fx = SplitFixture::new();
    let caller = caller();

    fx.fs.mk_dir(&caller, guest("/d"), 0o755).await.expect("mkdir");
    fx.fs.mk_node(&caller, guest("/d/f"), libc::S_IFREG | 0o644, 0).await.expect("mknod");

    fx.fs.rename(&caller, guest("/d/f"), guest("/d/g")).await.expect("rename");

    // Both trees agree on the new structure (the split-consistency
    // invariant).
    assert!(fx.perm_path("d/g").exists() && fx.store_path("d/g").exists());
    assert!(!fx.perm_path("d/f").exists() && !fx.store_path("d/f").exists());
}
