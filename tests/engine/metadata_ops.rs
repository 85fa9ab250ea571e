use super::common::{caller, guest, PsFixture, SplitFixture};

use upfs::vfs::{FileType, SetTime, TimeSpec, Vfs as _};
use upfs::Error;

#[tokio::test]
async fn ps_metadata_round_trip() {
    let fx = PsFixture::new();
    let caller = caller();

    // create -> chmod m -> chown u,g -> utimens t -> getattr returns
    // exactly what was stored.
    let cases = [
        (0o640u32, 1000u32, 1000u32, 1_600_000_000i64),
        (0o7777, 0, u32::MAX - 1, 0),
        (0o000, 65534, 100, 2_000_000_000),
    ];
    for (i, (mode, uid, gid, sec)) in cases.into_iter().enumerate() {
        let path = format!("/f{i}");
        fx.fs.mk_node(&caller, guest(&path), libc::S_IFREG | 0o600, 0).await.expect("mknod");

        fx.fs.ch_mod(&caller, guest(&path), mode).await.expect("chmod");
        fx.fs.ch_own(&caller, guest(&path), uid, gid).await.expect("chown");
        let when = TimeSpec { sec, nsec: 500 };
        fx.fs
            .utimens(&caller, guest(&path), SetTime::Omit, SetTime::Set(when))
            .await
            .expect("utimens");

        let attr = fx.fs.get_attr(&caller, guest(&path)).await.expect("getattr");
        assert_eq!(attr.file_type, FileType::Regular);
        assert_eq!(attr.mode, libc::S_IFREG | mode);
        assert_eq!((attr.uid, attr.gid), (uid, gid));
        assert_eq!(attr.mtime.sec, sec);
        assert_eq!(attr.mtime.nsec, 500);
    }
}

#[tokio::test]
async fn s1_fresh_ps_mount_scenario() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.mk_dir(&caller, guest("/d"), 0o750).await.expect("mkdir");
    fx.fs.ch_own(&caller, guest("/d"), 1000, 1000).await.expect("chown");
    fx.fs.mk_node(&caller, guest("/d/f"), libc::S_IFREG | 0o600, 0).await.expect("mknod");

    let handle = fx
        .fs
        .open(&caller, guest("/d/f"), upfs::vfs::OpenFlags(libc::O_WRONLY))
        .await
        .expect("open");
    fx.fs.write(handle, 0, b"hello").await.expect("write");
    fx.fs.release(handle).await.expect("release");

    let dir = fx.fs.get_attr(&caller, guest("/d")).await.expect("stat dir");
    assert_eq!(dir.mode, libc::S_IFDIR | 0o750);
    assert_eq!((dir.uid, dir.gid), (1000, 1000));

    let attr = fx.fs.get_attr(&caller, guest("/d/f")).await.expect("stat file");
    assert_eq!(attr.mode, libc::S_IFREG | 0o600);
    assert_eq!((attr.uid, attr.gid), (1000, 1000));
    assert_eq!(attr.size, 5);
}

#[tokio::test]
async fn s2_split_materializes_on_chmod() {
    let fx = SplitFixture::new();
    let caller = caller();

    // Pre-existing store file the permissions side has never seen.
    std::fs::write(fx.store_path("readme.txt"), b"").unwrap();

    let attr = fx.fs.get_attr(&caller, guest("/readme.txt")).await.expect("unshadowed stat");
    assert_eq!(attr.file_type, FileType::Regular);
    assert!(!fx.perm_path("readme.txt").exists());

    fx.fs.ch_mod(&caller, guest("/readme.txt"), 0o400).await.expect("chmod materializes");
    assert!(fx.perm_path("readme.txt").exists());

    std::fs::write(fx.store_path("readme.txt"), b"grown").unwrap();
    let attr = fx.fs.get_attr(&caller, guest("/readme.txt")).await.expect("merged stat");
    assert_eq!(attr.mode & 0o7777, 0o400);
    // Size keeps coming from the store.
    assert_eq!(attr.size, 5);
}

#[tokio::test]
async fn unsupported_mode_bits_are_refused() {
    let fx = PsFixture::new();
    let err =
        fx.fs.mk_node(&caller(), guest("/fifo"), libc::S_IFIFO | 0o600, 0).await.unwrap_err();
    assert_eq!(err, Error::Unsupported);
}

#[tokio::test]
async fn getattr_missing_both_sides_is_not_found() {
    let fx = SplitFixture::new();
    let err = fx.fs.get_attr(&caller(), guest("/absent")).await.unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[tokio::test]
async fn split_utimens_lands_on_perm_inode() {
    let fx = SplitFixture::new();
    let caller = caller();
    fx.fs.mk_node(&caller, guest("/t"), libc::S_IFREG | 0o644, 0).await.expect("mknod");

    let when = TimeSpec { sec: 1_234_567_890, nsec: 0 };
    fx.fs
        .utimens(&caller, guest("/t"), SetTime::Set(when), SetTime::Set(when))
        .await
        .expect("utimens");

    let attr = fx.fs.get_attr(&caller, guest("/t")).await.unwrap();
    assert_eq!(attr.mtime.sec, when.sec);
}
