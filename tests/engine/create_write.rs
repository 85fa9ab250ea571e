use super::common::{caller, guest, PsFixture, SplitFixture};

use upfs::vfs::{OpenFlags, Vfs as _};
use upfs::Error;

#[tokio::test]
async fn s6_create_write_release_updates_store_and_mtime() {
    let fx = SplitFixture::new();
    let caller = caller();

    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;

    let handle = fx
        .fs
        .create(&caller, guest("/f"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"abc").await.expect("write");
    fx.fs.release(handle).await.expect("release");

    // Store holds the bytes; the permissions inode holds a fresh mtime.
    assert_eq!(std::fs::read(fx.store_path("f")).unwrap(), b"abc");
    let attr = fx.fs.get_attr(&caller, guest("/f")).await.unwrap();
    assert_eq!(attr.size, 3);
    assert!(attr.mtime.sec >= before);

    // The data bytes never land on the permissions side.
    assert_eq!(std::fs::metadata(fx.perm_path("f")).unwrap().len(), 0);
}

#[tokio::test]
async fn create_is_exclusive() {
    let fx = PsFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/x"), libc::S_IFREG | 0o600, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.release(handle).await.expect("release");

    let err = fx
        .fs
        .create(&caller, guest("/x"), libc::S_IFREG | 0o600, OpenFlags::READ_WRITE)
        .await
        .unwrap_err();
    assert_eq!(err, Error::AlreadyExists);
}

#[tokio::test]
async fn read_at_offsets_and_past_end() {
    let fx = SplitFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/data"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"hello world").await.expect("write");

    assert_eq!(fx.fs.read(handle, 6, 5).await.unwrap(), b"world");
    assert_eq!(fx.fs.read(handle, 6, 64).await.unwrap(), b"world");
    assert!(fx.fs.read(handle, 64, 8).await.unwrap().is_empty());

    fx.fs.release(handle).await.expect("release");
}

#[tokio::test]
async fn sparse_write_extends_file() {
    let fx = PsFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/sparse"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 100, b"tail").await.expect("write");
    let attr = fx.fs.fget_attr(handle).await.expect("fgetattr");
    assert_eq!(attr.size, 104);
    fx.fs.release(handle).await.unwrap();
}

#[tokio::test]
async fn flush_and_fsync_succeed_on_live_handles() {
    let fx = PsFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/log"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"entry").await.expect("write");
    fx.fs.flush(handle).await.expect("flush");
    fx.fs.fsync(handle, true).await.expect("fdatasync");
    fx.fs.fsync(handle, false).await.expect("fsync");
    fx.fs.release(handle).await.expect("release");

    // Operations on a released handle report a stale descriptor.
    let err = fx.fs.flush(handle).await.unwrap_err();
    assert_eq!(err, Error::Host(libc::EBADF));
}

#[tokio::test]
async fn ftruncate_shrinks_and_stamps() {
    let fx = SplitFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/cut"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"0123456789").await.expect("write");
    fx.fs.ftruncate(handle, 4).await.expect("ftruncate");

    let attr = fx.fs.fget_attr(handle).await.expect("fgetattr");
    assert_eq!(attr.size, 4);
    fx.fs.release(handle).await.unwrap();
    assert_eq!(std::fs::read(fx.store_path("cut")).unwrap(), b"0123");
}

#[tokio::test]
async fn truncate_by_path_checks_existence() {
    let fx = PsFixture::new();
    let caller = caller();

    fx.fs.mk_node(&caller, guest("/t"), libc::S_IFREG | 0o644, 0).await.expect("mknod");
    std::fs::write(fx.path("t"), b"0123456789").unwrap();

    fx.fs.truncate(&caller, guest("/t"), 3).await.expect("truncate");
    assert_eq!(std::fs::read(fx.path("t")).unwrap(), b"012");

    let err = fx.fs.truncate(&caller, guest("/absent"), 0).await.unwrap_err();
    assert_eq!(err, Error::NotFound);
}

#[tokio::test]
async fn open_materializes_store_only_files() {
    let fx = SplitFixture::new();
    let caller = caller();
    std::fs::write(fx.store_path("native.txt"), b"payload").unwrap();

    let handle = fx
        .fs
        .open(&caller, guest("/native.txt"), OpenFlags::READ_ONLY)
        .await
        .expect("open store-only file");
    assert_eq!(fx.fs.read(handle, 0, 16).await.unwrap(), b"payload");
    fx.fs.release(handle).await.unwrap();

    // The open left a permissions inode behind.
    assert!(fx.perm_path("native.txt").exists());
}
