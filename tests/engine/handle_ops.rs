use super::common::{caller, guest, PsFixture, SplitFixture};

use upfs::vfs::{
    OpenFlags, RecordLock, RecordLockCmd, RecordLockKind, SetTime, TimeSpec, Vfs as _,
};

#[tokio::test]
async fn futimens_updates_through_the_handle() {
    let fx = PsFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/stamped"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    let when = TimeSpec { sec: 946_684_800, nsec: 250 };
    fx.fs.futimens(handle, SetTime::Omit, SetTime::Set(when)).await.expect("futimens");
    fx.fs.release(handle).await.expect("release");

    let attr = fx.fs.get_attr(&caller, guest("/stamped")).await.unwrap();
    assert_eq!(attr.mtime.sec, when.sec);
    assert_eq!(attr.mtime.nsec, when.nsec);
}

#[tokio::test]
async fn split_futimens_lands_on_the_perm_inode() {
    let fx = SplitFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/stamped"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    let when = TimeSpec { sec: 915_148_800, nsec: 0 };
    fx.fs.futimens(handle, SetTime::Set(when), SetTime::Set(when)).await.expect("futimens");
    fx.fs.release(handle).await.expect("release");

    let perm_meta = std::fs::metadata(fx.perm_path("stamped")).unwrap();
    use std::os::unix::fs::MetadataExt;
    assert_eq!(perm_meta.mtime(), when.sec);

    let attr = fx.fs.get_attr(&caller, guest("/stamped")).await.unwrap();
    assert_eq!(attr.mtime.sec, when.sec);
}

#[tokio::test]
async fn fgetattr_merges_like_getattr() {
    let fx = PsFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/merged"), libc::S_IFREG | 0o640, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"123456").await.expect("write");

    let by_handle = fx.fs.fget_attr(handle).await.expect("fgetattr");
    let by_path = fx.fs.get_attr(&caller, guest("/merged")).await.expect("getattr");
    assert_eq!(by_handle.mode, by_path.mode);
    assert_eq!(by_handle.uid, by_path.uid);
    assert_eq!(by_handle.size, 6);
    assert_eq!(by_path.size, 6);

    fx.fs.release(handle).await.unwrap();
}

#[tokio::test]
async fn record_locks_delegate_to_the_store() {
    let fx = SplitFixture::new();
    let caller = caller();

    let handle = fx
        .fs
        .create(&caller, guest("/locked"), libc::S_IFREG | 0o644, OpenFlags::READ_WRITE)
        .await
        .expect("create");
    fx.fs.write(handle, 0, b"payload").await.expect("write");

    let probe = RecordLock {
        kind: RecordLockKind::Write,
        whence: libc::SEEK_SET as i16,
        start: 0,
        len: 0,
        pid: 0,
    };
    // No competing owner: the probe reports the range unlocked.
    let answer = fx.fs.lock(handle, RecordLockCmd::Get, probe).await.expect("F_GETLK");
    assert_eq!(answer.kind, RecordLockKind::Unlock);

    // Taking and dropping the lock both succeed against the store fd.
    let take = RecordLock { kind: RecordLockKind::Write, ..probe };
    fx.fs.lock(handle, RecordLockCmd::Set, take).await.expect("F_SETLK");
    let release = RecordLock { kind: RecordLockKind::Unlock, ..probe };
    fx.fs.lock(handle, RecordLockCmd::Set, release).await.expect("unlock");

    fx.fs.release(handle).await.unwrap();
}
