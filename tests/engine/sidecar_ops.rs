use std::collections::HashSet;
use std::ffi::OsStr;
use std::os::fd::AsFd;

use super::common::{caller, guest, PsFixture};

use upfs::host;
use upfs::table::{Entry, LockMode, Table, ENTRY_LEN, HEADER_LEN, NO_ENTRY};
use upfs::vfs::{OpenFlags, Vfs as _};
use upfs::Error;

/// Open the sidecar of one fixture directory for direct inspection.
fn inspect(fx: &PsFixture, rel: &str) -> (std::os::fd::OwnedFd, Table) {
    let dir = host::open_root(&fx.path(rel)).expect("open dir");
    let table = Table::open(dir.as_fd(), false, LockMode::Shared).expect("open sidecar");
    (dir, table)
}

#[tokio::test]
async fn free_list_idempotence_after_create_delete_cycles() {
    let fx = PsFixture::new();
    let caller = caller();
    fx.fs.mk_dir(&caller, guest("/d"), 0o755).await.expect("mkdir");

    const N: usize = 12;
    for i in 0..N {
        let path = format!("/d/f{i}");
        fx.fs.mk_node(&caller, guest(&path), libc::S_IFREG | 0o600, 0).await.expect("mknod");
    }
    // Delete in an order unlike the creation order.
    for i in (0..N).step_by(2).chain((0..N).skip(1).step_by(2)) {
        let path = format!("/d/f{i}");
        fx.fs.remove(&caller, guest(&path)).await.expect("unlink");
    }

    // Exactly the header plus N slots, every one unused.
    let len = std::fs::metadata(fx.sidecar("d")).unwrap().len();
    assert_eq!(len, HEADER_LEN + N as u64 * ENTRY_LEN);

    let (_dir, table) = inspect(&fx, "d");
    assert!(table.is_empty().expect("scan"));

    // The free-list is an acyclic permutation of 0..N.
    let mut seen = HashSet::new();
    let mut cursor = table.header().expect("header").free_list;
    while cursor != NO_ENTRY {
        assert!((cursor as usize) < N, "free index {cursor} out of range");
        assert!(seen.insert(cursor), "cycle through {cursor}");
        let entry = table.read_entry(HEADER_LEN + cursor as u64 * ENTRY_LEN).expect("entry");
        assert!(entry.is_unused());
        cursor = entry.next_free();
    }
    assert_eq!(seen.len(), N);
}

#[tokio::test]
async fn s3_concurrent_exclusive_creates_yield_one_winner() {
    let fx = PsFixture::new();
    let caller = caller();
    fx.fs.mk_dir(&caller, guest("/dir"), 0o755).await.expect("mkdir");

    for round in 0..8 {
        let path = format!("/dir/x{round}");
        let a = {
            let fs = fx.fs.clone();
            let path = path.clone();
            tokio::spawn(async move {
                fs.create(&caller, guest(&path), libc::S_IFREG | 0o600, OpenFlags::READ_WRITE)
                    .await
            })
        };
        let b = {
            let fs = fx.fs.clone();
            let path = path.clone();
            tokio::spawn(async move {
                fs.create(&caller, guest(&path), libc::S_IFREG | 0o600, OpenFlags::READ_WRITE)
                    .await
            })
        };
        let (a, b) = (a.await.expect("join"), b.await.expect("join"));

        let (winner, loser) = match (a, b) {
            (Ok(handle), Err(err)) => (handle, err),
            (Err(err), Ok(handle)) => (handle, err),
            other => panic!("expected exactly one winner, got {other:?}"),
        };
        assert_eq!(loser, Error::AlreadyExists);
        fx.fs.release(winner).await.expect("release winner");
    }
}

#[tokio::test]
async fn concurrent_churn_keeps_sidecar_consistent() {
    let fx = PsFixture::new();
    let caller = caller();
    fx.fs.mk_dir(&caller, guest("/hot"), 0o755).await.expect("mkdir");

    const TASKS: usize = 6;
    const ROUNDS: usize = 24;
    let mut joins = Vec::new();
    for task in 0..TASKS {
        let fs = fx.fs.clone();
        joins.push(tokio::spawn(async move {
            for round in 0..ROUNDS {
                // Half the names collide across tasks, half are private.
                let name = if round % 2 == 0 {
                    format!("/hot/shared{}", round % 5)
                } else {
                    format!("/hot/own-{task}-{round}")
                };
                let _ = fs.mk_node(&caller, guest(&name), libc::S_IFREG | 0o600, 0).await;
                let _ = fs.remove(&caller, guest(&name)).await;
            }
        }));
    }
    for join in joins {
        join.await.expect("task");
    }

    // However the storm interleaved, the table still validates: header
    // intact, every used entry carrying a unique name.
    let (_dir, table) = inspect(&fx, "hot");
    let header = table.header().expect("header decodes");
    assert!(header.free_list == NO_ENTRY || header.free_list < 4096);

    let mut names = HashSet::new();
    for item in table.entries() {
        let (entry, _) = item.expect("entry decodes");
        if !entry.is_unused() {
            let name = entry.name_bytes().to_vec();
            assert!(names.insert(name), "duplicate used name in sidecar");
        }
    }
}

#[tokio::test]
async fn sidecar_rejects_tampered_header() {
    let fx = PsFixture::new();
    let caller = caller();
    fx.fs.mk_node(&caller, guest("/f"), libc::S_IFREG | 0o600, 0).await.expect("mknod");

    // Corrupt the magic; every subsequent metadata operation on the
    // directory reports corruption.
    let sidecar = fx.sidecar("");
    let mut bytes = std::fs::read(&sidecar).unwrap();
    bytes[0] ^= 0xff;
    std::fs::write(&sidecar, &bytes).unwrap();

    assert_eq!(fx.fs.ch_mod(&caller, guest("/f"), 0o600).await.unwrap_err(), Error::Io);
}

#[tokio::test]
async fn stored_names_cap_at_255_bytes() {
    let fx = PsFixture::new();
    let caller = caller();
    let long = "n".repeat(300);
    let path = format!("/{long}");
    fx.fs.mk_node(&caller, guest(&path), libc::S_IFREG | 0o600, 0).await.expect("mknod");

    let dir = host::open_root(fx.root.path()).expect("open root");
    let table = Table::open(dir.as_fd(), false, LockMode::Shared).expect("open sidecar");
    let found = table
        .lookup(OsStr::new(&long[..255]))
        .expect("scan")
        .map(|(entry, _): (Entry, u64)| entry);
    assert!(found.is_some(), "name stored truncated to 255 bytes");
}
