//! End-to-end behavior of the local store.

use hoard_store::blob::{self, blob_path};
use hoard_store::{Store, StoreSettings};
use rand::RngCore;
use tokio_util::sync::CancellationToken;

fn open(dir: &tempfile::TempDir) -> Store {
    Store::open(dir.path().join("store"), StoreSettings::default()).unwrap()
}

#[test]
fn revisioned_overwrite_and_recall() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let cancel = CancellationToken::new();

    let rev1 = store.set(&cancel, "foo", b"v1").unwrap();
    let rev2 = store.set(&cancel, "foo", b"v2").unwrap();
    assert_ne!(rev1, rev2);

    let revs = store.revisions(&cancel, "foo").unwrap();
    assert_eq!(revs.len(), 2);
    assert_eq!(revs[0].id(), rev1);
    assert_eq!(revs[1].id(), rev2);
    assert!(revs[0].created < revs[1].created);

    assert_eq!(store.get_revision(&cancel, "foo", &rev1).unwrap(), b"v1");
    assert_eq!(store.get(&cancel, "foo").unwrap(), b"v2");
}

#[test]
fn delete_then_recreate() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let cancel = CancellationToken::new();

    store.set(&cancel, "k", b"x").unwrap();
    assert!(store.delete(&cancel, "k").unwrap());

    assert!(!store.exists(&cancel, "k").unwrap());
    assert!(!store.list(&cancel, "").unwrap().contains(&"k".to_string()));
    let revs = store.revisions(&cancel, "k").unwrap();
    assert_eq!(revs.len(), 2);
    assert!(revs[1].tombstone);
    assert!(revs[1].filename.is_empty());

    store.set(&cancel, "k", b"y").unwrap();
    assert!(store.exists(&cancel, "k").unwrap());
    assert_eq!(store.list(&cancel, "").unwrap(), vec!["k"]);
    assert_eq!(store.get(&cancel, "k").unwrap(), b"y");
    assert_eq!(store.revisions(&cancel, "k").unwrap().len(), 3);
}

#[test]
fn fsck_removes_orphans_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let cancel = CancellationToken::new();
    store.set(&cancel, "kept", b"referenced").unwrap();

    let mut orphan = [0u8; 100];
    rand::thread_rng().fill_bytes(&mut orphan);
    let orphan_path = store
        .root()
        .join(blob_path(&blob::hash(&orphan)).unwrap());
    std::fs::create_dir_all(orphan_path.parent().unwrap()).unwrap();
    std::fs::write(&orphan_path, orphan).unwrap();

    let first = store.fsck(&cancel).unwrap();
    assert_eq!(first.orphans_removed, 1);
    assert!(!orphan_path.exists());
    assert_eq!(store.get(&cancel, "kept").unwrap(), b"referenced");

    let second = store.fsck(&cancel).unwrap();
    assert!(second.is_clean(), "{second:?}");
    assert_eq!(store.get(&cancel, "kept").unwrap(), b"referenced");
}

#[test]
fn fsck_keeps_history_blobs() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let cancel = CancellationToken::new();
    let rev1 = store.set(&cancel, "k", b"old").unwrap();
    store.set(&cancel, "k", b"new").unwrap();
    store.delete(&cancel, "k").unwrap();

    let report = store.fsck(&cancel).unwrap();
    assert_eq!(report.orphans_removed, 0);
    assert_eq!(store.get_revision(&cancel, "k", &rev1).unwrap(), b"old");
}

#[test]
fn identical_values_share_a_blob() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(&dir);
    let cancel = CancellationToken::new();
    store.set(&cancel, "a", b"same").unwrap();
    store.set(&cancel, "b", b"same").unwrap();

    assert_eq!(store.blobs().hashes(&cancel).unwrap().len(), 1);
    store.delete(&cancel, "a").unwrap();
    assert_eq!(store.get(&cancel, "b").unwrap(), b"same");
}

#[test]
fn interrupted_index_write_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");
    {
        let store = Store::open(&root, StoreSettings::default()).unwrap();
        let cancel = CancellationToken::new();
        store.set(&cancel, "a", b"1").unwrap();
        store.set(&cancel, "b", b"2").unwrap();
    }
    // Crash between "index → back" and "tmp → index".
    std::fs::rename(root.join("index.pb"), root.join("index.pb.back")).unwrap();
    std::fs::write(root.join("index.pb.tmp"), b"partial").unwrap();

    let store = Store::open(&root, StoreSettings::default()).unwrap();
    let cancel = CancellationToken::new();
    assert_eq!(store.list(&cancel, "").unwrap(), vec!["a", "b"]);
    assert!(!root.join("index.pb.tmp").exists());
}
