use wg_admin::error::Error;
use wg_admin::store::Store;

fn temp_store(name: &str) -> Store {
    let p = std::env::temp_dir().join(format!("wg-admin-store-{name}.toml"));
    let _ = std::fs::remove_file(&p);
    Store::open(&p).unwrap()
}

const KEY_A: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";
const KEY_B: &str = "AgICAgICAgICAgICAgICAgICAgICAgICAgICAgICAgI=";

#[test]
fn create_assigns_increasing_ids() {
    let store = temp_store("ids");
    let a = store.create_client("alice", "10.0.0.2/32", KEY_A).unwrap();
    let b = store.create_client("bob", "10.0.0.3/32", KEY_B).unwrap();
    assert_eq!(a.id, 1);
    assert_eq!(b.id, 2);
    assert_eq!(store.list_clients(), vec![a, b]);
}

#[test]
fn second_delete_reports_not_found_and_keeps_store() {
    let store = temp_store("idempotent-delete");
    let a = store.create_client("alice", "10.0.0.2/32", KEY_A).unwrap();
    let b = store.create_client("bob", "10.0.0.3/32", KEY_B).unwrap();
    let removed = store.remove_client(a.id).unwrap();
    assert_eq!(removed, a);
    let err = store.remove_client(a.id).unwrap_err();
    assert!(matches!(err, Error::NotFound));
    assert_eq!(store.list_clients(), vec![b]);
}

#[test]
fn duplicate_public_key_rejected() {
    let store = temp_store("dup-key");
    store.create_client("alice", "10.0.0.2/32", KEY_A).unwrap();
    let err = store
        .create_client("impostor", "10.0.0.3/32", KEY_A)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.list_clients().len(), 1);
}

#[test]
fn duplicate_address_rejected() {
    let store = temp_store("dup-addr");
    store.create_client("alice", "10.0.0.2/32", KEY_A).unwrap();
    let err = store
        .create_client("bob", "10.0.0.2/32", KEY_B)
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[test]
fn reopen_preserves_data_and_never_reuses_ids() {
    let p = std::env::temp_dir().join("wg-admin-store-reopen.toml");
    let _ = std::fs::remove_file(&p);
    {
        let store = Store::open(&p).unwrap();
        store.create_client("alice", "10.0.0.2/32", KEY_A).unwrap();
        let b = store.create_client("bob", "10.0.0.3/32", KEY_B).unwrap();
        store.remove_client(b.id).unwrap();
    }
    let store = Store::open(&p).unwrap();
    assert_eq!(store.list_clients().len(), 1);
    // bob's id stays burned after reopen
    let c = store
        .create_client("carol", "10.0.0.4/32", "AwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwMDAwM=")
        .unwrap();
    assert_eq!(c.id, 3);
}

#[test]
fn failed_user_persist_rolls_back() {
    let dir = std::env::temp_dir().join("wg-admin-store-user-rollback");
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let store = Store::open(dir.join("db.toml")).unwrap();
    let alice = store.upsert_user("alice", "hash-a", "admin").unwrap();

    // writes fail once the directory is gone
    std::fs::remove_dir_all(&dir).unwrap();
    assert!(store.upsert_user("bob", "hash-b", "viewer").is_err());
    assert!(store.find_user("bob").is_none());

    assert!(store.upsert_user("alice", "hash-c", "viewer").is_err());
    let kept = store.find_user("alice").unwrap();
    assert_eq!(kept.hash, "hash-a");
    assert_eq!(kept.role, "admin");
    assert_eq!(kept.id, alice.id);

    // the failed insert does not burn an id either
    std::fs::create_dir_all(&dir).unwrap();
    let bob = store.upsert_user("bob", "hash-b", "viewer").unwrap();
    assert_eq!(bob.id, alice.id + 1);
}

#[test]
fn find_unknown_is_none() {
    let store = temp_store("find-none");
    assert!(store.find_client(42).is_none());
}
