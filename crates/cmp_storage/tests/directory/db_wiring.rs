#![forbid(unsafe_code)]

use std::sync::Arc;

use cmp_kernel_contracts::directory::{PasswordCredential, Principal, Role, UserId};
use cmp_kernel_contracts::CmpError;
use cmp_storage::credential::PlaintextScheme;
use cmp_storage::directory::Directory;
use cmp_storage::notify::{ChangeEvent, ChangeHub, ChangeOp, EntityKind};
use cmp_storage::store::{EntityStore, JsonFileStore, MemoryStore};
use cmp_storage::testing::FailingStore;
use parking_lot::Mutex;

fn pw(v: &str) -> PasswordCredential {
    PasswordCredential::new(v)
}

fn directory_over(store: Arc<dyn EntityStore>) -> (Directory, Arc<ChangeHub>) {
    let hub = Arc::new(ChangeHub::new());
    (
        Directory::new(store, hub.clone(), Arc::new(PlaintextScheme)),
        hub,
    )
}

fn admin(d: &Directory) -> Principal {
    d.register("Root", "root@cmp.com", &pw("root"), Role::Admin)
        .unwrap()
        .principal()
}

#[test]
fn at_directory_db_01_duplicate_email_in_any_case() {
    let (d, _) = directory_over(Arc::new(MemoryStore::new()));
    d.register("Jane", "jane@x.com", &pw("a"), Role::User)
        .unwrap();
    assert_eq!(
        d.register("Other", "JANE@X.COM", &pw("b"), Role::User),
        Err(CmpError::DuplicateEmail)
    );
    assert_eq!(
        d.register("Staffer", " Jane@x.com ", &pw("c"), Role::Staff),
        Err(CmpError::DuplicateEmail)
    );
    assert_eq!(d.list_users().unwrap().len(), 1);
}

#[test]
fn at_directory_db_02_concurrent_registration_has_one_winner() {
    let (d, _) = directory_over(Arc::new(MemoryStore::new()));
    let results = Mutex::new(Vec::new());
    std::thread::scope(|s| {
        for i in 0..8 {
            let d = &d;
            let results = &results;
            s.spawn(move || {
                let r = d.register(
                    &format!("Racer {i}"),
                    "race@x.com",
                    &pw("pw"),
                    Role::User,
                );
                results.lock().push(r);
            });
        }
    });
    let results = results.into_inner();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| r == &Err(CmpError::DuplicateEmail)));
    assert_eq!(d.list_users().unwrap().len(), 1);
}

#[test]
fn at_directory_db_03_staff_management_is_admin_only() {
    let (d, _) = directory_over(Arc::new(MemoryStore::new()));
    let root = admin(&d);
    let staff = d
        .add_staff(&root, "Sam", "sam@cmp.com", &pw("s"))
        .unwrap();
    assert_eq!(staff.role, Role::Staff);

    let as_staff = staff.principal();
    assert!(matches!(
        d.add_staff(&as_staff, "Eve", "eve@cmp.com", &pw("e")),
        Err(CmpError::Forbidden { .. })
    ));
    assert!(matches!(
        d.remove_staff(&as_staff, &staff.id),
        Err(CmpError::Forbidden { .. })
    ));

    let user = d
        .register("Una", "una@cmp.com", &pw("u"), Role::User)
        .unwrap();
    assert!(matches!(
        d.remove_staff(&root, &user.id),
        Err(CmpError::NotFound { entity: "staff", .. })
    ));
    assert!(matches!(
        d.remove_staff(&root, &UserId::new("u_ghost").unwrap()),
        Err(CmpError::NotFound { .. })
    ));

    d.remove_staff(&root, &staff.id).unwrap();
    assert!(d.list_staff().unwrap().is_empty());
    assert_eq!(
        d.authenticate("sam@cmp.com", &pw("s"), Role::Staff),
        Err(CmpError::InvalidCredentials)
    );
    // Email is free again once the staff account is gone.
    d.add_staff(&root, "Sam Again", "sam@cmp.com", &pw("s2"))
        .unwrap();
}

#[test]
fn at_directory_db_04_writes_are_announced() {
    let (d, hub) = directory_over(Arc::new(MemoryStore::new()));
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    hub.subscribe(Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone())));

    let root = admin(&d);
    let staff = d.add_staff(&root, "Sam", "sam@cmp.com", &pw("s")).unwrap();
    d.remove_staff(&root, &staff.id).unwrap();
    let _ = d.register("Dup", "sam2@cmp.com", &pw(""), Role::User);

    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|e| e.entity == EntityKind::User));
    assert_eq!(seen[2].op, ChangeOp::Delete);
}

#[test]
fn at_directory_db_05_file_store_persists_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    {
        let (d, _) = directory_over(Arc::new(JsonFileStore::open(&path).unwrap()));
        assert_eq!(d.seed_defaults().unwrap(), 4);
    }
    let (d, _) = directory_over(Arc::new(JsonFileStore::open(&path).unwrap()));
    assert_eq!(d.seed_defaults().unwrap(), 0);
    let u = d
        .authenticate("user1@cmp.com", &pw("user123"), Role::User)
        .unwrap();
    assert_eq!(u.name, "Demo User");
}

#[test]
fn at_directory_db_06_failed_write_leaves_no_account() {
    let failing = Arc::new(FailingStore::wrap(Arc::new(MemoryStore::new())));
    let (d, _) = directory_over(failing.clone());
    failing.set_fail_writes(true);
    assert!(matches!(
        d.register("Jane", "jane@x.com", &pw("a"), Role::User),
        Err(CmpError::StorageUnavailable(_))
    ));
    failing.set_fail_writes(false);
    assert!(d.list_users().unwrap().is_empty());
    d.register("Jane", "jane@x.com", &pw("a"), Role::User)
        .unwrap();
}

#[test]
fn at_directory_db_07_file_handles_share_email_uniqueness() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let (a, _) = directory_over(Arc::new(JsonFileStore::open(&path).unwrap()));
    let (b, _) = directory_over(Arc::new(JsonFileStore::open(&path).unwrap()));

    let first = a
        .register("A", "same@x.com", &pw("a"), Role::User)
        .unwrap();
    assert_eq!(
        b.register("B", "same@x.com", &pw("b"), Role::User),
        Err(CmpError::DuplicateEmail)
    );
    b.register("Bee", "bee@x.com", &pw("b"), Role::User).unwrap();
    a.register("Ay", "ay@x.com", &pw("a"), Role::User).unwrap();

    let (reopened, _) = directory_over(Arc::new(JsonFileStore::open(&path).unwrap()));
    assert_eq!(reopened.list_users().unwrap().len(), 3);
    let owner = reopened
        .authenticate("same@x.com", &pw("a"), Role::User)
        .unwrap();
    assert_eq!(owner.id, first.id);
    assert!(reopened
        .authenticate("bee@x.com", &pw("b"), Role::User)
        .is_ok());
}

#[test]
fn at_directory_db_08_racing_file_handles_have_one_winner() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let stores: Vec<Arc<JsonFileStore>> = (0..4)
        .map(|_| Arc::new(JsonFileStore::open(&path).unwrap()))
        .collect();
    let directories: Vec<Directory> = stores
        .iter()
        .map(|s| directory_over(s.clone()).0)
        .collect();
    let results = Mutex::new(Vec::new());
    std::thread::scope(|s| {
        for (i, d) in directories.iter().enumerate() {
            let results = &results;
            s.spawn(move || {
                let r = d.register(&format!("Racer {i}"), "race@x.com", &pw("pw"), Role::User);
                results.lock().push(r);
            });
        }
    });
    let results = results.into_inner();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| r == &Err(CmpError::DuplicateEmail)));
    // Losers roll back their user documents.
    assert_eq!(stores[0].scan_prefix("users/").unwrap().len(), 1);
    assert_eq!(directories[3].list_users().unwrap().len(), 1);
}

#[test]
fn at_directory_db_09_failed_claim_release_still_removes_staff() {
    let failing = Arc::new(FailingStore::wrap(Arc::new(MemoryStore::new())));
    let (d, hub) = directory_over(failing.clone());
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    hub.subscribe(Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone())));

    let root = admin(&d);
    let staff = d.add_staff(&root, "Sam", "sam@cmp.com", &pw("s")).unwrap();

    // The user delete goes through, the claim release after it does not.
    failing.fail_after_writes(1);
    d.remove_staff(&root, &staff.id).unwrap();
    failing.set_fail_writes(false);

    assert!(d.list_staff().unwrap().is_empty());
    let last = seen.lock().last().cloned().unwrap();
    assert_eq!(last.op, ChangeOp::Delete);
    assert_eq!(
        d.authenticate("sam@cmp.com", &pw("s"), Role::Staff),
        Err(CmpError::InvalidCredentials)
    );
    // The leftover claim is stale and gives way to a new registration.
    let again = d
        .add_staff(&root, "Sam Again", "sam@cmp.com", &pw("s2"))
        .unwrap();
    assert_eq!(
        d.authenticate("sam@cmp.com", &pw("s2"), Role::Staff)
            .unwrap()
            .id,
        again.id
    );
}
