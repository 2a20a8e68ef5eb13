#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use cmp_kernel_contracts::complaint::{
    ComplaintFields, ComplaintFilter, ComplaintStatus, HistoryStatus,
};
use cmp_kernel_contracts::directory::{Principal, Role, UserId};
use cmp_kernel_contracts::CmpError;
use cmp_storage::complaints::ComplaintRepository;
use cmp_storage::notify::{ChangeEvent, ChangeHub, EntityKind};
use cmp_storage::store::{EntityStore, JsonFileStore, MemoryStore};
use cmp_storage::testing::FailingStore;
use parking_lot::Mutex;

fn principal(id: &str, name: &str, role: Role) -> Principal {
    Principal {
        id: UserId::new(id).unwrap(),
        name: name.to_string(),
        role,
    }
}

fn fields(title: &str, category: &str) -> ComplaintFields {
    ComplaintFields {
        title: title.to_string(),
        description: "details".to_string(),
        category: category.to_string(),
        location: "Block A".to_string(),
        incident_date: NaiveDate::from_ymd_opt(2026, 3, 1),
    }
}

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

fn repo_over(store: Arc<dyn EntityStore>) -> (ComplaintRepository, Arc<ChangeHub>) {
    let hub = Arc::new(ChangeHub::new());
    (ComplaintRepository::new(store, hub.clone()), hub)
}

#[test]
fn at_complaints_db_01_create_seeds_pending_history() {
    let (r, _) = repo_over(Arc::new(MemoryStore::new()));
    let u = principal("u_alice001", "Alice", Role::User);
    let c = r.create(fields("Leak", "Water"), &u, at(2, 9)).unwrap();
    assert!(c.id.as_str().starts_with("c_"));
    assert_eq!(c.created_by_name, "Alice");
    assert_eq!(c.history.len(), 1);
    assert_eq!(c.history[0].status, HistoryStatus::Pending);
    assert_eq!(c.history[0].note.as_deref(), Some("Created"));
    assert!(c.remarks.is_empty());
}

#[test]
fn at_complaints_db_02_missing_field_creates_nothing() {
    let (r, hub) = repo_over(Arc::new(MemoryStore::new()));
    let calls = Arc::new(Mutex::new(0usize));
    let sink = calls.clone();
    hub.subscribe(Arc::new(move |_: &ChangeEvent| *sink.lock() += 1));
    let u = principal("u_alice001", "Alice", Role::User);
    let mut f = fields("Leak", "Water");
    f.location = "   ".to_string();
    assert!(matches!(
        r.create(f, &u, at(2, 9)),
        Err(CmpError::InvalidInput { .. })
    ));
    let mut f = fields("Leak", "Water");
    f.incident_date = None;
    assert!(matches!(
        r.create(f, &u, at(2, 9)),
        Err(CmpError::InvalidInput { .. })
    ));
    assert!(r.list_all(&ComplaintFilter::default()).unwrap().is_empty());
    assert_eq!(*calls.lock(), 0);
}

#[test]
fn at_complaints_db_03_listing_by_creator_assignee_and_filter() {
    let (r, _) = repo_over(Arc::new(MemoryStore::new()));
    let alice = principal("u_alice001", "Alice", Role::User);
    let bob = principal("u_bob00001", "Bob", Role::User);
    let admin = principal("u_admin001", "Admin", Role::Admin);
    let staff = principal("u_staff001", "Sam", Role::Staff);

    let a1 = r.create(fields("Leak", "Water"), &alice, at(1, 8)).unwrap();
    let a2 = r.create(fields("Outage", "Electric"), &alice, at(4, 8)).unwrap();
    let b1 = r.create(fields("Pothole", "Roads"), &bob, at(6, 8)).unwrap();

    let base = r.snapshot(&a2.id).unwrap();
    let mut assigned = a2.clone();
    assigned.record_assignment(
        &staff.id,
        &staff.name,
        &admin.id,
        at(5, 8),
        "Assigned to Sam".into(),
    );
    assert!(r.save(&base, &assigned).unwrap());

    let mine: Vec<_> = r.list_by_creator(&alice.id).unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(mine, vec![a2.id.clone(), a1.id.clone()]);
    let theirs: Vec<_> = r.list_by_assignee(&staff.id).unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(theirs, vec![a2.id.clone()]);

    let filter = ComplaintFilter {
        status: Some(ComplaintStatus::Pending),
        category_substring: Some("R".to_string()),
        created_after: NaiveDate::from_ymd_opt(2026, 3, 4),
        created_before: NaiveDate::from_ymd_opt(2026, 3, 6),
    };
    let hits: Vec<_> = r.list_all(&filter).unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(hits, vec![b1.id, a2.id]);
}

#[test]
fn at_complaints_db_04_save_announces_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.json");
    let alice = principal("u_alice001", "Alice", Role::User);
    let id = {
        let (r, hub) = repo_over(Arc::new(JsonFileStore::open(&path).unwrap()));
        let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        hub.subscribe(Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone())));

        let mut c = r.create(fields("Leak", "Water"), &alice, at(1, 8)).unwrap();
        let base = r.snapshot(&c.id).unwrap();
        c.record_remark(&alice, at(1, 9), "still dripping".to_string());
        assert!(r.save(&base, &c).unwrap());

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|e| e.entity == EntityKind::Complaint));
        c.id
    };
    let (r, _) = repo_over(Arc::new(JsonFileStore::open(&path).unwrap()));
    let back = r.get(&id).unwrap();
    assert_eq!(back.remarks.len(), 1);
    assert_eq!(back.remarks[0].author_name, "Alice");
}

#[test]
fn at_complaints_db_05_unavailable_store_keeps_last_good_record() {
    let failing = Arc::new(FailingStore::wrap(Arc::new(MemoryStore::new())));
    let (r, _) = repo_over(failing.clone());
    let alice = principal("u_alice001", "Alice", Role::User);
    let c = r.create(fields("Leak", "Water"), &alice, at(1, 8)).unwrap();

    let base = r.snapshot(&c.id).unwrap();
    failing.set_fail_writes(true);
    let mut next = c.clone();
    next.record_status(ComplaintStatus::InProgress, &alice.id, at(2, 8), None);
    assert!(matches!(r.save(&base, &next), Err(CmpError::StorageUnavailable(_))));
    assert!(matches!(
        r.create(fields("Other", "Water"), &alice, at(2, 8)),
        Err(CmpError::StorageUnavailable(_))
    ));

    let back = r.get(&c.id).unwrap();
    assert_eq!(back.status, ComplaintStatus::Pending);
    assert_eq!(back.history.len(), 1);
}
