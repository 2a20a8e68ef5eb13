#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cmp_kernel_contracts::complaint::{Complaint, ComplaintFields, ComplaintFilter, ComplaintId};
use cmp_kernel_contracts::directory::{Principal, UserId};
use cmp_kernel_contracts::{CmpError, Validate};

use crate::ids::{new_complaint_id, MAX_ID_ATTEMPTS};
use crate::notify::{ChangeEvent, ChangeHub, ChangeOp, EntityKind};
use crate::store::{
    decode, encode, Document, EntityStore, StorageError, StoreKey, COMPLAINTS_PREFIX,
};

/// A complaint plus the stored document it was decoded from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub complaint: Complaint,
    stored: Document,
}

/// CRUD and listing over complaint documents. Performs no authorization: the
/// lifecycle rules live in `cmp_engines`, and `ComplaintPortal` is the supported
/// way to change a complaint.
#[derive(Debug)]
pub struct ComplaintRepository {
    store: Arc<dyn EntityStore>,
    hub: Arc<ChangeHub>,
}

impl ComplaintRepository {
    pub fn new(store: Arc<dyn EntityStore>, hub: Arc<ChangeHub>) -> Self {
        Self { store, hub }
    }

    pub fn create(
        &self,
        fields: ComplaintFields,
        creator: &Principal,
        now: DateTime<Utc>,
    ) -> Result<Complaint, CmpError> {
        fields.validate()?;
        for _ in 0..MAX_ID_ATTEMPTS {
            let complaint = Complaint::v1(new_complaint_id()?, fields.clone(), creator, now)?;
            let key = StoreKey::complaint(&complaint.id);
            if self.store.put_if_absent(&key, encode(&complaint)?)? {
                self.publish(key);
                return Ok(complaint);
            }
        }
        Err(StorageError::Unavailable("complaint id allocation exhausted".to_string()).into())
    }

    pub fn get(&self, id: &ComplaintId) -> Result<Complaint, CmpError> {
        Ok(self.snapshot(id)?.complaint)
    }

    pub fn snapshot(&self, id: &ComplaintId) -> Result<Snapshot, CmpError> {
        let Some(stored) = self.store.get(&StoreKey::complaint(id))? else {
            return Err(CmpError::not_found("complaint", id.as_str()));
        };
        Ok(Snapshot {
            complaint: decode::<Complaint>(stored.clone())?,
            stored,
        })
    }

    /// Replaces the record read as `base` with `next`.
    ///
    /// `next` must validate and keep `base`'s history and remarks as a prefix.
    /// Returns `Ok(false)` without writing when the stored record is no longer
    /// the one `base` was read from.
    pub fn save(&self, base: &Snapshot, next: &Complaint) -> Result<bool, CmpError> {
        next.validate()?;
        if next.id != base.complaint.id {
            return Err(CmpError::InvalidInput {
                field: "complaint.id",
                reason: "must match the record being replaced",
            });
        }
        if !next.history.starts_with(&base.complaint.history)
            || !next.remarks.starts_with(&base.complaint.remarks)
        {
            return Err(CmpError::InvalidInput {
                field: "complaint.history",
                reason: "history and remarks are append-only",
            });
        }
        let key = StoreKey::complaint(&next.id);
        if !self
            .store
            .compare_and_swap(&key, Some(&base.stored), Some(encode(next)?))?
        {
            tracing::debug!(key = %key, "complaint changed since it was read");
            return Ok(false);
        }
        self.publish(key);
        Ok(true)
    }

    pub fn list_all(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, CmpError> {
        self.scan(|c| filter.matches(c))
    }

    pub fn list_by_creator(&self, user_id: &UserId) -> Result<Vec<Complaint>, CmpError> {
        self.scan(|c| &c.created_by == user_id)
    }

    pub fn list_by_assignee(&self, user_id: &UserId) -> Result<Vec<Complaint>, CmpError> {
        self.scan(|c| c.is_assigned_to(user_id))
    }

    /// Newest first, ties broken by id.
    fn scan(&self, keep: impl Fn(&Complaint) -> bool) -> Result<Vec<Complaint>, CmpError> {
        let mut out = Vec::new();
        for (_, doc) in self.store.scan_prefix(COMPLAINTS_PREFIX)? {
            let c = decode::<Complaint>(doc)?;
            if keep(&c) {
                out.push(c);
            }
        }
        out.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    fn publish(&self, key: StoreKey) {
        tracing::debug!(key = %key, "complaint written");
        self.hub.publish(ChangeEvent {
            entity: EntityKind::Complaint,
            key,
            op: ChangeOp::Put,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::{NaiveDate, TimeZone};
    use cmp_kernel_contracts::complaint::ComplaintStatus;
    use cmp_kernel_contracts::directory::Role;

    fn repo() -> ComplaintRepository {
        ComplaintRepository::new(Arc::new(MemoryStore::new()), Arc::new(ChangeHub::new()))
    }

    fn creator(id: &str) -> Principal {
        Principal {
            id: UserId::new(id).unwrap(),
            name: "Demo User".to_string(),
            role: Role::User,
        }
    }

    fn fields(category: &str) -> ComplaintFields {
        ComplaintFields {
            title: "Streetlight out".to_string(),
            description: "Dark at night".to_string(),
            category: category.to_string(),
            location: "Elm Rd".to_string(),
            incident_date: NaiveDate::from_ymd_opt(2026, 1, 5),
        }
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn at_complaints_01_create_then_get() {
        let r = repo();
        let c = r
            .create(fields("Electric"), &creator("u_user0001"), day(5))
            .unwrap();
        let back = r.get(&c.id).unwrap();
        assert_eq!(back, c);
        assert_eq!(back.status, ComplaintStatus::Pending);
    }

    #[test]
    fn at_complaints_02_unknown_id_is_not_found() {
        let r = repo();
        let id = ComplaintId::new("c_missing").unwrap();
        assert_eq!(
            r.get(&id),
            Err(CmpError::not_found("complaint", "c_missing"))
        );
    }

    #[test]
    fn at_complaints_03_lists_are_newest_first() {
        let r = repo();
        let u = creator("u_user0001");
        let a = r.create(fields("Water"), &u, day(1)).unwrap();
        let b = r.create(fields("Water"), &u, day(3)).unwrap();
        let c = r.create(fields("Water"), &u, day(2)).unwrap();
        let ids: Vec<_> = r
            .list_by_creator(&u.id)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![b.id, c.id, a.id]);
    }

    #[test]
    fn at_complaints_04_save_refuses_inconsistent_record() {
        let r = repo();
        let mut c = r
            .create(fields("Water"), &creator("u_user0001"), day(1))
            .unwrap();
        let base = r.snapshot(&c.id).unwrap();
        c.status = ComplaintStatus::Resolved;
        assert!(matches!(
            r.save(&base, &c),
            Err(CmpError::InvalidInput {
                field: "complaint.status",
                ..
            })
        ));
        assert_eq!(r.get(&c.id).unwrap().status, ComplaintStatus::Pending);
    }

    #[test]
    fn at_complaints_05_save_refuses_rewritten_history() {
        let r = repo();
        let u = creator("u_user0001");
        let c = r.create(fields("Water"), &u, day(1)).unwrap();
        let base = r.snapshot(&c.id).unwrap();
        let mut next = c.clone();
        next.record_status(ComplaintStatus::Resolved, &u.id, day(2), None);
        assert!(r.save(&base, &next).unwrap());

        // Going back to the shorter history would erase an entry.
        let base = r.snapshot(&c.id).unwrap();
        assert!(matches!(
            r.save(&base, &c),
            Err(CmpError::InvalidInput {
                field: "complaint.history",
                ..
            })
        ));
        assert_eq!(r.get(&c.id).unwrap().history.len(), 2);
    }

    #[test]
    fn at_complaints_06_save_from_stale_read_writes_nothing() {
        let r = repo();
        let u = creator("u_user0001");
        let c = r.create(fields("Water"), &u, day(1)).unwrap();
        let first = r.snapshot(&c.id).unwrap();
        let second = r.snapshot(&c.id).unwrap();

        let mut a = first.complaint.clone();
        a.record_remark(&u, day(2), "from a".into());
        assert!(r.save(&first, &a).unwrap());

        let mut b = second.complaint.clone();
        b.record_remark(&u, day(2), "from b".into());
        assert!(!r.save(&second, &b).unwrap());
        let back = r.get(&c.id).unwrap();
        assert_eq!(back.remarks.len(), 1);
        assert_eq!(back.remarks[0].text, "from a");
    }
}
