#![forbid(unsafe_code)]

use std::sync::Arc;

use cmp_kernel_contracts::common::validate_text;
use cmp_kernel_contracts::complaint::{
    Complaint, ComplaintFields, ComplaintId, ComplaintStatus, MAX_TEXT_LEN, NOTE_CLOSED_BY_USER,
};
use cmp_kernel_contracts::directory::{Principal, Role, UserId};
use cmp_kernel_contracts::CmpError;
use cmp_storage::complaints::ComplaintRepository;
use cmp_storage::directory::Directory;
use cmp_storage::locks::KeyedLocks;

use crate::clock::Clock;

const MAX_SAVE_ATTEMPTS: usize = 8;

/// Role-gated transitions over complaints. Every mutation is one
/// read-modify-write of one complaint document under that complaint's lock.
#[derive(Debug)]
pub struct LifecycleEngine {
    repo: Arc<ComplaintRepository>,
    directory: Arc<Directory>,
    clock: Arc<dyn Clock>,
    locks: KeyedLocks,
}

/// Blank optional notes and remarks count as absent.
fn non_blank(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

fn log_outcome(
    op: &'static str,
    actor: &Principal,
    complaint_id: &ComplaintId,
    out: &Result<Complaint, CmpError>,
) {
    match out {
        Ok(c) => tracing::info!(
            op,
            complaint_id = %complaint_id,
            actor_id = %actor.id,
            status = %c.status,
            "complaint updated"
        ),
        Err(e) => tracing::debug!(
            op,
            complaint_id = %complaint_id,
            actor_id = %actor.id,
            error = %e,
            "complaint update rejected"
        ),
    }
}

impl LifecycleEngine {
    pub fn new(
        repo: Arc<ComplaintRepository>,
        directory: Arc<Directory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            directory,
            clock,
            locks: KeyedLocks::new(),
        }
    }

    /// Runs `change` against the freshly loaded complaint and stores the
    /// result. Nothing is written when `change` fails.
    ///
    /// The lock orders writers in this process. A writer elsewhere on the same
    /// store makes the conditional save refuse, and `change` reruns on the new record.
    fn mutate(
        &self,
        op: &'static str,
        actor: &Principal,
        id: &ComplaintId,
        mut change: impl FnMut(&mut Complaint) -> Result<(), CmpError>,
    ) -> Result<Complaint, CmpError> {
        let out = self.locks.with_lock(id.as_str(), || {
            for _ in 0..MAX_SAVE_ATTEMPTS {
                let base = self.repo.snapshot(id)?;
                let mut complaint = base.complaint.clone();
                change(&mut complaint)?;
                if self.repo.save(&base, &complaint)? {
                    return Ok(complaint);
                }
                tracing::debug!(op, complaint_id = %id, "complaint changed underneath, retrying");
            }
            Err(CmpError::StorageUnavailable(
                "complaint kept changing during update".to_string(),
            ))
        });
        log_outcome(op, actor, id, &out);
        out
    }

    pub fn submit(
        &self,
        creator: &Principal,
        fields: ComplaintFields,
    ) -> Result<Complaint, CmpError> {
        match creator.role {
            Role::User => {}
            Role::Admin | Role::Staff => {
                return Err(CmpError::forbidden("only users may submit complaints"));
            }
        }
        let complaint = self.repo.create(fields, creator, self.clock.now())?;
        tracing::info!(
            op = "submit",
            complaint_id = %complaint.id,
            actor_id = %creator.id,
            "complaint submitted"
        );
        Ok(complaint)
    }

    /// Points the complaint at a staff member. Status is left alone;
    /// reassignment and assigning a resolved complaint are both allowed.
    pub fn assign(
        &self,
        actor: &Principal,
        id: &ComplaintId,
        staff_id: &UserId,
        note: Option<&str>,
    ) -> Result<Complaint, CmpError> {
        match actor.role {
            Role::Admin => {}
            Role::Staff | Role::User => {
                return Err(CmpError::forbidden("only admin may assign complaints"));
            }
        }
        let note = non_blank(note);
        self.mutate("assign", actor, id, |c| {
            let staff = match self.directory.get(staff_id) {
                Ok(u) if u.role == Role::Staff => u,
                Ok(_) | Err(CmpError::NotFound { .. }) => {
                    return Err(CmpError::not_found("staff", staff_id.as_str()));
                }
                Err(e) => return Err(e),
            };
            let note = note
                .clone()
                .unwrap_or_else(|| format!("Assigned to {}", staff.name));
            c.record_assignment(&staff.id, &staff.name, &actor.id, self.clock.now(), note);
            Ok(())
        })
    }

    /// Admin override: any status to any other status.
    pub fn set_status(
        &self,
        actor: &Principal,
        id: &ComplaintId,
        next: ComplaintStatus,
        note: Option<&str>,
    ) -> Result<Complaint, CmpError> {
        match actor.role {
            Role::Admin => {}
            Role::Staff | Role::User => {
                return Err(CmpError::forbidden("only admin may set status"));
            }
        }
        let note = non_blank(note);
        self.mutate("set_status", actor, id, |c| {
            if c.status == next {
                return Err(CmpError::NoChange);
            }
            c.record_status(next, &actor.id, self.clock.now(), note.clone());
            Ok(())
        })
    }

    pub fn staff_advance(
        &self,
        actor: &Principal,
        id: &ComplaintId,
        next: ComplaintStatus,
    ) -> Result<Complaint, CmpError> {
        match actor.role {
            Role::Staff => {}
            Role::Admin | Role::User => {
                return Err(CmpError::forbidden("only staff may advance complaints"));
            }
        }
        match next {
            ComplaintStatus::InProgress | ComplaintStatus::Resolved => {}
            ComplaintStatus::Pending => {
                return Err(CmpError::InvalidInput {
                    field: "complaint.status",
                    reason: "staff may only move to In Progress or Resolved",
                });
            }
        }
        self.mutate("staff_advance", actor, id, |c| {
            if !c.is_assigned_to(&actor.id) {
                return Err(CmpError::forbidden("complaint is not assigned to actor"));
            }
            if c.status == ComplaintStatus::Resolved {
                return Err(CmpError::AlreadyResolved);
            }
            if c.status == next {
                return Err(CmpError::NoChange);
            }
            let note = format!("Updated by {}", actor.name);
            c.record_status(next, &actor.id, self.clock.now(), Some(note));
            Ok(())
        })
    }

    /// Creator marks the complaint resolved; a non-blank remark rides along
    /// in the same write.
    pub fn user_close(
        &self,
        actor: &Principal,
        id: &ComplaintId,
        remark: Option<&str>,
    ) -> Result<Complaint, CmpError> {
        match actor.role {
            Role::User => {}
            Role::Admin | Role::Staff => {
                return Err(CmpError::forbidden("only the creating user may close"));
            }
        }
        let remark = non_blank(remark);
        if let Some(text) = &remark {
            validate_text("remark.text", text, MAX_TEXT_LEN)?;
        }
        self.mutate("user_close", actor, id, |c| {
            if c.created_by != actor.id {
                return Err(CmpError::forbidden("only the creating user may close"));
            }
            if c.status == ComplaintStatus::Resolved {
                return Err(CmpError::AlreadyResolved);
            }
            let closed_at = c.record_status(
                ComplaintStatus::Resolved,
                &actor.id,
                self.clock.now(),
                Some(NOTE_CLOSED_BY_USER.to_string()),
            );
            if let Some(text) = &remark {
                c.record_remark(actor, closed_at, text.clone());
            }
            Ok(())
        })
    }

    /// Appends a remark. Status and history are never touched.
    pub fn add_remark(
        &self,
        actor: &Principal,
        id: &ComplaintId,
        text: &str,
    ) -> Result<Complaint, CmpError> {
        validate_text("remark.text", text, MAX_TEXT_LEN)?;
        let text = text.trim().to_string();
        self.mutate("add_remark", actor, id, |c| {
            match actor.role {
                Role::User if c.created_by != actor.id => {
                    return Err(CmpError::forbidden(
                        "users may only remark on their own complaints",
                    ));
                }
                Role::Admin | Role::Staff | Role::User => {}
            }
            c.record_remark(actor, self.clock.now(), text.clone());
            Ok(())
        })
    }
}
