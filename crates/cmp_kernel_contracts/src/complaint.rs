#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{validate_opt_text, validate_prefixed_id, validate_text};
use crate::directory::{Principal, UserId};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const COMPLAINT_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const COMPLAINT_ID_PREFIX: &str = "c_";

pub const NOTE_CREATED: &str = "Created";
pub const NOTE_CLOSED_BY_USER: &str = "Closed by user";

const MAX_TITLE_LEN: usize = 200;
const MAX_LABEL_LEN: usize = 128;
pub const MAX_TEXT_LEN: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComplaintId(String);

impl ComplaintId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ComplaintId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_prefixed_id("complaint_id", &self.0, COMPLAINT_ID_PREFIX)
    }
}

impl fmt::Display for ComplaintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComplaintStatus {
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
}

impl ComplaintStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ComplaintStatus::Pending => "Pending",
            ComplaintStatus::InProgress => "In Progress",
            ComplaintStatus::Resolved => "Resolved",
        }
    }

    /// Accepts the display form as well as compact spellings (`in_progress`, `inprogress`).
    pub fn parse(raw: &str) -> Option<Self> {
        let folded: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .collect::<String>()
            .to_ascii_lowercase();
        match folded.as_str() {
            "pending" => Some(ComplaintStatus::Pending),
            "inprogress" => Some(ComplaintStatus::InProgress),
            "resolved" => Some(ComplaintStatus::Resolved),
            _ => None,
        }
    }
}

impl fmt::Display for ComplaintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Status recorded on a history entry. `Assigned` marks an assignment and carries no status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryStatus {
    Pending,
    #[serde(rename = "In Progress")]
    InProgress,
    Resolved,
    Assigned,
}

impl HistoryStatus {
    pub fn complaint_status(self) -> Option<ComplaintStatus> {
        match self {
            HistoryStatus::Pending => Some(ComplaintStatus::Pending),
            HistoryStatus::InProgress => Some(ComplaintStatus::InProgress),
            HistoryStatus::Resolved => Some(ComplaintStatus::Resolved),
            HistoryStatus::Assigned => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self.complaint_status() {
            Some(s) => s.as_str(),
            None => "Assigned",
        }
    }
}

impl From<ComplaintStatus> for HistoryStatus {
    fn from(s: ComplaintStatus) -> Self {
        match s {
            ComplaintStatus::Pending => HistoryStatus::Pending,
            ComplaintStatus::InProgress => HistoryStatus::InProgress,
            ComplaintStatus::Resolved => HistoryStatus::Resolved,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: HistoryStatus,
    pub acting_user_id: UserId,
    pub occurred_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl Validate for HistoryEntry {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.acting_user_id.validate()?;
        validate_opt_text("history_entry.note", &self.note, MAX_TEXT_LEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remark {
    pub occurred_at: DateTime<Utc>,
    pub text: String,
    pub author_id: UserId,
    pub author_name: String,
}

impl Validate for Remark {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("remark.text", &self.text, MAX_TEXT_LEN)?;
        self.author_id.validate()?;
        validate_text("remark.author_name", &self.author_name, 128)
    }
}

/// Caller-supplied fields of a new complaint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintFields {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub incident_date: Option<NaiveDate>,
}

impl Validate for ComplaintFields {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_text("complaint.title", &self.title, MAX_TITLE_LEN)?;
        validate_text("complaint.description", &self.description, MAX_TEXT_LEN)?;
        validate_text("complaint.category", &self.category, MAX_LABEL_LEN)?;
        validate_text("complaint.location", &self.location, MAX_LABEL_LEN)?;
        if self.incident_date.is_none() {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.incident_date",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Complaint {
    pub schema_version: SchemaVersion,
    pub id: ComplaintId,
    pub title: String,
    pub description: String,
    pub category: String,
    pub location: String,
    pub created_by: UserId,
    pub created_by_name: String,
    pub created_at: DateTime<Utc>,
    pub incident_date: NaiveDate,
    pub status: ComplaintStatus,
    pub assigned_to: Option<UserId>,
    pub assigned_to_name: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub remarks: Vec<Remark>,
}

impl Complaint {
    /// Builds a `Pending` complaint whose history holds the creation entry.
    pub fn v1(
        id: ComplaintId,
        fields: ComplaintFields,
        creator: &Principal,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ContractViolation> {
        fields.validate()?;
        let Some(incident_date) = fields.incident_date else {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.incident_date",
                reason: "must not be empty",
            });
        };
        let c = Self {
            schema_version: COMPLAINT_CONTRACT_VERSION,
            id,
            title: fields.title.trim().to_string(),
            description: fields.description.trim().to_string(),
            category: fields.category.trim().to_string(),
            location: fields.location.trim().to_string(),
            created_by: creator.id.clone(),
            created_by_name: creator.name.clone(),
            created_at,
            incident_date,
            status: ComplaintStatus::Pending,
            assigned_to: None,
            assigned_to_name: None,
            history: vec![HistoryEntry {
                status: HistoryStatus::Pending,
                acting_user_id: creator.id.clone(),
                occurred_at: created_at,
                note: Some(NOTE_CREATED.to_string()),
            }],
            remarks: Vec::new(),
        };
        c.validate()?;
        Ok(c)
    }

    /// Last history entry that carries a status; assignment markers are skipped.
    pub fn last_status_entry(&self) -> Option<&HistoryEntry> {
        self.history
            .iter()
            .rev()
            .find(|h| h.status.complaint_status().is_some())
    }

    pub fn is_assigned_to(&self, user_id: &UserId) -> bool {
        self.assigned_to.as_ref() == Some(user_id)
    }

    fn next_occurred_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.history.last() {
            Some(last) if last.occurred_at > now => last.occurred_at,
            _ => now,
        }
    }

    /// Returns the timestamp the entry was recorded with.
    pub fn record_status(
        &mut self,
        next: ComplaintStatus,
        actor: &UserId,
        now: DateTime<Utc>,
        note: Option<String>,
    ) -> DateTime<Utc> {
        let occurred_at = self.next_occurred_at(now);
        self.status = next;
        self.history.push(HistoryEntry {
            status: next.into(),
            acting_user_id: actor.clone(),
            occurred_at,
            note,
        });
        occurred_at
    }

    pub fn record_assignment(
        &mut self,
        staff_id: &UserId,
        staff_name: &str,
        actor: &UserId,
        now: DateTime<Utc>,
        note: String,
    ) {
        let occurred_at = self.next_occurred_at(now);
        self.assigned_to = Some(staff_id.clone());
        self.assigned_to_name = Some(staff_name.to_string());
        self.history.push(HistoryEntry {
            status: HistoryStatus::Assigned,
            acting_user_id: actor.clone(),
            occurred_at,
            note: Some(note),
        });
    }

    /// Remarks are clamped like history: never earlier than the previous remark.
    pub fn record_remark(&mut self, author: &Principal, now: DateTime<Utc>, text: String) {
        let occurred_at = match self.remarks.last() {
            Some(last) if last.occurred_at > now => last.occurred_at,
            _ => now,
        };
        self.remarks.push(Remark {
            occurred_at,
            text,
            author_id: author.id.clone(),
            author_name: author.name.clone(),
        });
    }
}

impl Validate for Complaint {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != COMPLAINT_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.schema_version",
                reason: "must match COMPLAINT_CONTRACT_VERSION",
            });
        }
        self.id.validate()?;
        validate_text("complaint.title", &self.title, MAX_TITLE_LEN)?;
        validate_text("complaint.description", &self.description, MAX_TEXT_LEN)?;
        validate_text("complaint.category", &self.category, MAX_LABEL_LEN)?;
        validate_text("complaint.location", &self.location, MAX_LABEL_LEN)?;
        self.created_by.validate()?;
        validate_text("complaint.created_by_name", &self.created_by_name, 128)?;

        match (&self.assigned_to, &self.assigned_to_name) {
            (Some(id), Some(name)) => {
                id.validate()?;
                validate_text("complaint.assigned_to_name", name, 128)?;
                if !self
                    .history
                    .iter()
                    .any(|h| h.status == HistoryStatus::Assigned)
                {
                    return Err(ContractViolation::InvalidValue {
                        field: "complaint.assigned_to",
                        reason: "requires an Assigned history entry",
                    });
                }
            }
            (None, None) => {}
            _ => {
                return Err(ContractViolation::InvalidValue {
                    field: "complaint.assigned_to_name",
                    reason: "must be present exactly when assigned_to is present",
                });
            }
        }

        let Some(first) = self.history.first() else {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.history",
                reason: "must not be empty",
            });
        };
        if first.status != HistoryStatus::Pending {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.history",
                reason: "must start with the Pending creation entry",
            });
        }
        for entry in &self.history {
            entry.validate()?;
        }
        if self
            .history
            .windows(2)
            .any(|w| w[1].occurred_at < w[0].occurred_at)
        {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.history",
                reason: "must be ordered by occurred_at",
            });
        }
        let last_status = self
            .last_status_entry()
            .and_then(|h| h.status.complaint_status());
        if last_status != Some(self.status) {
            return Err(ContractViolation::InvalidValue {
                field: "complaint.status",
                reason: "must match the last status entry in history",
            });
        }
        for remark in &self.remarks {
            remark.validate()?;
        }
        Ok(())
    }
}

/// Conjunctive listing filter. Date bounds are inclusive UTC calendar days.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComplaintFilter {
    pub status: Option<ComplaintStatus>,
    pub category_substring: Option<String>,
    pub created_after: Option<NaiveDate>,
    pub created_before: Option<NaiveDate>,
}

impl ComplaintFilter {
    pub fn matches(&self, c: &Complaint) -> bool {
        if let Some(status) = self.status {
            if c.status != status {
                return false;
            }
        }
        if let Some(needle) = &self.category_substring {
            let needle = needle.trim().to_lowercase();
            if !needle.is_empty() && !c.category.to_lowercase().contains(&needle) {
                return false;
            }
        }
        let created_day = c.created_at.date_naive();
        if let Some(after) = self.created_after {
            if created_day < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if created_day > before {
                return false;
            }
        }
        true
    }
}
