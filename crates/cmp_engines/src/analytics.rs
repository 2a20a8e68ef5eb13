#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use cmp_kernel_contracts::complaint::{Complaint, ComplaintFilter, ComplaintId, ComplaintStatus};
use cmp_kernel_contracts::directory::UserId;
use cmp_kernel_contracts::CmpError;
use cmp_storage::complaints::ComplaintRepository;
use serde::Serialize;

pub const UNSPECIFIED_CATEGORY: &str = "Unspecified";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub resolved: usize,
    pub total: usize,
}

impl StatusCounts {
    fn tally<'a>(complaints: impl IntoIterator<Item = &'a Complaint>) -> Self {
        let mut out = Self::default();
        for c in complaints {
            match c.status {
                ComplaintStatus::Pending => out.pending += 1,
                ComplaintStatus::InProgress => out.in_progress += 1,
                ComplaintStatus::Resolved => out.resolved += 1,
            }
            out.total += 1;
        }
        out
    }
}

/// Read-only views over the complaint set. No locks are taken.
#[derive(Debug)]
pub struct QueryView {
    repo: Arc<ComplaintRepository>,
}

impl QueryView {
    pub fn new(repo: Arc<ComplaintRepository>) -> Self {
        Self { repo }
    }

    pub fn get(&self, id: &ComplaintId) -> Result<Complaint, CmpError> {
        self.repo.get(id)
    }

    pub fn counts_by_status(&self) -> Result<StatusCounts, CmpError> {
        let all = self.repo.list_all(&ComplaintFilter::default())?;
        Ok(StatusCounts::tally(&all))
    }

    pub fn counts_by_category(&self) -> Result<BTreeMap<String, usize>, CmpError> {
        let mut out = BTreeMap::new();
        for c in self.repo.list_all(&ComplaintFilter::default())? {
            let key = match c.category.trim() {
                "" => UNSPECIFIED_CATEGORY.to_string(),
                category => category.to_string(),
            };
            *out.entry(key).or_insert(0) += 1;
        }
        Ok(out)
    }

    pub fn list_all(&self, filter: &ComplaintFilter) -> Result<Vec<Complaint>, CmpError> {
        self.repo.list_all(filter)
    }

    pub fn list_for_creator(&self, user_id: &UserId) -> Result<Vec<Complaint>, CmpError> {
        self.repo.list_by_creator(user_id)
    }

    pub fn list_for_assignee(&self, user_id: &UserId) -> Result<Vec<Complaint>, CmpError> {
        self.repo.list_by_assignee(user_id)
    }

    /// Case-insensitive substring over title, category, location and description.
    pub fn search_for_creator(
        &self,
        user_id: &UserId,
        query: &str,
    ) -> Result<Vec<Complaint>, CmpError> {
        let needle = query.trim().to_lowercase();
        let mut mine = self.repo.list_by_creator(user_id)?;
        if needle.is_empty() {
            return Ok(mine);
        }
        mine.retain(|c| {
            [&c.title, &c.category, &c.location, &c.description]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
        });
        Ok(mine)
    }
}
