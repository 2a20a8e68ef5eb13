#![forbid(unsafe_code)]

use thiserror::Error;

use crate::ContractViolation;

/// Caller-facing failure of a directory, repository or lifecycle operation.
///
/// Every variant is recoverable; nothing here is retried internally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CmpError {
    #[error("invalid input for {field}: {reason}")]
    InvalidInput {
        field: &'static str,
        reason: &'static str,
    },
    #[error("email already registered")]
    DuplicateEmail,
    #[error("invalid credentials / role")]
    InvalidCredentials,
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {reason}")]
    Forbidden { reason: &'static str },
    #[error("status unchanged")]
    NoChange,
    #[error("complaint already resolved")]
    AlreadyResolved,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl CmpError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        CmpError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn forbidden(reason: &'static str) -> Self {
        CmpError::Forbidden { reason }
    }
}

impl From<ContractViolation> for CmpError {
    fn from(v: ContractViolation) -> Self {
        match v {
            ContractViolation::InvalidValue { field, reason } => {
                CmpError::InvalidInput { field, reason }
            }
        }
    }
}
