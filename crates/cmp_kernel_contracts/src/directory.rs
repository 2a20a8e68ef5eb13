#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::{validate_prefixed_id, validate_text};
use crate::{ContractViolation, SchemaVersion, Validate};

pub const DIRECTORY_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

pub const USER_ID_PREFIX: &str = "u_";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for UserId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_prefixed_id("user_id", &self.0, USER_ID_PREFIX)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::User => "user",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "staff" => Some(Role::Staff),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret presented by a caller at registration or login.
///
/// Never persisted as-is; a credential scheme seals it into a [`StoredCredential`].
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordCredential(String);

impl PasswordCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PasswordCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordCredential(<redacted>)")
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoredCredential(String);

impl StoredCredential {
    pub fn new(sealed: impl Into<String>) -> Self {
        Self(sealed.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for StoredCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoredCredential(<redacted>)")
    }
}

/// Lower-cases and trims an email so lookups and the uniqueness index agree.
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub schema_version: SchemaVersion,
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub credential: StoredCredential,
    pub role: Role,
}

impl User {
    pub fn v1(
        id: UserId,
        name: impl Into<String>,
        email: &str,
        credential: StoredCredential,
        role: Role,
    ) -> Result<Self, ContractViolation> {
        let u = Self {
            schema_version: DIRECTORY_CONTRACT_VERSION,
            id,
            name: name.into().trim().to_string(),
            email: normalize_email(email),
            credential,
            role,
        };
        u.validate()?;
        Ok(u)
    }

    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }
}

impl Validate for User {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.schema_version != DIRECTORY_CONTRACT_VERSION {
            return Err(ContractViolation::InvalidValue {
                field: "user.schema_version",
                reason: "must match DIRECTORY_CONTRACT_VERSION",
            });
        }
        self.id.validate()?;
        validate_text("user.name", &self.name, 128)?;
        validate_email("user.email", &self.email)?;
        if self.credential.as_str().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "user.credential",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}

pub fn validate_email(field: &'static str, email: &str) -> Result<(), ContractViolation> {
    validate_text(field, email, 254)?;
    if email.chars().any(char::is_whitespace) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain whitespace",
        });
    }
    Ok(())
}

/// Authenticated actor threaded through every directory and lifecycle call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}
