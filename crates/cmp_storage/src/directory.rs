#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use cmp_kernel_contracts::common::validate_text;
use cmp_kernel_contracts::directory::{
    normalize_email, validate_email, PasswordCredential, Principal, Role, User, UserId,
};
use cmp_kernel_contracts::CmpError;
use serde::{Deserialize, Serialize};

use crate::credential::CredentialScheme;
use crate::ids::{new_user_id, MAX_ID_ATTEMPTS};
use crate::locks::KeyedLocks;
use crate::notify::{ChangeEvent, ChangeHub, ChangeOp, EntityKind};
use crate::store::{
    decode, encode, Document, EntityStore, StorageError, StoreKey, USERS_PREFIX,
    USER_EMAILS_PREFIX,
};

/// Accounts created on first run of an empty store.
pub const DEFAULT_ACCOUNTS: &[(&str, &str, &str, Role)] = &[
    ("Admin", "admin@cmp.com", "admin123", Role::Admin),
    ("Staff One", "staff1@cmp.com", "staff123", Role::Staff),
    ("Staff Two", "staff2@cmp.com", "staff123", Role::Staff),
    ("Demo User", "user1@cmp.com", "user123", Role::User),
];

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmailClaim {
    user_id: UserId,
}

/// User registry: identity, role, email uniqueness and authentication lookup.
#[derive(Debug)]
pub struct Directory {
    store: Arc<dyn EntityStore>,
    hub: Arc<ChangeHub>,
    scheme: Arc<dyn CredentialScheme>,
    email_locks: KeyedLocks,
}

impl Directory {
    pub fn new(
        store: Arc<dyn EntityStore>,
        hub: Arc<ChangeHub>,
        scheme: Arc<dyn CredentialScheme>,
    ) -> Self {
        Self {
            store,
            hub,
            scheme,
            email_locks: KeyedLocks::new(),
        }
    }

    pub fn register(
        &self,
        name: &str,
        email: &str,
        credential: &PasswordCredential,
        role: Role,
    ) -> Result<User, CmpError> {
        validate_text("user.name", name, 128)?;
        let email = normalize_email(email);
        validate_email("user.email", &email)?;
        if credential.is_blank() {
            return Err(CmpError::InvalidInput {
                field: "user.credential",
                reason: "must not be empty",
            });
        }
        self.email_locks.with_lock(&email, || {
            self.register_locked(name, &email, credential, role)
        })
    }

    fn register_locked(
        &self,
        name: &str,
        email: &str,
        credential: &PasswordCredential,
        role: Role,
    ) -> Result<User, CmpError> {
        let user = self.allocate_user(name, email, credential, role)?;
        let user_key = StoreKey::user(&user.id);
        let claim = encode(&EmailClaim {
            user_id: user.id.clone(),
        })?;

        // The user document lands before its claim, so a claim whose user is missing is stale.
        self.store.put(&user_key, encode(&user)?)?;
        if let Err(e) = self.claim_email(email, claim) {
            if let Err(rollback) = self.store.delete(&user_key) {
                tracing::warn!(email, error = %rollback, "unclaimed user rollback failed");
            }
            return Err(e);
        }
        self.hub.publish(ChangeEvent {
            entity: EntityKind::User,
            key: user_key,
            op: ChangeOp::Put,
        });
        tracing::info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    /// Takes the uniqueness claim for `email`, replacing a stale one.
    /// Every step is conditional, so handles on a shared store agree on one winner.
    fn claim_email(&self, email: &str, claim: Document) -> Result<(), CmpError> {
        let claim_key = StoreKey::user_email(email);
        if self.store.put_if_absent(&claim_key, claim.clone())? {
            return Ok(());
        }
        let current = self.store.get(&claim_key)?;
        if let Some(doc) = &current {
            let holder: EmailClaim = decode(doc.clone())?;
            if self.store.get(&StoreKey::user(&holder.user_id))?.is_some() {
                tracing::debug!(email, "registration rejected: duplicate email");
                return Err(CmpError::DuplicateEmail);
            }
            tracing::warn!(email, "replacing stale email claim");
        }
        if self
            .store
            .compare_and_swap(&claim_key, current.as_ref(), Some(claim))?
        {
            return Ok(());
        }
        tracing::debug!(email, "registration lost the email claim race");
        Err(CmpError::DuplicateEmail)
    }

    /// Drops the claim on `owner.email` if it still points at `owner`.
    fn release_claim(&self, owner: &User) -> Result<(), StorageError> {
        let claim_key = StoreKey::user_email(&owner.email);
        let Some(current) = self.store.get(&claim_key)? else {
            return Ok(());
        };
        if decode::<EmailClaim>(current.clone())?.user_id == owner.id {
            self.store
                .compare_and_swap(&claim_key, Some(&current), None)?;
        }
        Ok(())
    }

    fn allocate_user(
        &self,
        name: &str,
        email: &str,
        credential: &PasswordCredential,
        role: Role,
    ) -> Result<User, CmpError> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = new_user_id()?;
            if self.store.get(&StoreKey::user(&id))?.is_none() {
                return Ok(User::v1(
                    id,
                    name,
                    email,
                    self.scheme.seal(credential),
                    role,
                )?);
            }
        }
        Err(StorageError::Unavailable("user id allocation exhausted".to_string()).into())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let Some(doc) = self.store.get(&StoreKey::user_email(email))? else {
            return Ok(None);
        };
        let claim: EmailClaim = decode(doc)?;
        let user = self.load_user(&claim.user_id)?;
        Ok(user.filter(|u| u.email == email))
    }

    fn load_user(&self, id: &UserId) -> Result<Option<User>, StorageError> {
        self.store
            .get(&StoreKey::user(id))?
            .map(decode::<User>)
            .transpose()
    }

    /// Role is part of the match: the right password under the wrong role is rejected.
    pub fn authenticate(
        &self,
        email: &str,
        credential: &PasswordCredential,
        expected_role: Role,
    ) -> Result<User, CmpError> {
        let email = normalize_email(email);
        let Some(user) = self.find_by_email(&email)? else {
            return Err(CmpError::InvalidCredentials);
        };
        if user.role != expected_role || !self.scheme.verify(credential, &user.credential) {
            tracing::debug!(email = %email, "authentication rejected");
            return Err(CmpError::InvalidCredentials);
        }
        Ok(user)
    }

    pub fn add_staff(
        &self,
        actor: &Principal,
        name: &str,
        email: &str,
        credential: &PasswordCredential,
    ) -> Result<User, CmpError> {
        match actor.role {
            Role::Admin => {}
            Role::Staff | Role::User => {
                return Err(CmpError::forbidden("only admin may add staff"));
            }
        }
        self.register(name, email, credential, Role::Staff)
    }

    pub fn remove_staff(&self, actor: &Principal, staff_id: &UserId) -> Result<(), CmpError> {
        match actor.role {
            Role::Admin => {}
            Role::Staff | Role::User => {
                return Err(CmpError::forbidden("only admin may remove staff"));
            }
        }
        let staff = match self.load_user(staff_id)? {
            Some(u) if u.role == Role::Staff => u,
            _ => return Err(CmpError::not_found("staff", staff_id.as_str())),
        };
        self.email_locks.with_lock(&staff.email, || -> Result<(), CmpError> {
            let user_key = StoreKey::user(&staff.id);
            self.store.delete(&user_key)?;
            // The account is gone either way; a claim left behind is stale and
            // gets replaced by the next registration of this email.
            if let Err(e) = self.release_claim(&staff) {
                tracing::warn!(staff_id = %staff.id, error = %e, "email claim release failed");
            }
            self.hub.publish(ChangeEvent {
                entity: EntityKind::User,
                key: user_key,
                op: ChangeOp::Delete,
            });
            tracing::info!(staff_id = %staff.id, actor_id = %actor.id, "staff removed");
            Ok(())
        })
    }

    pub fn get(&self, id: &UserId) -> Result<User, CmpError> {
        self.load_user(id)?
            .ok_or_else(|| CmpError::not_found("user", id.as_str()))
    }

    pub fn list_users(&self) -> Result<Vec<User>, CmpError> {
        let mut users = self
            .store
            .scan_prefix(USERS_PREFIX)?
            .into_iter()
            .map(|(_, doc)| decode::<User>(doc))
            .collect::<Result<Vec<_>, _>>()?;
        // Users are scanned before claims, so a registration finishing in between is
        // at worst left out. A user without its claim never finished registering.
        let claimed = self
            .store
            .scan_prefix(USER_EMAILS_PREFIX)?
            .into_iter()
            .map(|(_, doc)| decode::<EmailClaim>(doc).map(|c| c.user_id))
            .collect::<Result<HashSet<_>, _>>()?;
        users.retain(|u| claimed.contains(&u.id));
        users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    pub fn list_staff(&self) -> Result<Vec<User>, CmpError> {
        let mut users = self.list_users()?;
        users.retain(|u| u.role == Role::Staff);
        Ok(users)
    }

    /// Creates [`DEFAULT_ACCOUNTS`] when the registry is empty. Returns how many were created.
    pub fn seed_defaults(&self) -> Result<usize, CmpError> {
        if !self.store.scan_prefix(USERS_PREFIX)?.is_empty() {
            return Ok(0);
        }
        let mut created = 0;
        for (name, email, password, role) in DEFAULT_ACCOUNTS {
            match self.register(name, email, &PasswordCredential::new(*password), *role) {
                Ok(_) => created += 1,
                Err(CmpError::DuplicateEmail) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::info!(created, "default accounts seeded");
        Ok(created)
    }
}
