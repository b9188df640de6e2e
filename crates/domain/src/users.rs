use std::sync::Arc;

use common::UserId;
use storage::{CacheAsideStore, EntityKind, NewUser, RecordStore, User, UserProfile};
use tracing::info;

use crate::error::{CommerceError, Result};

/// Lowercases and trims an email address, rejecting obviously malformed ones.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(CommerceError::validation("email", "must be a valid address")),
    }
}

pub struct UserDirectory<S: RecordStore> {
    store: Arc<CacheAsideStore<S>>,
}

impl<S: RecordStore> UserDirectory<S> {
    pub fn new(store: Arc<CacheAsideStore<S>>) -> Self {
        Self { store }
    }

    /// Registers a user. The email is normalised and must be unique.
    #[tracing::instrument(skip(self, user), fields(email = %user.email))]
    pub async fn register(&self, user: NewUser) -> Result<UserProfile> {
        let email = normalize_email(&user.email)?;
        if user.password_hash.is_empty() {
            return Err(CommerceError::validation("password_hash", "must not be empty"));
        }

        let mut uow = self.store.begin().await?;
        let user = uow.insert_user(NewUser { email, ..user }).await?;
        uow.commit().await?;
        info!(user_id = %user.id, "User registered");
        Ok(user.into())
    }

    pub async fn user(&self, id: UserId) -> Result<UserProfile> {
        self.store
            .user(id)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::User, id))
    }

    pub async fn user_by_email(&self, email: &str) -> Result<UserProfile> {
        let email = normalize_email(email)?;
        self.store
            .user_by_email(&email)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::User, &email))
    }

    /// The full user record, password hash included. Always read from the store.
    pub async fn credentials(&self, email: &str) -> Result<User> {
        let email = normalize_email(email)?;
        self.store
            .credentials(&email)
            .await?
            .ok_or_else(|| CommerceError::not_found(EntityKind::User, &email))
    }
}
