//! Credential store: users, their linked accounts and password reset tokens.
//!
//! Every operation runs inside a [`StoreTx`]. A transaction that is dropped
//! without [`StoreTx::commit`] is rolled back, so multi-entity writes either
//! persist together or not at all.

mod memory;
mod postgres;
mod repo_types;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;
pub use repo_types::*;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key (email, username, provider account, token) already exists.
    #[error("unique constraint violated: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            // 23505 = unique_violation
            if db.code().as_deref() == Some("23505") {
                return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
            }
        }
        StoreError::Database(e)
    }
}

/// Handle to the credential store, constructed once at startup and shared.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Open a transaction.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Physically remove reset tokens whose expiry is at or before `now`.
    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> StoreResult<u64>;
}

/// Repository operations over one transaction.
#[async_trait]
pub trait StoreTx: Send {
    async fn user_by_id(&mut self, id: Uuid) -> StoreResult<Option<User>>;

    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>>;

    /// Fails with [`StoreError::Conflict`] on a duplicate email or username.
    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User>;

    /// Applies only the fields set in `changes` and bumps `updated_at`.
    async fn update_user(&mut self, id: Uuid, changes: &UserChanges) -> StoreResult<Option<User>>;

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> StoreResult<Option<Account>>;

    async fn account_for_user(&mut self, user_id: Uuid, provider: &str) -> StoreResult<Option<Account>>;

    async fn linked_account(
        &mut self,
        provider: &str,
        provider_account_id: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<Account>>;

    /// Fails with [`StoreError::Conflict`] on a duplicate (provider, provider_account_id)
    /// or a second account of the same provider for one user.
    async fn insert_account(&mut self, account: NewAccount) -> StoreResult<Account>;

    /// Returns false when no such account exists.
    async fn set_account_password(&mut self, account_id: Uuid, password_hash: &str) -> StoreResult<bool>;

    /// Token by value, only if it has not expired at `now`. The row stays locked
    /// until the transaction ends, so a concurrent consumer sees it gone.
    async fn live_reset_token(
        &mut self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<PasswordResetToken>>;

    async fn insert_reset_token(&mut self, token: NewResetToken) -> StoreResult<PasswordResetToken>;

    async fn delete_reset_token(&mut self, id: Uuid) -> StoreResult<bool>;

    async fn delete_reset_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
