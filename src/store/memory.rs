//! In-process store used by tests and `memory://` development runs.
//!
//! Transactions are serialized: `begin` takes the table lock and works on a
//! copy, `commit` swaps the copy in. Dropping the transaction discards it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    Account, CredentialStore, NewAccount, NewResetToken, NewUser, PasswordResetToken, Role,
    StoreError, StoreResult, StoreTx, User, UserChanges,
};

/// Operation that fails once when armed with [`MemoryStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AccountByProvider,
    InsertUser,
    InsertAccount,
    SetAccountPassword,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    accounts: HashMap<Uuid, Account>,
    reset_tokens: HashMap<Uuid, PasswordResetToken>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<AsyncMutex<Tables>>,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `point` fail with [`StoreError::Unavailable`].
    pub fn fail_next(&self, point: FailPoint) {
        *self.fail_point.lock().unwrap_or_else(PoisonError::into_inner) = Some(point);
    }

    pub async fn user_count(&self) -> usize {
        self.tables.lock().await.users.len()
    }

    pub async fn accounts_of(&self, user_id: Uuid) -> Vec<Account> {
        let tables = self.tables.lock().await;
        let mut accounts: Vec<Account> = tables
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.provider.cmp(&b.provider));
        accounts
    }

    pub async fn reset_tokens_of(&self, user_id: Uuid) -> Vec<PasswordResetToken> {
        let tables = self.tables.lock().await;
        tables
            .reset_tokens
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            work,
            fail_point: self.fail_point.clone(),
        }))
    }

    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.reset_tokens.len();
        tables.reset_tokens.retain(|_, t| t.is_live(now));
        Ok((before - tables.reset_tokens.len()) as u64)
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    work: Tables,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

impl MemoryTx {
    fn check(&self, point: FailPoint) -> StoreResult<()> {
        let mut armed = self.fail_point.lock().unwrap_or_else(PoisonError::into_inner);
        if *armed == Some(point) {
            *armed = None;
            return Err(StoreError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn user_by_id(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.work.users.get(&id).cloned())
    }

    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        Ok(self.work.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        self.check(FailPoint::InsertUser)?;
        if self.work.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("users_email_key".into()));
        }
        if let Some(username) = &user.username {
            if self.work.users.values().any(|u| u.username.as_ref() == Some(username)) {
                return Err(StoreError::Conflict("users_username_key".into()));
            }
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            username: user.username,
            image: user.image,
            role: Role::User,
            created_at: now,
            updated_at: now,
        };
        self.work.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn update_user(&mut self, id: Uuid, changes: &UserChanges) -> StoreResult<Option<User>> {
        let Some(user) = self.work.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(name) = &changes.name {
            user.name = name.clone();
        }
        if let Some(image) = &changes.image {
            user.image = image.clone();
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(Some(user.clone()))
    }

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> StoreResult<Option<Account>> {
        self.check(FailPoint::AccountByProvider)?;
        Ok(self
            .work
            .accounts
            .values()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
            .cloned())
    }

    async fn account_for_user(&mut self, user_id: Uuid, provider: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .work
            .accounts
            .values()
            .find(|a| a.user_id == user_id && a.provider == provider)
            .cloned())
    }

    async fn linked_account(
        &mut self,
        provider: &str,
        provider_account_id: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .account_by_provider(provider, provider_account_id)
            .await?
            .filter(|a| a.user_id == user_id))
    }

    async fn insert_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        self.check(FailPoint::InsertAccount)?;
        let taken = self.work.accounts.values().any(|a| {
            (a.provider == account.provider && a.provider_account_id == account.provider_account_id)
                || (a.user_id == account.user_id && a.provider == account.provider)
        });
        if taken {
            return Err(StoreError::Conflict("accounts_provider_key".into()));
        }
        let now = OffsetDateTime::now_utc();
        let account = Account {
            id: Uuid::new_v4(),
            user_id: account.user_id,
            name: account.name,
            password_hash: account.password_hash,
            image: account.image,
            provider: account.provider,
            provider_account_id: account.provider_account_id,
            created_at: now,
            updated_at: now,
        };
        self.work.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn set_account_password(&mut self, account_id: Uuid, password_hash: &str) -> StoreResult<bool> {
        self.check(FailPoint::SetAccountPassword)?;
        let Some(account) = self.work.accounts.get_mut(&account_id) else {
            return Ok(false);
        };
        account.password_hash = Some(password_hash.to_string());
        account.updated_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn live_reset_token(
        &mut self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<PasswordResetToken>> {
        Ok(self
            .work
            .reset_tokens
            .values()
            .find(|t| t.token == token && t.is_live(now))
            .cloned())
    }

    async fn insert_reset_token(&mut self, token: NewResetToken) -> StoreResult<PasswordResetToken> {
        if self.work.reset_tokens.values().any(|t| t.token == token.token) {
            return Err(StoreError::Conflict("password_reset_tokens_token_key".into()));
        }
        let row = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: token.user_id,
            token: token.token,
            expires_at: token.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        self.work.reset_tokens.insert(row.id, row.clone());
        Ok(row)
    }

    async fn delete_reset_token(&mut self, id: Uuid) -> StoreResult<bool> {
        Ok(self.work.reset_tokens.remove(&id).is_some())
    }

    async fn delete_reset_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64> {
        let before = self.work.reset_tokens.len();
        self.work.reset_tokens.retain(|_, t| t.user_id != user_id);
        Ok((before - self.work.reset_tokens.len()) as u64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTx { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}
