use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use super::{
    Account, CredentialStore, NewAccount, NewResetToken, NewUser, PasswordResetToken, StoreResult,
    StoreTx, User, UserChanges,
};

const USER_COLUMNS: &str = "id, name, email, username, image, role, created_at, updated_at";
const ACCOUNT_COLUMNS: &str =
    "id, user_id, name, password_hash, image, provider, provider_account_id, created_at, updated_at";
const TOKEN_COLUMNS: &str = "id, user_id, token, expires_at, created_at";

/// Postgres-backed store. Uniqueness is enforced by the schema's unique indexes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CredentialStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn purge_expired_reset_tokens(&self, now: OffsetDateTime) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn user_by_id(&mut self, id: Uuid) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn user_by_email(&mut self, email: &str) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn insert_user(&mut self, user: NewUser) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (name, email, username, image)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.username)
        .bind(&user.image)
        .fetch_one(&mut *self.tx)
        .await?;
        debug!(user_id = %user.id, "user inserted");
        Ok(user)
    }

    async fn update_user(&mut self, id: Uuid, changes: &UserChanges) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                image = CASE WHEN $3 THEN $4 ELSE image END,
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&changes.name)
        .bind(changes.image.is_some())
        .bind(changes.image.clone().flatten())
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn account_by_provider(
        &mut self,
        provider: &str,
        provider_account_id: &str,
    ) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE provider = $1 AND provider_account_id = $2"
        ))
        .bind(provider)
        .bind(provider_account_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn account_for_user(&mut self, user_id: Uuid, provider: &str) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = $1 AND provider = $2"
        ))
        .bind(user_id)
        .bind(provider)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn linked_account(
        &mut self,
        provider: &str,
        provider_account_id: &str,
        user_id: Uuid,
    ) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS} FROM accounts
            WHERE provider = $1 AND provider_account_id = $2 AND user_id = $3
            "#
        ))
        .bind(provider)
        .bind(provider_account_id)
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn insert_account(&mut self, account: NewAccount) -> StoreResult<Account> {
        let account = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO accounts (user_id, name, password_hash, image, provider, provider_account_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.user_id)
        .bind(&account.name)
        .bind(&account.password_hash)
        .bind(&account.image)
        .bind(&account.provider)
        .bind(&account.provider_account_id)
        .fetch_one(&mut *self.tx)
        .await?;
        debug!(account_id = %account.id, provider = %account.provider, "account inserted");
        Ok(account)
    }

    async fn set_account_password(&mut self, account_id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE accounts SET password_hash = $2, updated_at = now() WHERE id = $1",
        )
        .bind(account_id)
        .bind(password_hash)
        .execute(&mut *self.tx)
        .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn live_reset_token(
        &mut self,
        token: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<PasswordResetToken>> {
        let row = sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            SELECT {TOKEN_COLUMNS} FROM password_reset_tokens
            WHERE token = $1 AND expires_at > $2
            FOR UPDATE
            "#
        ))
        .bind(token)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn insert_reset_token(&mut self, token: NewResetToken) -> StoreResult<PasswordResetToken> {
        let row = sqlx::query_as::<_, PasswordResetToken>(&format!(
            r#"
            INSERT INTO password_reset_tokens (user_id, token, expires_at)
            VALUES ($1, $2, $3)
            RETURNING {TOKEN_COLUMNS}
            "#
        ))
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.expires_at)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn delete_reset_token(&mut self, id: Uuid) -> StoreResult<bool> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected() == 1)
    }

    async fn delete_reset_tokens_for_user(&mut self, user_id: Uuid) -> StoreResult<u64> {
        let res = sqlx::query("DELETE FROM password_reset_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(res.rows_affected())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
