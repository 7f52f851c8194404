//! Password reset token lifecycle.

use std::{sync::Arc, time::Duration};

use axum::extract::FromRef;
use rand::{rngs::OsRng, RngCore};
use time::{Duration as TimeDuration, OffsetDateTime};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::password::PasswordHashing,
    error::AuthError,
    mail::{dispatch_with_timeout, ResetMailer},
    state::AppState,
    store::{CredentialStore, NewResetToken, CREDENTIALS_PROVIDER},
};

const TOKEN_BYTES: usize = 32;

/// 256 random bits, hex encoded (64 chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct ResetSettings {
    pub token_ttl: TimeDuration,
    pub dispatch_timeout: Duration,
    pub app_url: String,
}

impl ResetSettings {
    pub fn reset_link(&self, token: &str) -> String {
        format!("{}/reset-password/{}", self.app_url.trim_end_matches('/'), token)
    }
}

/// Result of a reset request, for logging only. Callers must not reveal it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueOutcome {
    /// `None` when no user owns the email, otherwise whether delivery succeeded.
    pub email_sent: Option<bool>,
}

#[derive(Clone)]
pub struct ResetTokenIssuer {
    store: Arc<dyn CredentialStore>,
    passwords: Arc<PasswordHashing>,
    mailer: Arc<dyn ResetMailer>,
    settings: ResetSettings,
}

impl FromRef<AppState> for ResetTokenIssuer {
    fn from_ref(state: &AppState) -> Self {
        let settings = ResetSettings {
            token_ttl: TimeDuration::minutes(state.config.reset.token_ttl_minutes),
            dispatch_timeout: Duration::from_secs(state.config.email.dispatch_timeout_secs),
            app_url: state.config.reset.app_url.clone(),
        };
        Self::new(
            state.store.clone(),
            state.passwords.clone(),
            state.mailer.clone(),
            settings,
        )
    }
}

impl ResetTokenIssuer {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        passwords: Arc<PasswordHashing>,
        mailer: Arc<dyn ResetMailer>,
        settings: ResetSettings,
    ) -> Self {
        Self {
            store,
            passwords,
            mailer,
            settings,
        }
    }

    /// Replaces any outstanding token for the user owning `email` and mails the
    /// new link. Succeeds whether or not the email is registered.
    #[instrument(skip(self))]
    pub async fn issue_reset_token(&self, email: &str) -> Result<IssueOutcome, AuthError> {
        let mut tx = self.store.begin().await?;

        let Some(user) = tx.user_by_email(email).await? else {
            info!("reset requested for unknown email");
            return Ok(IssueOutcome { email_sent: None });
        };

        let superseded = tx.delete_reset_tokens_for_user(user.id).await?;
        let token = generate_token();
        let expires_at = OffsetDateTime::now_utc() + self.settings.token_ttl;
        tx.insert_reset_token(NewResetToken {
            user_id: user.id,
            token: token.clone(),
            expires_at,
        })
        .await?;
        tx.commit().await?;
        info!(user_id = %user.id, superseded, %expires_at, "reset token issued");

        let link = self.settings.reset_link(&token);
        let email_sent = dispatch_with_timeout(
            self.mailer.as_ref(),
            &user.email,
            &link,
            self.settings.dispatch_timeout,
        )
        .await;
        if !email_sent {
            warn!(user_id = %user.id, "reset email not delivered; token stays valid");
        }
        Ok(IssueOutcome {
            email_sent: Some(email_sent),
        })
    }

    /// Sets a new password through a live token and burns the token. Nothing is
    /// written unless every step succeeds, so a failed attempt can be retried.
    #[instrument(skip_all)]
    pub async fn consume_reset_token(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        let mut tx = self.store.begin().await?;
        let now = OffsetDateTime::now_utc();

        let Some(reset) = tx.live_reset_token(token, now).await? else {
            warn!("unknown, used or expired reset token");
            return Err(AuthError::InvalidOrExpiredToken);
        };

        let Some(account) = tx.account_for_user(reset.user_id, CREDENTIALS_PROVIDER).await? else {
            warn!(user_id = %reset.user_id, "reset for user without credentials account");
            return Err(AuthError::NoCredentialsAccount);
        };

        if let Some(current) = account.password_hash.as_deref() {
            if self.passwords.verify(new_password, current) {
                return Err(AuthError::SamePassword);
            }
        }

        let hash = self.passwords.hash(new_password)?;
        if !tx.set_account_password(account.id, &hash).await? {
            return Err(AuthError::NoCredentialsAccount);
        }
        if !tx.delete_reset_token(reset.id).await? {
            warn!(user_id = %reset.user_id, "reset token consumed concurrently");
            return Err(AuthError::InvalidOrExpiredToken);
        }
        tx.commit().await?;

        info!(user_id = %reset.user_id, "password reset");
        Ok(())
    }
}

/// Periodically deletes expired reset tokens. Runs until the runtime shuts down.
pub fn spawn_purge_task(store: Arc<dyn CredentialStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("reset token purge started (interval={every:?})");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.purge_expired_reset_tokens(OffsetDateTime::now_utc()).await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "expired reset tokens purged"),
                Err(e) => error!(error = %e, "reset token purge failed"),
            }
        }
    })
}
