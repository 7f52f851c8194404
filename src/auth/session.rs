//! Session subject resolution and session issuance.
//!
//! The subject embedded in a session is always the owning user id found
//! through the account linkage, never the provider's own profile id.

use std::sync::Arc;

use axum::extract::FromRef;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::jwt::JwtKeys,
    error::AuthError,
    state::AppState,
    store::{CredentialStore, User, CREDENTIALS_PROVIDER},
};

/// How the principal signed in.
#[derive(Debug, Clone, Copy)]
pub enum SignInMethod<'a> {
    Credentials { email: &'a str },
    OAuth {
        provider: &'a str,
        provider_account_id: &'a str,
    },
}

impl SignInMethod<'_> {
    fn account_key(&self) -> (&str, &str) {
        match *self {
            SignInMethod::Credentials { email } => (CREDENTIALS_PROVIDER, email),
            SignInMethod::OAuth {
                provider,
                provider_account_id,
            } => (provider, provider_account_id),
        }
    }
}

/// User as exposed inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
}

impl From<User> for SessionUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            image: user.image,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    pub user: SessionUser,
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn CredentialStore>,
    keys: JwtKeys,
}

impl FromRef<AppState> for SessionResolver {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.store.clone(), JwtKeys::from_ref(state))
    }
}

impl SessionResolver {
    pub fn new(store: Arc<dyn CredentialStore>, keys: JwtKeys) -> Self {
        Self { store, keys }
    }

    /// Owning user id of the matching account, or `None` to stay anonymous.
    #[instrument(skip(self))]
    pub async fn resolve_subject(&self, method: SignInMethod<'_>) -> Result<Option<Uuid>, AuthError> {
        let (provider, provider_account_id) = method.account_key();
        let mut tx = self.store.begin().await?;
        let subject = tx
            .account_by_provider(provider, provider_account_id)
            .await?
            .map(|account| account.user_id);
        if subject.is_none() {
            warn!(%provider, "no account for sign-in; session stays anonymous");
        }
        Ok(subject)
    }

    pub async fn current_user(&self, subject: Uuid) -> Result<User, AuthError> {
        let mut tx = self.store.begin().await?;
        tx.user_by_id(subject).await?.ok_or_else(|| {
            warn!(user_id = %subject, "session subject no longer exists");
            AuthError::Unauthorized("Session user not found")
        })
    }

    /// Signs a fresh access/refresh pair for `subject` and propagates the
    /// stored user into the visible session.
    #[instrument(skip(self))]
    pub async fn establish(&self, subject: Uuid) -> Result<Session, AuthError> {
        let user = self.current_user(subject).await?;
        let (access_token, expires_at) = self.keys.sign_access(user.id)?;
        let (refresh_token, _) = self.keys.sign_refresh(user.id)?;
        info!(user_id = %user.id, "session established");
        Ok(Session {
            access_token,
            refresh_token,
            expires_at,
            user: SessionUser::from(user),
        })
    }

    /// Resolve-then-establish. `Ok(None)` when no account matches.
    pub async fn sign_in(&self, method: SignInMethod<'_>) -> Result<Option<Session>, AuthError> {
        match self.resolve_subject(method).await? {
            Some(subject) => self.establish(subject).await.map(Some),
            None => Ok(None),
        }
    }

    /// Exchanges a refresh token for a new session carrying the same subject.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AuthError> {
        let claims = self.keys.verify_refresh(refresh_token).map_err(|e| {
            warn!(error = %e, "refresh rejected");
            AuthError::Unauthorized("Invalid or expired session")
        })?;
        self.establish(claims.sub).await
    }
}
