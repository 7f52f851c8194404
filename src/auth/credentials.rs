//! Email + password sign-up and sign-in.

use std::sync::Arc;

use axum::extract::FromRef;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::password::PasswordHashing,
    error::AuthError,
    state::AppState,
    store::{CredentialStore, NewAccount, NewUser, StoreError, User, CREDENTIALS_PROVIDER},
};

/// Identity resolved by a successful credential check, not yet bound to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
}

impl From<User> for Principal {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            name: user.name,
            email: user.email,
            image: user.image,
        }
    }
}

#[derive(Clone)]
pub struct CredentialAuthenticator {
    store: Arc<dyn CredentialStore>,
    passwords: Arc<PasswordHashing>,
}

impl FromRef<AppState> for CredentialAuthenticator {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.store.clone(), state.passwords.clone())
    }
}

fn signup_conflict(e: StoreError) -> AuthError {
    match e {
        StoreError::Conflict(constraint) => {
            warn!(%constraint, "signup lost unique-key race");
            AuthError::EmailTaken
        }
        other => other.into(),
    }
}

impl CredentialAuthenticator {
    pub fn new(store: Arc<dyn CredentialStore>, passwords: Arc<PasswordHashing>) -> Self {
        Self { store, passwords }
    }

    /// Succeeds iff a credentials account exists for `email` and its hash verifies.
    /// Both failure causes yield the same `InvalidCredentials`.
    #[instrument(skip(self, password))]
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let mut tx = self.store.begin().await?;

        let Some(account) = tx.account_by_provider(CREDENTIALS_PROVIDER, email).await? else {
            warn!("sign-in for unknown credentials account");
            return Err(AuthError::InvalidCredentials);
        };

        let verified = account
            .password_hash
            .as_deref()
            .is_some_and(|hash| self.passwords.verify(password, hash));
        if !verified {
            warn!(user_id = %account.user_id, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let Some(user) = tx.user_by_id(account.user_id).await? else {
            error!(account_id = %account.id, user_id = %account.user_id, "account points at missing user");
            return Err(AuthError::InvalidCredentials);
        };

        info!(user_id = %user.id, "credentials verified");
        Ok(Principal::from(user))
    }

    /// Creates the user and its credentials account together, or neither.
    #[instrument(skip(self, password))]
    pub async fn register_credentials(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<User, AuthError> {
        let mut tx = self.store.begin().await?;

        if tx.user_by_email(email).await?.is_some() {
            warn!("signup with registered email");
            return Err(AuthError::EmailTaken);
        }

        let hash = self.passwords.hash(password)?;

        let user = tx
            .insert_user(NewUser {
                name: name.to_string(),
                email: email.to_string(),
                username: None,
                image: None,
            })
            .await
            .map_err(signup_conflict)?;

        tx.insert_account(NewAccount {
            user_id: user.id,
            name: name.to_string(),
            password_hash: Some(hash),
            image: None,
            provider: CREDENTIALS_PROVIDER.to_string(),
            provider_account_id: email.to_string(),
        })
        .await
        .map_err(signup_conflict)?;

        tx.commit().await.map_err(signup_conflict)?;

        info!(user_id = %user.id, "user registered");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::fast_hashing;
    use crate::store::{FailPoint, MemoryStore};

    fn authenticator() -> (CredentialAuthenticator, MemoryStore) {
        let store = MemoryStore::new();
        let auth = CredentialAuthenticator::new(Arc::new(store.clone()), Arc::new(fast_hashing()));
        (auth, store)
    }

    #[tokio::test]
    async fn register_creates_one_user_and_one_credentials_account() {
        let (auth, store) = authenticator();
        let user = auth
            .register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap();

        assert_eq!(store.user_count().await, 1);
        let accounts = store.accounts_of(user.id).await;
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].provider, CREDENTIALS_PROVIDER);
        assert_eq!(accounts[0].provider_account_id, "ada@example.com");
        let hash = accounts[0].password_hash.as_deref().unwrap();
        assert_ne!(hash, "Str0ng!pass");
    }

    #[tokio::test]
    async fn register_rejects_taken_email() {
        let (auth, store) = authenticator();
        auth.register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap();
        let err = auth
            .register_credentials("Other", "ada@example.com", "0ther!Pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_signups_create_exactly_one_user() {
        let (auth, store) = authenticator();
        let a = auth.clone();
        let b = auth.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.register_credentials("A", "race@example.com", "Str0ng!pass").await }),
            tokio::spawn(async move { b.register_credentials("B", "race@example.com", "Str0ng!pass").await }),
        );
        let results = [ra.unwrap(), rb.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let taken = results
            .iter()
            .filter(|r| matches!(r, Err(AuthError::EmailTaken)))
            .count();
        assert_eq!((ok, taken), (1, 1));
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn failed_account_insert_rolls_back_user() {
        let (auth, store) = authenticator();
        store.fail_next(FailPoint::InsertAccount);
        let err = auth
            .register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Unexpected(_)));
        assert_eq!(store.user_count().await, 0);

        // the email is still free afterwards
        auth.register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn authenticate_returns_principal() {
        let (auth, _) = authenticator();
        let user = auth
            .register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap();
        let principal = auth.authenticate("ada@example.com", "Str0ng!pass").await.unwrap();
        assert_eq!(principal.user_id, user.id);
        assert_eq!(principal.name, "Ada");
        assert_eq!(principal.email, "ada@example.com");
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_fail_identically() {
        let (auth, _) = authenticator();
        auth.register_credentials("Ada", "ada@example.com", "Str0ng!pass")
            .await
            .unwrap();

        let unknown = auth.authenticate("nobody@example.com", "Str0ng!pass").await.unwrap_err();
        let wrong = auth.authenticate("ada@example.com", "Wr0ng!pass").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(unknown.status(), wrong.status());
    }

    #[tokio::test]
    async fn oauth_only_user_cannot_sign_in_with_password() {
        let (auth, store) = authenticator();
        let mut tx = store.begin().await.unwrap();
        let user = tx
            .insert_user(NewUser {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                username: Some("ada".into()),
                image: None,
            })
            .await
            .unwrap();
        tx.insert_account(NewAccount {
            user_id: user.id,
            name: "Ada".into(),
            password_hash: None,
            image: None,
            provider: "github".into(),
            provider_account_id: "gh-1".into(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let err = auth.authenticate("ada@example.com", "anything").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}
