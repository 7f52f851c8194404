//! Links OAuth identities to users.

use std::sync::Arc;

use axum::extract::FromRef;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::{
    error::AuthError,
    state::AppState,
    store::{CredentialStore, NewAccount, NewUser, StoreError, User, UserChanges},
};

/// Profile as supplied by the OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OAuthProfile {
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub username: String,
}

impl OAuthProfile {
    /// GitHub exposes a login handle; other providers fall back to the display name.
    pub fn from_provider_claims(
        provider: &str,
        name: String,
        email: String,
        image: Option<String>,
        login: Option<String>,
    ) -> Self {
        let username = match login {
            Some(login) if provider.eq_ignore_ascii_case("github") => login,
            _ => name.to_lowercase(),
        };
        Self {
            name,
            email,
            image,
            username,
        }
    }
}

/// Lower-cased, transliterated, `-`-separated, trimmed.
pub fn normalize_username(raw: &str) -> String {
    slug::slugify(raw.trim())
}

/// Fields of `user` that differ from `profile`.
fn profile_changes(user: &User, profile: &OAuthProfile) -> UserChanges {
    UserChanges {
        name: (user.name != profile.name).then(|| profile.name.clone()),
        image: (user.image != profile.image).then(|| profile.image.clone()),
    }
}

fn link_conflict(e: StoreError) -> AuthError {
    match e {
        StoreError::Conflict(constraint) => {
            warn!(%constraint, "oauth link collides with another user");
            AuthError::AccountConflict
        }
        other => other.into(),
    }
}

#[derive(Clone)]
pub struct OAuthLinker {
    store: Arc<dyn CredentialStore>,
}

impl FromRef<AppState> for OAuthLinker {
    fn from_ref(state: &AppState) -> Self {
        Self::new(state.store.clone())
    }
}

impl OAuthLinker {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Find-or-create the user by email, sync name/image, and link the provider
    /// account, all in one transaction. Repeating a successful call is a no-op.
    #[instrument(skip(self, profile), fields(email = %profile.email))]
    pub async fn link_oauth_identity(
        &self,
        provider: &str,
        provider_account_id: &str,
        profile: &OAuthProfile,
    ) -> Result<User, AuthError> {
        let mut tx = self.store.begin().await?;

        let user = match tx.user_by_email(&profile.email).await? {
            None => {
                let username = normalize_username(&profile.username);
                if username.is_empty() {
                    return Err(AuthError::field("username", "Username is required"));
                }
                let user = tx
                    .insert_user(NewUser {
                        name: profile.name.clone(),
                        email: profile.email.clone(),
                        username: Some(username),
                        image: profile.image.clone(),
                    })
                    .await
                    .map_err(link_conflict)?;
                info!(user_id = %user.id, "user created from oauth profile");
                user
            }
            Some(existing) => {
                let changes = profile_changes(&existing, profile);
                if changes.is_empty() {
                    existing
                } else {
                    debug!(user_id = %existing.id, ?changes, "syncing profile fields");
                    tx.update_user(existing.id, &changes)
                        .await?
                        .ok_or(AuthError::NotFound("User"))?
                }
            }
        };

        if tx
            .linked_account(provider, provider_account_id, user.id)
            .await?
            .is_none()
        {
            tx.insert_account(NewAccount {
                user_id: user.id,
                name: profile.name.clone(),
                password_hash: None,
                image: profile.image.clone(),
                provider: provider.to_string(),
                provider_account_id: provider_account_id.to_string(),
            })
            .await
            .map_err(link_conflict)?;
            info!(user_id = %user.id, %provider, "oauth account linked");
        }

        tx.commit().await.map_err(link_conflict)?;
        Ok(user)
    }
}
