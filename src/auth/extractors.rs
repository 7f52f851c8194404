use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::warn;
use uuid::Uuid;

use super::jwt::{JwtKeys, TokenKind};
use crate::{error::AuthError, state::AppState};

fn bearer(parts: &Parts) -> Result<&str, AuthError> {
    let auth = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::Unauthorized("Missing Authorization header"))?;

    auth.strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))
        .ok_or(AuthError::Unauthorized("Invalid Authorization header"))
}

/// Session subject taken from a valid `Authorization: Bearer <access token>`.
pub struct AuthUser(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = bearer(parts)?;

        let claims = keys.verify(token).map_err(|_| {
            warn!("invalid or expired session token");
            AuthError::Unauthorized("Invalid or expired session")
        })?;

        if claims.kind != TokenKind::Access {
            return Err(AuthError::Unauthorized("Access token required"));
        }

        Ok(AuthUser(claims.sub))
    }
}

/// Configured OAuth callback secret, `None` when OAuth sign-in is disabled.
#[derive(Clone)]
pub struct CallbackSecret(Option<Arc<str>>);

impl FromRef<AppState> for CallbackSecret {
    fn from_ref(state: &AppState) -> Self {
        CallbackSecret(state.config.oauth.callback_secret.as_deref().map(Arc::from))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Marks a request as coming from the trusted OAuth front end, which has
/// already completed the provider handshake. It presents the shared callback
/// secret as a bearer token.
pub struct OAuthCallback;

#[async_trait]
impl<S> FromRequestParts<S> for OAuthCallback
where
    S: Send + Sync,
    CallbackSecret: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CallbackSecret(expected) = CallbackSecret::from_ref(state);
        let Some(expected) = expected else {
            warn!("oauth callback rejected: no callback secret configured");
            return Err(AuthError::Unauthorized("OAuth sign-in is not enabled"));
        };

        let presented = bearer(parts)?;
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            warn!("oauth callback rejected: bad callback secret");
            return Err(AuthError::Unauthorized("Invalid OAuth callback credentials"));
        }
        Ok(OAuthCallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
    }
}
