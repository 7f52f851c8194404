use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{oauth::OAuthProfile, session::Session, validation::Checks};
use crate::{error::AuthError, store::User};

/// Request body for credentials sign-up.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
}

impl SignUpRequest {
    pub fn validate(&mut self) -> Result<(), AuthError> {
        self.name = self.name.trim().to_string();
        self.email = self.email.trim().to_string();
        let mut checks = Checks::new();
        checks.require("name", &self.name, "Name is required");
        checks.email("email", &self.email);
        checks.strong_password("password", &self.password);
        checks.matches("confirm_password", &self.confirm_password, &self.password);
        checks.finish()
    }
}

/// Request body for credentials sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

impl SignInRequest {
    pub fn validate(&mut self) -> Result<(), AuthError> {
        self.email = self.email.trim().to_string();
        let mut checks = Checks::new();
        checks.email("email", &self.email);
        checks.min_len("password", &self.password);
        checks.finish()
    }
}

/// Request body sent after a provider callback.
#[derive(Debug, Deserialize)]
pub struct OAuthSignInRequest {
    pub provider: String,
    #[serde(alias = "providerAccountId")]
    pub provider_account_id: String,
    pub user: OAuthProfile,
}

impl OAuthSignInRequest {
    pub fn validate(&mut self) -> Result<(), AuthError> {
        self.user.email = self.user.email.trim().to_string();
        let mut checks = Checks::new();
        checks.require("provider", &self.provider, "Provider is required");
        checks.require(
            "provider_account_id",
            &self.provider_account_id,
            "Provider account id is required",
        );
        checks.require("user.name", &self.user.name, "Name is required");
        checks.email("user.email", &self.user.email);
        checks.require("user.username", &self.user.username, "Username is required");
        checks.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct OAuthSessionRequest {
    pub provider: String,
    #[serde(alias = "providerAccountId")]
    pub provider_account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

impl ForgotPasswordRequest {
    pub fn validate(&mut self) -> Result<(), AuthError> {
        self.email = self.email.trim().to_string();
        let mut checks = Checks::new();
        checks.email("email", &self.email);
        checks.finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
    #[serde(alias = "confirmPassword")]
    pub confirm_password: String,
}

impl ResetPasswordRequest {
    pub fn validate(&self) -> Result<(), AuthError> {
        let mut checks = Checks::new();
        checks.require("token", &self.token, "Reset token is required");
        checks.strong_password("password", &self.password);
        checks.matches("confirm_password", &self.confirm_password, &self.password);
        checks.finish()
    }
}

/// Request body for token refresh.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub username: Option<String>,
    pub image: Option<String>,
}

impl From<User> for PublicUser {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            name: u.name,
            email: u.email,
            username: u.username,
            image: u.image,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignUpResponse {
    pub user: PublicUser,
    /// Absent when the follow-up sign-in failed; the account exists regardless.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}
