//! Error taxonomy of the credential core and its HTTP rendering.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Field name -> messages, rendered as `error.details`.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation failed")]
    Validation { details: FieldErrors },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Email already registered")]
    EmailTaken,

    /// Username or provider account already held by another user.
    #[error("Account conflicts with an existing user")]
    AccountConflict,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredToken,

    #[error("No credentials account found for this user")]
    NoCredentialsAccount,

    #[error("New password cannot be the same as your current password")]
    SamePassword,

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AuthError {
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        let mut details = FieldErrors::new();
        details.insert(field.to_string(), vec![message.into()]);
        AuthError::Validation { details }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation { .. }
            | AuthError::InvalidOrExpiredToken
            | AuthError::SamePassword => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredentials | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::EmailTaken | AuthError::AccountConflict => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) | AuthError::NoCredentialsAccount => StatusCode::NOT_FOUND,
            AuthError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Unexpected(anyhow::Error::new(e))
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<FieldErrors>,
}

/// Uniform `{ success, data?, error? }` envelope returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn empty() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, details) = match self {
            AuthError::Validation { details } => ("Validation failed".to_string(), Some(details)),
            AuthError::Unexpected(e) => {
                error!(error = ?e, "unexpected error");
                ("An unexpected error occurred".to_string(), None)
            }
            other => (other.to_string(), None),
        };
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody { message, details }),
        };
        (status, Json(body)).into_response()
    }
}
