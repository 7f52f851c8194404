use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, error, info, instrument, warn, Instrument, Span};

use crate::{
    auth::{
        credentials::CredentialAuthenticator,
        dto::{
            ForgotPasswordRequest, MessageResponse, OAuthSessionRequest, OAuthSignInRequest,
            PublicUser, RefreshRequest, ResetPasswordRequest, SessionResponse, SignInRequest,
            SignUpRequest, SignUpResponse,
        },
        extractors::{AuthUser, OAuthCallback},
        oauth::OAuthLinker,
        reset::ResetTokenIssuer,
        session::{SessionResolver, SignInMethod},
    },
    error::{ApiResponse, AuthError},
    state::AppState,
};

type ApiResult<T> = Result<Json<ApiResponse<T>>, AuthError>;

/// Same body for registered and unknown addresses.
const RESET_REQUESTED: &str = "If an account exists for this email, a reset link has been sent";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/sign-up", post(sign_up))
        .route("/auth/sign-in", post(sign_in))
        .route("/auth/signin-with-oauth", post(sign_in_with_oauth))
        .route("/auth/oauth/session", post(oauth_session))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip_all)]
pub async fn sign_up(
    State(authenticator): State<CredentialAuthenticator>,
    State(sessions): State<SessionResolver>,
    Json(mut payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SignUpResponse>>), AuthError> {
    payload.validate()?;

    let user = authenticator
        .register_credentials(&payload.name, &payload.email, &payload.password)
        .await?;

    // The account exists from here on; a failed sign-in only costs the session.
    let session = match sessions
        .sign_in(SignInMethod::Credentials {
            email: &payload.email,
        })
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(user_id = %user.id, error = %e, "user created but auto sign-in failed");
            None
        }
    };

    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(SignUpResponse {
            user: PublicUser::from(user),
            session,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn sign_in(
    State(authenticator): State<CredentialAuthenticator>,
    State(sessions): State<SessionResolver>,
    Json(mut payload): Json<SignInRequest>,
) -> ApiResult<SessionResponse> {
    payload.validate()?;

    let principal = authenticator
        .authenticate(&payload.email, &payload.password)
        .await?;

    let session = sessions
        .sign_in(SignInMethod::Credentials {
            email: &payload.email,
        })
        .await?
        .ok_or(AuthError::InvalidCredentials)?;

    info!(user_id = %principal.user_id, "user signed in");
    Ok(ApiResponse::ok(SessionResponse { session }))
}

#[instrument(skip_all)]
pub async fn sign_in_with_oauth(
    _callback: OAuthCallback,
    State(linker): State<OAuthLinker>,
    Json(mut payload): Json<OAuthSignInRequest>,
) -> ApiResult<()> {
    payload.validate()?;
    linker
        .link_oauth_identity(&payload.provider, &payload.provider_account_id, &payload.user)
        .await?;
    Ok(ApiResponse::empty())
}

#[instrument(skip_all)]
pub async fn oauth_session(
    _callback: OAuthCallback,
    State(sessions): State<SessionResolver>,
    Json(payload): Json<OAuthSessionRequest>,
) -> ApiResult<SessionResponse> {
    let session = sessions
        .sign_in(SignInMethod::OAuth {
            provider: &payload.provider,
            provider_account_id: &payload.provider_account_id,
        })
        .await?
        .ok_or(AuthError::Unauthorized("No linked account for this sign-in"))?;
    Ok(ApiResponse::ok(SessionResponse { session }))
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(issuer): State<ResetTokenIssuer>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> ApiResult<MessageResponse> {
    payload.validate()?;
    // Detached so the response time is the same for registered and unknown emails.
    tokio::spawn(
        async move {
            match issuer.issue_reset_token(&payload.email).await {
                Ok(outcome) => debug!(email_sent = ?outcome.email_sent, "reset request handled"),
                Err(e) => error!(error = %e, "reset token issue failed"),
            }
        }
        .instrument(Span::current()),
    );
    Ok(ApiResponse::ok(MessageResponse {
        message: RESET_REQUESTED,
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(issuer): State<ResetTokenIssuer>,
    Json(payload): Json<ResetPasswordRequest>,
) -> ApiResult<MessageResponse> {
    payload.validate()?;
    issuer
        .consume_reset_token(&payload.token, &payload.password)
        .await?;
    Ok(ApiResponse::ok(MessageResponse {
        message: "Password reset successfully",
    }))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(sessions): State<SessionResolver>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<SessionResponse> {
    let session = sessions.refresh(&payload.refresh_token).await?;
    Ok(ApiResponse::ok(SessionResponse { session }))
}

#[instrument(skip_all)]
pub async fn get_me(
    State(sessions): State<SessionResolver>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<PublicUser> {
    let user = sessions.current_user(user_id).await?;
    Ok(ApiResponse::ok(PublicUser::from(user)))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        mail::testing::RecordingMailer,
        state::{AppState, TEST_CALLBACK_SECRET},
        store::{FailPoint, MemoryStore},
    };

    struct TestApp {
        app: Router,
        store: MemoryStore,
        mailer: RecordingMailer,
    }

    fn test_app() -> TestApp {
        let (state, store, mailer) = AppState::fake_parts();
        TestApp {
            app: build_app(state),
            store,
            mailer,
        }
    }

    impl TestApp {
        async fn call(&self, method: &str, uri: &str, body: Option<Value>, bearer: Option<&str>) -> (u16, Value) {
            let mut req = Request::builder()
                .method(method)
                .uri(format!("/api/v1{uri}"))
                .header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = bearer {
                req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let body = body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty);
            let res = self.app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
            let status = res.status().as_u16();
            let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }

        async fn post(&self, uri: &str, body: Value) -> (u16, Value) {
            self.call("POST", uri, Some(body), None).await
        }

        /// POST as the OAuth front end, presenting the callback secret.
        async fn oauth_post(&self, uri: &str, body: Value) -> (u16, Value) {
            self.call("POST", uri, Some(body), Some(TEST_CALLBACK_SECRET)).await
        }

        /// Reset mail is sent off the request path; wait for it to land.
        async fn wait_for_mail(&self, count: usize) {
            for _ in 0..200 {
                if self.mailer.sent_count() >= count {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
            panic!("expected {count} reset emails, got {}", self.mailer.sent_count());
        }

        async fn sign_up(&self, email: &str) -> Value {
            let (status, body) = self
                .post(
                    "/auth/sign-up",
                    json!({
                        "name": "Ada",
                        "email": email,
                        "password": "Str0ng!pass",
                        "confirmPassword": "Str0ng!pass",
                    }),
                )
                .await;
            assert_eq!(status, 201, "{body}");
            body
        }
    }

    #[tokio::test]
    async fn sign_up_returns_user_and_session() {
        let app = test_app();
        let body = app.sign_up("ada@example.com").await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["user"]["email"], "ada@example.com");
        assert_eq!(body["data"]["session"]["user"]["id"], body["data"]["user"]["id"]);
    }

    #[tokio::test]
    async fn duplicate_sign_up_is_forbidden() {
        let app = test_app();
        app.sign_up("ada@example.com").await;
        let (status, body) = app
            .post(
                "/auth/sign-up",
                json!({
                    "name": "Ada",
                    "email": "ada@example.com",
                    "password": "Str0ng!pass",
                    "confirm_password": "Str0ng!pass",
                }),
            )
            .await;
        assert_eq!(status, 403);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn invalid_sign_up_is_rejected_with_field_details() {
        let app = test_app();
        let (status, body) = app
            .post(
                "/auth/sign-up",
                json!({ "name": "", "email": "x", "password": "weak", "confirm_password": "weak" }),
            )
            .await;
        assert_eq!(status, 400);
        assert!(body["error"]["details"]["email"].is_array());
        assert!(body["error"]["details"]["password"].is_array());
    }

    #[tokio::test]
    async fn sign_in_failures_are_indistinguishable() {
        let app = test_app();
        app.sign_up("ada@example.com").await;

        let unknown = app
            .post("/auth/sign-in", json!({ "email": "nobody@example.com", "password": "Str0ng!pass" }))
            .await;
        let wrong = app
            .post("/auth/sign-in", json!({ "email": "ada@example.com", "password": "Wr0ng!pass" }))
            .await;
        assert_eq!(unknown.0, 401);
        assert_eq!(unknown, wrong);
    }

    #[tokio::test]
    async fn sign_in_then_me() {
        let app = test_app();
        app.sign_up("ada@example.com").await;
        let (status, body) = app
            .post("/auth/sign-in", json!({ "email": "ada@example.com", "password": "Str0ng!pass" }))
            .await;
        assert_eq!(status, 200);
        let token = body["data"]["session"]["access_token"].as_str().unwrap().to_string();

        let (status, me) = app.call("GET", "/me", None, Some(&token)).await;
        assert_eq!(status, 200);
        assert_eq!(me["data"]["email"], "ada@example.com");

        let (status, _) = app.call("GET", "/me", None, None).await;
        assert_eq!(status, 401);
    }

    #[tokio::test]
    async fn forgot_password_response_does_not_reveal_registration() {
        let app = test_app();
        app.sign_up("real@example.com").await;

        let real = app.post("/auth/forgot-password", json!({ "email": "real@example.com" })).await;
        let fake = app
            .post("/auth/forgot-password", json!({ "email": "nonexistent@example.com" }))
            .await;
        assert_eq!(real.0, 200);
        assert_eq!(real, fake);
        app.wait_for_mail(1).await;
        assert_eq!(app.mailer.sent_count(), 1);
    }

    #[tokio::test]
    async fn reset_password_flow() {
        let app = test_app();
        app.sign_up("ada@example.com").await;
        app.post("/auth/forgot-password", json!({ "email": "ada@example.com" })).await;
        app.wait_for_mail(1).await;
        let token = app.mailer.last_token("ada@example.com").unwrap();

        let reset = json!({ "token": token, "password": "N3w!Password", "confirmPassword": "N3w!Password" });
        let (status, _) = app.post("/auth/reset-password", reset.clone()).await;
        assert_eq!(status, 200);

        let (status, body) = app.post("/auth/reset-password", reset).await;
        assert_eq!(status, 400);
        assert_eq!(body["error"]["message"], "Invalid or expired reset token");

        let (status, _) = app
            .post("/auth/sign-in", json!({ "email": "ada@example.com", "password": "N3w!Password" }))
            .await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn oauth_link_then_session() {
        let app = test_app();
        let link = json!({
            "provider": "github",
            "providerAccountId": "gh-42",
            "user": { "name": "Ada", "email": "ada@example.com", "image": null, "username": "Ada L" }
        });
        let (status, body) = app.oauth_post("/auth/signin-with-oauth", link.clone()).await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({ "success": true }));
        let (status, _) = app.oauth_post("/auth/signin-with-oauth", link).await;
        assert_eq!(status, 200);

        let (status, body) = app
            .oauth_post("/auth/oauth/session", json!({ "provider": "github", "providerAccountId": "gh-42" }))
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["session"]["user"]["email"], "ada@example.com");

        let (status, _) = app
            .oauth_post("/auth/oauth/session", json!({ "provider": "github", "providerAccountId": "gh-0" }))
            .await;
        assert_eq!(status, 401);
    }

    #[tokio::test]
    async fn refresh_issues_new_session() {
        let app = test_app();
        let body = app.sign_up("ada@example.com").await;
        let refresh_token = body["data"]["session"]["refresh_token"].as_str().unwrap();
        let (status, body) = app.post("/auth/refresh", json!({ "refresh_token": refresh_token })).await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["session"]["user"]["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn sign_up_survives_failed_session() {
        let app = test_app();
        app.store.fail_next(FailPoint::AccountByProvider);
        let body = app.sign_up("ada@example.com").await;

        assert_eq!(body["data"]["user"]["email"], "ada@example.com");
        assert!(body["data"].get("session").is_none());
        assert_eq!(app.store.user_count().await, 1);

        let (status, _) = app
            .post("/auth/sign-in", json!({ "email": "ada@example.com", "password": "Str0ng!pass" }))
            .await;
        assert_eq!(status, 200);
    }

    #[tokio::test]
    async fn oauth_routes_require_callback_secret() {
        let app = test_app();
        app.sign_up("victim@example.com").await;
        let link = json!({
            "provider": "github",
            "providerAccountId": "attacker-1",
            "user": { "name": "Mallory", "email": "victim@example.com", "image": null, "username": "mallory" }
        });
        let lookup = json!({ "provider": "github", "providerAccountId": "attacker-1" });

        let (status, _) = app.post("/auth/signin-with-oauth", link.clone()).await;
        assert_eq!(status, 401);
        let (status, _) = app
            .call("POST", "/auth/signin-with-oauth", Some(link), Some("guessed-secret"))
            .await;
        assert_eq!(status, 401);

        let (status, _) = app.post("/auth/oauth/session", lookup.clone()).await;
        assert_eq!(status, 401);
        let (status, _) = app.oauth_post("/auth/oauth/session", lookup).await;
        assert_eq!(status, 401, "nothing was linked, so no session");

        let (status, me) = app.call("GET", "/me", None, None).await;
        assert_eq!(status, 401);
        assert_eq!(me["success"], false);
    }

    #[tokio::test]
    async fn oauth_username_collision_is_forbidden() {
        let app = test_app();
        let link = |email: &str, id: &str| {
            json!({
                "provider": "google",
                "providerAccountId": id,
                "user": { "name": "John Smith", "email": email, "image": null, "username": "john smith" }
            })
        };
        let (status, _) = app.oauth_post("/auth/signin-with-oauth", link("john@example.com", "g-1")).await;
        assert_eq!(status, 200);
        let (status, body) = app
            .oauth_post("/auth/signin-with-oauth", link("jsmith@example.com", "g-2"))
            .await;
        assert_eq!(status, 403);
        assert_eq!(body["error"]["message"], "Account conflicts with an existing user");
    }
}
