//! Password reset endpoints.
//!
//! The forgot-password flow always reports success so callers cannot probe
//! which addresses have accounts. Verifying a token and consuming it are
//! separate endpoints: the frontend validates before rendering the reset
//! form, and the token is burned only by the actual reset.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::api::email::reset_email;
use crate::api::handlers::RequestMeta;
use crate::api::rate_limit::{limited_response, RateLimitScope};

use super::password::hash_password;
use super::state::AuthState;
use super::storage::{delete_all_user_sessions, lookup_login_user, update_password};
use super::tokens::{consume_token, create_token, verify_token, TokenKind};
use super::types::{ForgotPasswordRequest, ResetPasswordRequest, VerifyResetTokenRequest};
use super::utils::{normalize_email, valid_email, valid_password};

#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 204, description = "Request accepted")
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Always 204 for invalid addresses to avoid account probing.
        return StatusCode::NO_CONTENT.into_response();
    }

    let meta = RequestMeta::from_parts(&headers, Some(addr));
    if auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::Login)
        .is_limited()
    {
        // The flow is intentionally opaque; rate limits still return 204.
        return StatusCode::NO_CONTENT.into_response();
    }
    if auth_state
        .rate_limiter()
        .check(&email, RateLimitScope::Login)
        .is_limited()
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    let user = match lookup_login_user(&pool, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to lookup user for password reset: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };
    let Some(user) = user else {
        return StatusCode::NO_CONTENT.into_response();
    };

    let token = match create_token(
        &pool,
        &user.email,
        TokenKind::PasswordReset,
        auth_state.config().reset_token_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create reset token: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let message = reset_email(auth_state.config().frontend_base_url(), &user.email, &token);
    let send_result = auth_state.email_sender().send(&message);

    let mut event = AuditEvent::new(AuditAction::PasswordResetRequested)
        .with_actor(user.id)
        .with_actor_email(&user.email)
        .with_request(&meta);
    if let Err(err) = &send_result {
        error!("Failed to send reset email: {err}");
        event = event.failed("email delivery failed");
    }
    audit::record(&pool, event).await;

    StatusCode::NO_CONTENT.into_response()
}

#[utoipa::path(
    post,
    path = "/v1/auth/verify-reset-token",
    request_body = VerifyResetTokenRequest,
    responses(
        (status = 204, description = "Token is valid"),
        (status = 400, description = "Invalid/expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_reset_token(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyResetTokenRequest>>,
) -> impl IntoResponse {
    let request: VerifyResetTokenRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let meta = RequestMeta::from_parts(&headers, Some(addr));
    let decision = auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::Login);
    if decision.is_limited() {
        return limited_response(&decision);
    }

    // Read-only: a valid token stays consumable for the actual reset.
    match verify_token(&pool, token, TokenKind::PasswordReset).await {
        Ok(Some(_)) => StatusCode::NO_CONTENT.into_response(),
        Ok(None) => (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response(),
        Err(err) => {
            error!("Failed to verify reset token: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Überprüfung fehlgeschlagen".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password reset, all sessions invalidated"),
        (status = 400, description = "Invalid token or password", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing token".to_string()).into_response();
    }

    let meta = RequestMeta::from_parts(&headers, Some(addr));
    let decision = auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::Login);
    if decision.is_limited() {
        return limited_response(&decision);
    }

    let min_length = auth_state.config().min_password_length();
    if !valid_password(&request.password, min_length) {
        return (
            StatusCode::BAD_REQUEST,
            format!("Das Passwort muss mindestens {min_length} Zeichen lang sein"),
        )
            .into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start reset transaction: {err}");
            return reset_failure_response();
        }
    };

    // Burn the token, re-hash, and drop every session in one transaction so a
    // half-applied reset can never leave old sessions alive.
    let email = match consume_token(&mut tx, token, TokenKind::PasswordReset).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume reset token: {err}");
            let _ = tx.rollback().await;
            return reset_failure_response();
        }
    };

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err}");
            let _ = tx.rollback().await;
            return reset_failure_response();
        }
    };

    let user_id = match update_password(&mut tx, &email, &password_hash).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            // Token outlived the account; treat like any other invalid token.
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to update password: {err}");
            let _ = tx.rollback().await;
            return reset_failure_response();
        }
    };

    let removed_sessions = match delete_all_user_sessions(&mut tx, user_id).await {
        Ok(count) => count,
        Err(err) => {
            error!("Failed to invalidate sessions: {err}");
            let _ = tx.rollback().await;
            return reset_failure_response();
        }
    };

    if let Err(err) = tx.commit().await {
        error!("Failed to commit reset transaction: {err}");
        return reset_failure_response();
    }

    let event = AuditEvent::new(AuditAction::PasswordResetCompleted)
        .with_actor(user_id)
        .with_actor_email(&email)
        .with_request(&meta)
        .with_metadata(serde_json::json!({ "invalidatedSessions": removed_sessions }));
    audit::record(&pool, event).await;

    StatusCode::NO_CONTENT.into_response()
}

fn reset_failure_response() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Zurücksetzen fehlgeschlagen".to_string(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::handlers::auth::state::AuthConfig;
    use crate::api::rate_limit::NoopRateLimiter;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;
    use std::net::{IpAddr, Ipv4Addr};

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:3000".to_string()),
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        ))
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)
    }

    #[tokio::test]
    async fn forgot_password_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn forgot_password_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = forgot_password(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ForgotPasswordRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }

    #[tokio::test]
    async fn verify_reset_token_empty_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_reset_token(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(VerifyResetTokenRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_password_rejects_short_password() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = reset_password(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResetPasswordRequest {
                token: "tok".to_string(),
                password: "kurz".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
