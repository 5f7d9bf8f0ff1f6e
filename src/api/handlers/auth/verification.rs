//! Email verification endpoints.

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
use crate::api::email::verification_email;
use crate::api::handlers::RequestMeta;
use crate::api::rate_limit::{limited_response, RateLimitScope};

use super::state::AuthState;
use super::storage::{lookup_login_user, mark_email_verified};
use super::tokens::{consume_token, create_token, has_recent_token, TokenKind};
use super::types::{ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{normalize_email, valid_email};

/// Consume the emailed token and mark the account verified.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid/expired token", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
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
        // Rate limits are enforced before any token work to avoid amplification.
        return limited_response(&decision);
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return verification_failure_response();
        }
    };

    // Consume the token and activate the address in the same transaction.
    let email = match consume_token(&mut tx, token, TokenKind::EmailVerification).await {
        Ok(Some(email)) => email,
        Ok(None) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to consume verification token: {err}");
            let _ = tx.rollback().await;
            return verification_failure_response();
        }
    };

    match mark_email_verified(&mut tx, &email).await {
        Ok(true) => {}
        Ok(false) => {
            let _ = tx.rollback().await;
            return (StatusCode::BAD_REQUEST, "Invalid token".to_string()).into_response();
        }
        Err(err) => {
            error!("Failed to mark email verified: {err}");
            let _ = tx.rollback().await;
            return verification_failure_response();
        }
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit verify-email transaction: {err}");
        return verification_failure_response();
    }

    let event = AuditEvent::new(AuditAction::EmailVerified)
        .with_actor_email(&email)
        .with_request(&meta);
    audit::record(&pool, event).await;

    StatusCode::NO_CONTENT.into_response()
}

/// Resend a verification email (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 204, description = "Resend accepted")
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Always return 204 for invalid emails to avoid account probing.
        return StatusCode::NO_CONTENT.into_response();
    }

    let meta = RequestMeta::from_parts(&headers, Some(addr));
    if auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::Login)
        .is_limited()
    {
        // Resend is intentionally opaque; rate limits still return 204.
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
        Ok(Some(user)) if !user.email_verified => user,
        Ok(_) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup user for resend: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    // Cooldown prevents repeated resends from flooding the mailbox.
    match has_recent_token(
        &pool,
        &user.email,
        TokenKind::EmailVerification,
        auth_state.config().resend_cooldown_seconds(),
    )
    .await
    {
        Ok(false) => {}
        Ok(true) => return StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to check resend cooldown: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    }

    let token = match create_token(
        &pool,
        &user.email,
        TokenKind::EmailVerification,
        auth_state.config().verification_token_ttl_seconds(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create verification token: {err}");
            return StatusCode::NO_CONTENT.into_response();
        }
    };

    let message = verification_email(auth_state.config().frontend_base_url(), &user.email, &token);
    if let Err(err) = auth_state.email_sender().send(&message) {
        // Avoid leaking failures; always return 204 to callers.
        error!("Failed to send verification email: {err}");
    }

    StatusCode::NO_CONTENT.into_response()
}

fn verification_failure_response() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Bestätigung fehlgeschlagen".to_string(),
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
    async fn verify_email_missing_payload() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(
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
    async fn verify_email_empty_token() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = verify_email(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(VerifyEmailRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_verification_invalid_email_is_opaque() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = resend_verification(
            ConnectInfo(addr()),
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Some(Json(ResendVerificationRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        Ok(())
    }
}
