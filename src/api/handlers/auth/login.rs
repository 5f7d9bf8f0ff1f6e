//! Staff login endpoint.

use axum::{
    extract::{ConnectInfo, Extension},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::api::handlers::RequestMeta;
use crate::api::rate_limit::{limited_response, RateLimitScope};

use super::password::{dummy_hash, verify_password};
use super::session::session_cookie;
use super::state::AuthState;
use super::storage::{
    clear_failed_logins, insert_session, lookup_login_user, record_failed_login,
};
use super::types::{LoginRequest, SessionResponse};
use super::utils::{normalize_email, valid_email};

// One generic message for every failure mode, so responses do not reveal
// whether an account exists, is locked, or is unverified.
const GENERIC_LOGIN_ERROR: &str = "E-Mail-Adresse oder Passwort ist ungültig";

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful, session cookie set", body = SessionResponse),
        (status = 401, description = "Invalid credentials", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let meta = RequestMeta::from_parts(&headers, Some(addr));

    // Rate limits run before any credential work to avoid amplification.
    let decision = auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::Login);
    if decision.is_limited() {
        return limited_response(&decision);
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::UNAUTHORIZED, GENERIC_LOGIN_ERROR.to_string()).into_response();
    }

    let user = match lookup_login_user(&pool, &email).await {
        Ok(user) => user,
        Err(err) => {
            error!("Failed to lookup user for login: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Anmeldung fehlgeschlagen".to_string(),
            )
                .into_response();
        }
    };

    // Verify against a stand-in hash when the account is unknown, so timing
    // stays comparable either way.
    let stored_hash = user
        .as_ref()
        .map_or_else(|| dummy_hash().to_string(), |u| u.password_hash.clone());
    let password_matches = verify_password(&request.password, &stored_hash).unwrap_or_else(|err| {
        error!("Password verification failed: {err}");
        false
    });

    let Some(user) = user else {
        let event = AuditEvent::new(AuditAction::Login)
            .with_actor_email(&email)
            .with_request(&meta)
            .failed("unknown account");
        audit::record(&pool, event).await;
        return (StatusCode::UNAUTHORIZED, GENERIC_LOGIN_ERROR.to_string()).into_response();
    };

    if !password_matches || user.locked || !user.active || !user.email_verified {
        let mut attempts = None;
        if !password_matches {
            match record_failed_login(&pool, user.id, auth_state.config()).await {
                Ok(count) => attempts = Some(count),
                Err(err) => error!("Failed to record failed login: {err}"),
            }
        }
        let event = AuditEvent::new(AuditAction::Login)
            .with_actor(user.id)
            .with_actor_email(&user.email)
            .with_request(&meta)
            .with_metadata(json!({ "failedAttempts": attempts }))
            .failed("login rejected");
        audit::record(&pool, event).await;
        return (StatusCode::UNAUTHORIZED, GENERIC_LOGIN_ERROR.to_string()).into_response();
    }

    if let Err(err) = clear_failed_logins(&pool, user.id).await {
        error!("Failed to clear failed logins: {err}");
    }

    let token = match insert_session(
        &pool,
        user.id,
        Some(meta.client_ip().as_str()),
        meta.user_agent(),
        auth_state.config(),
    )
    .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to create session: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Anmeldung fehlgeschlagen".to_string(),
            )
                .into_response();
        }
    };

    let mut response_headers = HeaderMap::new();
    match session_cookie(auth_state.config(), &token) {
        Ok(cookie) => {
            response_headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => {
            error!("Failed to build session cookie: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Anmeldung fehlgeschlagen".to_string(),
            )
                .into_response();
        }
    }

    let event = AuditEvent::new(AuditAction::Login)
        .with_actor(user.id)
        .with_actor_email(&user.email)
        .with_request(&meta);
    audit::record(&pool, event).await;

    let response = SessionResponse {
        user_id: user.id.to_string(),
        email: user.email,
        role: user.role,
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}
