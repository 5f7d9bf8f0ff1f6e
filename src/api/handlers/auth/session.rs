//! Session endpoints and cookie handling.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::api::handlers::RequestMeta;

use super::state::{AuthConfig, AuthState};
use super::storage::{delete_session, lookup_session, SessionRecord};
use super::types::SessionResponse;
use super::utils::hash_token;

const SESSION_COOKIE_NAME: &str = "zielportal_session";
// Cookie names from earlier portal versions, still cleared on logout.
const LEGACY_SESSION_COOKIE_NAMES: [&str; 2] = ["zv_session", "session"];

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_token(&token);
    match lookup_session(&pool, &token_hash, auth_state.config()).await {
        Ok(Some(SessionRecord {
            user_id,
            email,
            role,
        })) => {
            let response = SessionResponse {
                user_id: user_id.to_string(),
                email,
                role,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => {
            // Expired, idle, locked, or deactivated: drop the row and the
            // cookies without saying which condition failed.
            if let Err(err) = delete_session(&pool, &token_hash).await {
                error!("Failed to delete invalid session: {err}");
            }
            (
                StatusCode::NO_CONTENT,
                clear_session_cookie_headers(auth_state.config()),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to lookup session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolve a session cookie into a session record, if present.
///
/// Returns `Ok(None)` when the cookie is missing or invalid.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
    config: &AuthConfig,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_token(&token);
    match lookup_session(pool, &token_hash, config).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let meta = RequestMeta::from_parts(&headers, None);
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_token(&token);
        // Resolve the owner first so the logout can be attributed.
        let record = lookup_session(&pool, &token_hash, auth_state.config())
            .await
            .unwrap_or(None);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
        if let Some(record) = record {
            let event = AuditEvent::new(AuditAction::Logout)
                .with_actor(record.user_id)
                .with_actor_email(&record.email)
                .with_request(&meta);
            audit::record(&pool, event).await;
        }
    }

    // Always clear the cookies, even if the session record was missing.
    (
        StatusCode::NO_CONTENT,
        clear_session_cookie_headers(auth_state.config()),
    )
        .into_response()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.session_duration_seconds();
    let secure = config.session_cookie_secure();
    let mut cookie =
        format!("{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Headers clearing the session cookie and its legacy predecessors.
pub(super) fn clear_session_cookie_headers(config: &AuthConfig) -> HeaderMap {
    let secure = config.session_cookie_secure();
    let mut headers = HeaderMap::new();
    for name in std::iter::once(SESSION_COOKIE_NAME).chain(LEGACY_SESSION_COOKIE_NAMES) {
        let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
        if secure {
            cookie.push_str("; Secure");
        }
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
    headers
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(frontend: &str) -> AuthConfig {
        AuthConfig::new(frontend.to_string())
    }

    #[test]
    fn extract_session_token_finds_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; zielportal_session=tok; theme=dark"),
        );
        assert_eq!(extract_session_token(&headers), Some("tok".to_string()));
    }

    #[test]
    fn extract_session_token_ignores_legacy_names() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("zv_session=old"));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn session_cookie_attributes() {
        let cookie = session_cookie(&config("https://portal.schulamt.de"), "tok").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.starts_with("zielportal_session=tok"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(cookie.contains("Path=/"));
        assert!(cookie.contains("Max-Age=7200"));
        assert!(cookie.contains("Secure"));
    }

    #[test]
    fn session_cookie_not_secure_for_http_frontend() {
        let cookie = session_cookie(&config("http://localhost:3000"), "tok").unwrap();
        assert!(!cookie.to_str().unwrap().contains("Secure"));
    }

    #[test]
    fn clearing_covers_legacy_cookie_names() {
        let headers = clear_session_cookie_headers(&config("http://localhost:3000"));
        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect();
        assert_eq!(values.len(), 3);
        assert!(values.iter().any(|v| v.starts_with("zielportal_session=;")));
        assert!(values.iter().any(|v| v.starts_with("zv_session=;")));
        assert!(values.iter().any(|v| v.starts_with("session=;")));
        assert!(values.iter().all(|v| v.contains("Max-Age=0")));
    }
}
