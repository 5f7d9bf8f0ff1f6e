//! Storage-hygiene sweeps: a bearer-protected endpoint for external cron
//! triggers plus a periodic background worker owned by server startup.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info};
use utoipa::ToSchema;

use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::api::handlers::auth::storage::cleanup_expired_sessions;
use crate::api::handlers::auth::tokens::cleanup_expired_tokens;
use crate::api::handlers::auth::{AuthConfig, AuthState};
use crate::api::handlers::RequestMeta;
use crate::cli::globals::GlobalArgs;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CleanupResponse {
    pub sessions_removed: u64,
    pub tokens_removed: u64,
    pub audit_entries_removed: u64,
}

/// Run every sweep once. Protected by the cron bearer secret.
#[utoipa::path(
    post,
    path = "/v1/maintenance/cleanup",
    responses(
        (status = 200, description = "Sweeps completed", body = CleanupResponse),
        (status = 401, description = "Missing or invalid bearer secret", body = String)
    ),
    tag = "maintenance"
)]
pub async fn cleanup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    globals: Extension<GlobalArgs>,
) -> impl IntoResponse {
    let meta = RequestMeta::from_parts(&headers, None);

    let secret = globals.cron_secret.expose_secret();
    let authorized = !secret.is_empty() && meta.bearer_token() == Some(secret);
    if !authorized {
        let event = AuditEvent::new(AuditAction::UnauthorizedAccess)
            .with_resource("maintenance", "cleanup")
            .with_request(&meta)
            .failed("invalid cron secret");
        audit::record(&pool, event).await;
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    }

    match run_sweeps(&pool, auth_state.config()).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("Cleanup sweeps failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cleanup failed".to_string(),
            )
                .into_response()
        }
    }
}

async fn run_sweeps(pool: &PgPool, config: &AuthConfig) -> anyhow::Result<CleanupResponse> {
    let sessions_removed = cleanup_expired_sessions(pool, config).await?;
    let tokens_removed = cleanup_expired_tokens(pool).await?;
    let audit_entries_removed = audit::cleanup_expired(pool).await?;
    info!(
        sessions_removed,
        tokens_removed, audit_entries_removed, "cleanup sweeps finished"
    );
    Ok(CleanupResponse {
        sessions_removed,
        tokens_removed,
        audit_entries_removed,
    })
}

/// Spawn the periodic sweep task.
///
/// Owned by server startup; the caller aborts the handle on shutdown.
pub fn spawn_cleanup_worker(pool: PgPool, config: AuthConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(CLEANUP_INTERVAL).await;
            if let Err(err) = run_sweeps(&pool, &config).await {
                error!("periodic cleanup failed: {err}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::email::LogEmailSender;
    use crate::api::rate_limit::NoopRateLimiter;
    use anyhow::Result;
    use axum::http::{header::AUTHORIZATION, HeaderValue};
    use secrecy::SecretString;
    use sqlx::postgres::PgPoolOptions;

    fn auth_state() -> Arc<AuthState> {
        Arc::new(AuthState::new(
            AuthConfig::new("http://localhost:3000".to_string()),
            Arc::new(NoopRateLimiter),
            Arc::new(LogEmailSender),
        ))
    }

    fn globals_with_secret(secret: &str) -> GlobalArgs {
        let mut globals = GlobalArgs::new("http://localhost:3000".to_string());
        globals.set_cron_secret(SecretString::from(secret.to_string()));
        globals
    }

    #[tokio::test]
    async fn cleanup_rejects_missing_bearer() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = cleanup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Extension(globals_with_secret("cron-secret")),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_rejects_wrong_bearer() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        let response = cleanup(
            headers,
            Extension(pool),
            Extension(auth_state()),
            Extension(globals_with_secret("cron-secret")),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn cleanup_rejects_when_secret_unconfigured() -> Result<()> {
        // An empty secret must fail closed rather than match an empty bearer.
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?;
        let response = cleanup(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
            Extension(GlobalArgs::new("http://localhost:3000".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
