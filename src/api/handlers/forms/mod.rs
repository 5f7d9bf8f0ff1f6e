//! Goal-agreement forms and their school-facing access codes.

pub mod access_code;

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::audit::{self, AuditAction, AuditEvent};
use crate::api::handlers::auth::session::authenticate_session;
use crate::api::handlers::auth::utils::is_unique_violation;
use crate::api::handlers::auth::AuthState;
use crate::api::handlers::RequestMeta;
use crate::api::rate_limit::{limited_response, RateLimitScope};

use self::access_code::{insert_access_code, issue_code, lookup_form_by_code, normalize_code};

// Malformed and unknown codes collapse to the same outward signal.
const INVALID_CODE_ERROR: &str = "Ungültiger Zugangscode";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateFormRequest {
    pub school_name: String,
    pub school_number: Option<String>,
    pub title: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct CreateFormResponse {
    pub form_id: String,
    pub access_code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RedeemCodeRequest {
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RedeemCodeResponse {
    pub form_id: String,
    pub school_name: String,
    pub title: String,
    pub status: String,
}

/// Create a goal-agreement form together with its access code.
///
/// The form row and the code binding commit or roll back together, so a form
/// can never exist without exactly one code and vice versa.
#[utoipa::path(
    post,
    path = "/v1/forms",
    request_body = CreateFormRequest,
    responses(
        (status = 201, description = "Form created", body = CreateFormResponse),
        (status = 401, description = "Not authenticated", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "forms"
)]
pub async fn create_form(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<CreateFormRequest>>,
) -> impl IntoResponse {
    let meta = RequestMeta::from_parts(&headers, Some(addr));

    let staff = match authenticate_session(&headers, &pool, auth_state.config()).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let event = AuditEvent::new(AuditAction::UnauthorizedAccess)
                .with_resource("form", "create")
                .with_request(&meta)
                .failed("no valid session");
            audit::record(&pool, event).await;
            return (StatusCode::UNAUTHORIZED, "Nicht angemeldet".to_string()).into_response();
        }
        Err(status) => return status.into_response(),
    };

    let decision = auth_state
        .rate_limiter()
        .check(&staff.user_id.to_string(), RateLimitScope::FormCreate);
    if decision.is_limited() {
        return limited_response(&decision);
    }

    let request: CreateFormRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let school_name = request.school_name.trim();
    let title = request.title.trim();
    if school_name.is_empty() || title.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Schulname und Titel dürfen nicht leer sein".to_string(),
        )
            .into_response();
    }

    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start form transaction: {err}");
            return form_failure_response();
        }
    };

    let form_id = match insert_form(
        &mut tx,
        school_name,
        request.school_number.as_deref(),
        title,
        staff.user_id,
    )
    .await
    {
        Ok(form_id) => form_id,
        Err(err) => {
            error!("Failed to insert form: {err}");
            let _ = tx.rollback().await;
            return form_failure_response();
        }
    };

    let code = match issue_code(&mut tx).await {
        Ok(code) => code,
        Err(err) => {
            error!("Failed to issue access code: {err}");
            let _ = tx.rollback().await;
            return form_failure_response();
        }
    };

    if let Err(err) = insert_access_code(&mut tx, &code, form_id).await {
        // The unique constraint is the backstop for the generation race; a
        // collision surfaces here as an explicit failure.
        if err
            .downcast_ref::<sqlx::Error>()
            .is_some_and(is_unique_violation)
        {
            error!("Access code collided on insert: {err}");
        } else {
            error!("Failed to insert access code: {err}");
        }
        let _ = tx.rollback().await;
        return form_failure_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit form transaction: {err}");
        return form_failure_response();
    }

    let event = AuditEvent::new(AuditAction::FormCreated)
        .with_actor(staff.user_id)
        .with_actor_email(&staff.email)
        .with_resource("form", &form_id.to_string())
        .with_request(&meta)
        .with_metadata(json!({ "schoolName": school_name }));
    audit::record(&pool, event).await;

    let response = CreateFormResponse {
        form_id: form_id.to_string(),
        access_code: code,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

/// Redeem an access code for its form.
#[utoipa::path(
    post,
    path = "/v1/code/redeem",
    request_body = RedeemCodeRequest,
    responses(
        (status = 200, description = "Code accepted", body = RedeemCodeResponse),
        (status = 404, description = "Invalid code", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "forms"
)]
pub async fn redeem_code(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RedeemCodeRequest>>,
) -> impl IntoResponse {
    let request: RedeemCodeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let meta = RequestMeta::from_parts(&headers, Some(addr));
    let decision = auth_state
        .rate_limiter()
        .check(&meta.client_ip(), RateLimitScope::CodeRedeem);
    if decision.is_limited() {
        return limited_response(&decision);
    }

    // Malformed input never reaches storage.
    let Some(code) = normalize_code(&request.code) else {
        let event = AuditEvent::new(AuditAction::AccessCodeUsed)
            .with_request(&meta)
            .failed("malformed code");
        audit::record(&pool, event).await;
        return (StatusCode::NOT_FOUND, INVALID_CODE_ERROR.to_string()).into_response();
    };

    match lookup_form_by_code(&pool, &code).await {
        Ok(Some(form)) => {
            let event = AuditEvent::new(AuditAction::AccessCodeUsed)
                .with_resource("form", &form.id.to_string())
                .with_request(&meta);
            audit::record(&pool, event).await;

            let response = RedeemCodeResponse {
                form_id: form.id.to_string(),
                school_name: form.school_name,
                title: form.title,
                status: form.status,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => {
            let event = AuditEvent::new(AuditAction::AccessCodeUsed)
                .with_request(&meta)
                .failed("unknown code");
            audit::record(&pool, event).await;
            (StatusCode::NOT_FOUND, INVALID_CODE_ERROR.to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to redeem access code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Einlösen fehlgeschlagen".to_string(),
            )
                .into_response()
        }
    }
}

async fn insert_form(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    school_name: &str,
    school_number: Option<&str>,
    title: &str,
    created_by: Uuid,
) -> anyhow::Result<Uuid> {
    let query = r"
        INSERT INTO forms (school_name, school_number, title, status, created_by)
        VALUES ($1, $2, $3, 'draft', $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(school_name)
        .bind(school_number)
        .bind(title)
        .bind(created_by)
        .fetch_one(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert form")?;
    Ok(row.get("id"))
}

fn form_failure_response() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Formular konnte nicht erstellt werden".to_string(),
    )
        .into_response()
}
