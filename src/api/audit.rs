//! Append-only audit logging with PII redaction.
//!
//! Every security-relevant outcome goes through [`record`], which sanitizes
//! actor email, client IP, user agent, and metadata before the row is
//! written. Entries are never mutated afterwards; only the retention sweep
//! deletes them. A failed write is logged and swallowed — the audit trail is
//! best-effort and must never break the operation that produced the event.

use crate::api::handlers::RequestMeta;
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::{PgPool, Row};
use std::net::IpAddr;
use tracing::{error, Instrument};
use uuid::Uuid;

/// Entries older than this are removed by the retention sweep.
pub const RETENTION_DAYS: i64 = 90;

const MAX_USER_AGENT_LEN: usize = 256;
const REDACTION_MARKER: &str = "[redacted]";
const SENSITIVE_METADATA_KEYS: [&str; 6] = [
    "password",
    "token",
    "accesscode",
    "secret",
    "apikey",
    "authorization",
];

/// Closed vocabulary of auditable actions.
///
/// New action kinds are added here, never passed as free text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuditAction {
    Login,
    Logout,
    FormCreated,
    FormUpdated,
    FormSubmitted,
    FormApproved,
    FormReturned,
    EntryCreated,
    EntryUpdated,
    EntryDeleted,
    UserCreated,
    UserUpdated,
    UserDeactivated,
    PasswordResetRequested,
    PasswordResetCompleted,
    EmailVerified,
    AccessCodeUsed,
    SchoolSearch,
    UnauthorizedAccess,
}

impl AuditAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Logout => "logout",
            Self::FormCreated => "form_created",
            Self::FormUpdated => "form_updated",
            Self::FormSubmitted => "form_submitted",
            Self::FormApproved => "form_approved",
            Self::FormReturned => "form_returned",
            Self::EntryCreated => "entry_created",
            Self::EntryUpdated => "entry_updated",
            Self::EntryDeleted => "entry_deleted",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::UserDeactivated => "user_deactivated",
            Self::PasswordResetRequested => "password_reset_requested",
            Self::PasswordResetCompleted => "password_reset_completed",
            Self::EmailVerified => "email_verified",
            Self::AccessCodeUsed => "access_code_used",
            Self::SchoolSearch => "school_search",
            Self::UnauthorizedAccess => "unauthorized_access",
        }
    }
}

/// One event to append. Build with the `with_*` methods; sanitization happens
/// inside [`record`], not here.
#[derive(Debug)]
pub struct AuditEvent {
    action: AuditAction,
    actor_id: Option<Uuid>,
    actor_email: Option<String>,
    resource_type: Option<String>,
    resource_id: Option<String>,
    ip: Option<String>,
    user_agent: Option<String>,
    metadata: Option<Value>,
    success: bool,
    error_message: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            actor_id: None,
            actor_email: None,
            resource_type: None,
            resource_id: None,
            ip: None,
            user_agent: None,
            metadata: None,
            success: true,
            error_message: None,
        }
    }

    #[must_use]
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    #[must_use]
    pub fn with_actor_email(mut self, email: &str) -> Self {
        self.actor_email = Some(email.to_string());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource_type: &str, resource_id: &str) -> Self {
        self.resource_type = Some(resource_type.to_string());
        self.resource_id = Some(resource_id.to_string());
        self
    }

    /// Attach client IP and user agent from the request metadata.
    #[must_use]
    pub fn with_request(mut self, meta: &RequestMeta) -> Self {
        self.ip = Some(meta.client_ip());
        self.user_agent = meta.user_agent().map(str::to_string);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn failed(mut self, message: &str) -> Self {
        self.success = false;
        self.error_message = Some(message.to_string());
        self
    }
}

/// Append one entry, best-effort.
///
/// Insert failures are logged locally and swallowed so the calling operation
/// is never broken by its own audit trail.
pub async fn record(pool: &PgPool, event: AuditEvent) {
    if let Err(err) = insert_entry(pool, event).await {
        error!("failed to record audit entry: {err}");
    }
}

async fn insert_entry(pool: &PgPool, event: AuditEvent) -> Result<()> {
    // PII is transformed before the write, never after.
    let actor_email = event.actor_email.as_deref().map(mask_email);
    let ip = event.ip.as_deref().map(mask_ip);
    let user_agent = event.user_agent.as_deref().map(truncate_user_agent);
    let metadata = event
        .metadata
        .map(redact_metadata)
        .map(|value| serde_json::to_string(&value))
        .transpose()
        .context("failed to serialize audit metadata")?;

    let query = r"
        INSERT INTO audit_log
            (action, actor_id, actor_email, resource_type, resource_id,
             ip, user_agent, metadata, success, error_message)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb, $9, $10)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(event.action.as_str())
        .bind(event.actor_id)
        .bind(actor_email)
        .bind(event.resource_type)
        .bind(event.resource_id)
        .bind(ip)
        .bind(user_agent)
        .bind(metadata)
        .bind(event.success)
        .bind(event.error_message)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert audit entry")?;
    Ok(())
}

/// One persisted audit row, as returned by the query helpers.
#[derive(Debug)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: bool,
    pub created_at_unix: i64,
}

const ENTRY_COLUMNS: &str = r"id, action, actor_id, actor_email, resource_type, resource_id,
             success, EXTRACT(EPOCH FROM created_at)::BIGINT AS created_at_unix";

fn entry_from_row(row: &sqlx::postgres::PgRow) -> AuditLogEntry {
    AuditLogEntry {
        id: row.get("id"),
        action: row.get("action"),
        actor_id: row.get("actor_id"),
        actor_email: row.get("actor_email"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        success: row.get("success"),
        created_at_unix: row.get("created_at_unix"),
    }
}

/// Newest-first entries for one actor.
pub async fn recent_for_actor(
    pool: &PgPool,
    actor_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditLogEntry>> {
    let query = format!(
        r"
        SELECT {ENTRY_COLUMNS}
        FROM audit_log
        WHERE actor_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(actor_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to query audit entries by actor")?;
    Ok(rows.iter().map(entry_from_row).collect())
}

/// Newest-first entries for one resource.
pub async fn recent_for_resource(
    pool: &PgPool,
    resource_type: &str,
    resource_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<AuditLogEntry>> {
    let query = format!(
        r"
        SELECT {ENTRY_COLUMNS}
        FROM audit_log
        WHERE resource_type = $1
          AND resource_id = $2
        ORDER BY created_at DESC
        LIMIT $3 OFFSET $4
    "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(resource_type)
        .bind(resource_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to query audit entries by resource")?;
    Ok(rows.iter().map(entry_from_row).collect())
}

/// Retention sweep: delete entries older than [`RETENTION_DAYS`].
pub async fn cleanup_expired(pool: &PgPool) -> Result<u64> {
    let query = r"
        DELETE FROM audit_log
        WHERE created_at < NOW() - ($1 * INTERVAL '1 day')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(RETENTION_DAYS)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep audit entries")?;
    Ok(result.rows_affected())
}

/// Mask an email to its local part's first and last character.
pub(crate) fn mask_email(email: &str) -> String {
    let Some((local, domain)) = email.split_once('@') else {
        return REDACTION_MARKER.to_string();
    };
    let chars: Vec<char> = local.chars().collect();
    if chars.len() <= 2 {
        return format!("**@{domain}");
    }
    let first = chars[0];
    let last = chars[chars.len() - 1];
    format!("{first}***{last}@{domain}")
}

/// Truncate an IP to a coarse prefix: two IPv4 octets or four IPv6 groups.
pub(crate) fn mask_ip(ip: &str) -> String {
    if ip == "unknown" {
        return ip.to_string();
    }
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let octets = v4.octets();
            format!("{}.{}.x.x", octets[0], octets[1])
        }
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            format!(
                "{:x}:{:x}:{:x}:{:x}::",
                segments[0], segments[1], segments[2], segments[3]
            )
        }
        Err(_) => "invalid".to_string(),
    }
}

/// Bound the stored user agent length.
pub(crate) fn truncate_user_agent(user_agent: &str) -> String {
    user_agent.chars().take(MAX_USER_AGENT_LEN).collect()
}

/// Replace values under known-sensitive keys, recursively.
pub(crate) fn redact_metadata(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    if SENSITIVE_METADATA_KEYS.contains(&key.to_lowercase().as_str()) {
                        (key, Value::String(REDACTION_MARKER.to_string()))
                    } else {
                        (key, redact_metadata(value))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_metadata).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_names_are_stable() {
        assert_eq!(AuditAction::Login.as_str(), "login");
        assert_eq!(AuditAction::AccessCodeUsed.as_str(), "access_code_used");
        assert_eq!(
            AuditAction::UnauthorizedAccess.as_str(),
            "unauthorized_access"
        );
        assert_eq!(
            AuditAction::PasswordResetRequested.as_str(),
            "password_reset_requested"
        );
    }

    #[test]
    fn mask_email_keeps_first_and_last_of_local_part() {
        assert_eq!(mask_email("jane.doe@example.com"), "j***e@example.com");
        assert_eq!(mask_email("alice@schulamt.de"), "a***e@schulamt.de");
    }

    #[test]
    fn mask_email_short_local_part_fully_masked() {
        assert_eq!(mask_email("ab@example.com"), "**@example.com");
        assert_eq!(mask_email("a@example.com"), "**@example.com");
    }

    #[test]
    fn mask_email_without_at_is_redacted() {
        assert_eq!(mask_email("not-an-email"), REDACTION_MARKER);
    }

    #[test]
    fn mask_ip_truncates_ipv4() {
        assert_eq!(mask_ip("192.168.17.54"), "192.168.x.x");
    }

    #[test]
    fn mask_ip_truncates_ipv6() {
        assert_eq!(
            mask_ip("2001:db8:85a3:8d3:1319:8a2e:370:7348"),
            "2001:db8:85a3:8d3::"
        );
    }

    #[test]
    fn mask_ip_passes_unknown_and_rejects_garbage() {
        assert_eq!(mask_ip("unknown"), "unknown");
        assert_eq!(mask_ip("not-an-ip"), "invalid");
    }

    #[test]
    fn truncate_user_agent_bounds_length() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_user_agent(&long).len(), MAX_USER_AGENT_LEN);
        assert_eq!(truncate_user_agent("Mozilla/5.0"), "Mozilla/5.0");
    }

    #[test]
    fn redact_metadata_replaces_sensitive_keys() {
        let value = json!({
            "password": "hunter2",
            "accessCode": "TEST1234",
            "apiKey": "abc",
            "schoolName": "Grundschule Nord",
        });
        let redacted = redact_metadata(value);
        assert_eq!(redacted["password"], REDACTION_MARKER);
        assert_eq!(redacted["accessCode"], REDACTION_MARKER);
        assert_eq!(redacted["apiKey"], REDACTION_MARKER);
        assert_eq!(redacted["schoolName"], "Grundschule Nord");
    }

    #[test]
    fn redact_metadata_recurses_into_nested_values() {
        let value = json!({
            "request": { "Authorization": "Bearer abc", "path": "/v1/forms" },
            "attempts": [{ "token": "t1" }, { "token": "t2" }],
        });
        let redacted = redact_metadata(value);
        assert_eq!(redacted["request"]["Authorization"], REDACTION_MARKER);
        assert_eq!(redacted["request"]["path"], "/v1/forms");
        assert_eq!(redacted["attempts"][0]["token"], REDACTION_MARKER);
        assert_eq!(redacted["attempts"][1]["token"], REDACTION_MARKER);
    }

    #[test]
    fn event_builder_sets_failure_state() {
        let event = AuditEvent::new(AuditAction::Login)
            .with_actor_email("jane.doe@example.com")
            .failed("invalid credentials");
        assert!(!event.success);
        assert_eq!(event.error_message.as_deref(), Some("invalid credentials"));
        assert_eq!(event.action, AuditAction::Login);
    }
}
