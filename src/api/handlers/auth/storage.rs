//! Database helpers for sessions and staff accounts.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AuthConfig;
use super::utils::{generate_token, hash_token, is_unique_violation};

/// Minimal data returned for a valid session cookie.
pub(crate) struct SessionRecord {
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) role: String,
}

/// Account fields consulted during login.
pub(super) struct LoginUser {
    pub(super) id: Uuid,
    pub(super) email: String,
    pub(super) password_hash: String,
    pub(super) role: String,
    pub(super) active: bool,
    pub(super) email_verified: bool,
    pub(super) locked: bool,
}

/// Create a session row and return the raw cookie token.
///
/// Only the hash is stored. Expiry is pinned at creation time; later
/// activity never extends it.
pub(crate) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
    config: &AuthConfig,
) -> Result<String> {
    let query = r"
        INSERT INTO user_sessions
            (user_id, session_hash, expires_at, last_activity_at, created_ip, created_user_agent)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'), NOW(), $4, $5)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_token()?;
        let token_hash = hash_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(config.session_duration_seconds())
            .bind(ip)
            .bind(user_agent)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session hash into its owner, enforcing every validity condition:
/// hard expiry, inactivity window, account active, account not locked.
///
/// On a hit, `last_activity_at` is refreshed. A lost refresh under concurrent
/// requests only means slightly earlier idle expiry; the validity checks
/// themselves are a single consistent read.
pub(crate) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
    config: &AuthConfig,
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT users.id, users.email, users.role
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
          AND user_sessions.last_activity_at > NOW() - ($2 * INTERVAL '1 second')
          AND users.active
          AND (users.locked_until IS NULL OR users.locked_until <= NOW())
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(config.inactivity_timeout_seconds())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    if row.is_none() {
        return Ok(None);
    }

    // Sliding refresh of the inactivity window; absolute expiry is untouched.
    let query = r"
        UPDATE user_sessions
        SET last_activity_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session last_activity_at")?;

    Ok(row.map(|row| SessionRecord {
        user_id: row.get("id"),
        email: row.get("email"),
        role: row.get("role"),
    }))
}

/// Remove one session row. Logout is idempotent; it's fine if nothing matches.
pub(crate) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Force-invalidate every session of one user (used after password reset, so
/// old credentials cannot retain live sessions).
pub(super) async fn delete_all_user_sessions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> Result<u64> {
    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to delete user sessions")?;
    Ok(result.rows_affected())
}

/// Periodic sweep of sessions dead from either clock.
pub(crate) async fn cleanup_expired_sessions(pool: &PgPool, config: &AuthConfig) -> Result<u64> {
    let query = r"
        DELETE FROM user_sessions
        WHERE expires_at <= NOW()
           OR last_activity_at <= NOW() - ($1 * INTERVAL '1 second')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(config.inactivity_timeout_seconds())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep sessions")?;
    Ok(result.rows_affected())
}

/// Look up login data by normalized email.
pub(super) async fn lookup_login_user(pool: &PgPool, email: &str) -> Result<Option<LoginUser>> {
    let query = r"
        SELECT id, email, password_hash, role, active, email_verified,
               (locked_until IS NOT NULL AND locked_until > NOW()) AS locked
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login user")?;

    Ok(row.map(|row| LoginUser {
        id: row.get("id"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        role: row.get("role"),
        active: row.get("active"),
        email_verified: row.get("email_verified"),
        locked: row.get("locked"),
    }))
}

/// Count a failed attempt; lock the account once the threshold is reached.
/// Returns the updated attempt count.
pub(super) async fn record_failed_login(
    pool: &PgPool,
    user_id: Uuid,
    config: &AuthConfig,
) -> Result<i32> {
    let query = r"
        UPDATE users
        SET failed_login_attempts = failed_login_attempts + 1,
            locked_until = CASE
                WHEN failed_login_attempts + 1 >= $2
                THEN NOW() + ($3 * INTERVAL '1 second')
                ELSE locked_until
            END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING failed_login_attempts
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(config.max_failed_logins())
        .bind(config.lockout_seconds())
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to record failed login")?;
    Ok(row.get("failed_login_attempts"))
}

/// Reset the lockout counters after a successful login.
pub(super) async fn clear_failed_logins(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = r"
        UPDATE users
        SET failed_login_attempts = 0,
            locked_until = NULL,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to clear failed logins")?;
    Ok(())
}

/// Store a new password hash and clear any lockout, returning the user id.
pub(super) async fn update_password(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    password_hash: &str,
) -> Result<Option<Uuid>> {
    let query = r"
        UPDATE users
        SET password_hash = $2,
            failed_login_attempts = 0,
            locked_until = NULL,
            updated_at = NOW()
        WHERE email = $1
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update password")?;
    Ok(row.map(|row| row.get("id")))
}

/// Flag the account's email address as verified.
pub(super) async fn mark_email_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET email_verified = TRUE,
            updated_at = NOW()
        WHERE email = $1
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::{LoginUser, SessionRecord};
    use uuid::Uuid;

    #[test]
    fn session_record_holds_values() {
        let record = SessionRecord {
            user_id: Uuid::nil(),
            email: "staff@schulamt.de".to_string(),
            role: "ADMIN".to_string(),
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert_eq!(record.email, "staff@schulamt.de");
        assert_eq!(record.role, "ADMIN");
    }

    #[test]
    fn login_user_holds_flags() {
        let user = LoginUser {
            id: Uuid::nil(),
            email: "staff@schulamt.de".to_string(),
            password_hash: "$argon2id$stub".to_string(),
            role: "SUPERADMIN".to_string(),
            active: true,
            email_verified: false,
            locked: false,
        };
        assert!(user.active);
        assert!(!user.email_verified);
        assert!(!user.locked);
        assert_eq!(user.role, "SUPERADMIN");
    }
}
