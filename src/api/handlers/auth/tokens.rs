//! Single-use expiring tokens for password reset and email verification.
//!
//! Both kinds share one table and one contract: at most one active token per
//! (email, kind), consumable exactly once, rejected after expiry. Verifying
//! and consuming are separate operations so a UI can confirm a token is
//! still good before rendering a reset form, without burning it.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::utils::{generate_token, hash_token};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TokenKind {
    PasswordReset,
    EmailVerification,
}

impl TokenKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::PasswordReset => "password_reset",
            Self::EmailVerification => "email_verification",
        }
    }
}

/// Issue a fresh token for the email, invalidating any prior active one.
///
/// Returns the raw token for the email link; only its hash is stored.
pub(super) async fn create_token(
    pool: &PgPool,
    email: &str,
    kind: TokenKind,
    ttl_seconds: i64,
) -> Result<String> {
    let mut tx = pool.begin().await.context("begin token transaction")?;

    // At most one active token per (email, kind).
    let query = r"
        DELETE FROM auth_tokens
        WHERE email = $1
          AND kind = $2
          AND used_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(kind.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete prior tokens")?;

    let token = generate_token()?;
    let token_hash = hash_token(&token);

    let query = r"
        INSERT INTO auth_tokens (token_hash, email, kind, expires_at)
        VALUES ($1, $2, $3, NOW() + ($4 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .bind(email)
        .bind(kind.as_str())
        .bind(ttl_seconds)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert token")?;

    tx.commit().await.context("commit token transaction")?;

    Ok(token)
}

/// Resolve a raw token to its email without consuming it.
///
/// Returns `None` for unknown, already-used, and expired tokens alike.
pub(super) async fn verify_token(
    pool: &PgPool,
    token: &str,
    kind: TokenKind,
) -> Result<Option<String>> {
    let token_hash = hash_token(token);
    let query = r"
        SELECT email
        FROM auth_tokens
        WHERE token_hash = $1
          AND kind = $2
          AND used_at IS NULL
          AND expires_at > NOW()
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
        .bind(kind.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to verify token")?;
    Ok(row.map(|row| row.get("email")))
}

/// Consume a token, returning its email exactly once.
///
/// The conditional update (`used_at` set only while still null) is the atomic
/// primitive that stops two concurrent requests from both treating a
/// single-use token as fresh.
pub(super) async fn consume_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token: &str,
    kind: TokenKind,
) -> Result<Option<String>> {
    let token_hash = hash_token(token);
    let query = r"
        UPDATE auth_tokens
        SET used_at = NOW()
        WHERE token_hash = $1
          AND kind = $2
          AND used_at IS NULL
          AND expires_at > NOW()
        RETURNING email
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .bind(kind.as_str())
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume token")?;
    Ok(row.map(|row| row.get("email")))
}

/// Storage hygiene: drop rows that are expired or already used.
pub(crate) async fn cleanup_expired_tokens(pool: &PgPool) -> Result<u64> {
    let query = r"
        DELETE FROM auth_tokens
        WHERE expires_at <= NOW()
           OR used_at IS NOT NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to sweep tokens")?;
    Ok(result.rows_affected())
}

/// Cooldown check for resend flows: was a token created recently?
pub(super) async fn has_recent_token(
    pool: &PgPool,
    email: &str,
    kind: TokenKind,
    cooldown_seconds: i64,
) -> Result<bool> {
    let query = r"
        SELECT 1
        FROM auth_tokens
        WHERE email = $1
          AND kind = $2
          AND created_at > NOW() - ($3 * INTERVAL '1 second')
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
        .bind(kind.as_str())
        .bind(cooldown_seconds)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to check token cooldown")?;
    Ok(row.is_some())
}

#[cfg(test)]
mod tests {
    use super::TokenKind;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(TokenKind::PasswordReset.as_str(), "password_reset");
        assert_eq!(TokenKind::EmailVerification.as_str(), "email_verification");
    }
}
