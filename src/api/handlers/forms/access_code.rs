//! Access-code generation, normalization, and lookup.
//!
//! Codes are the only credential a school ever gets: 8 characters over
//! `[A-Z0-9]`, bound 1:1 to a form at creation time. Generation retries a
//! bounded number of times against existing codes; if every attempt collides
//! the code grows to 10 characters and is accepted without another check —
//! the enlarged space makes a collision astronomically unlikely, and the
//! unique constraint on the column turns any remaining race into an explicit
//! insert failure instead of a silent duplicate.

use anyhow::{Context, Result};
use rand::{rngs::OsRng, RngCore};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

pub(crate) const CODE_LENGTH: usize = 8;
pub(crate) const FALLBACK_CODE_LENGTH: usize = 10;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_GENERATION_ATTEMPTS: usize = 5;

/// Random code over the restricted alphabet.
pub(crate) fn generate_code(length: usize) -> Result<String> {
    let mut bytes = vec![0u8; length];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate access code")?;
    Ok(bytes
        .iter()
        .map(|byte| CODE_ALPHABET[*byte as usize % CODE_ALPHABET.len()] as char)
        .collect())
}

/// Normalize raw user input for redemption.
///
/// Returns `None` for anything that cannot be a code (wrong length or
/// characters outside the alphabet), so malformed input is rejected before
/// any storage lookup.
pub(crate) fn normalize_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_uppercase();
    if code.len() != CODE_LENGTH && code.len() != FALLBACK_CODE_LENGTH {
        return None;
    }
    if !code.bytes().all(|byte| CODE_ALPHABET.contains(&byte)) {
        return None;
    }
    Some(code)
}

/// Produce a code that is unique among persisted codes, within the bounded
/// retry/fallback policy described in the module docs.
pub(super) async fn issue_code(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<String> {
    for _ in 0..MAX_GENERATION_ATTEMPTS {
        let code = generate_code(CODE_LENGTH)?;
        if !code_exists(tx, &code).await? {
            return Ok(code);
        }
    }
    generate_code(FALLBACK_CODE_LENGTH)
}

async fn code_exists(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, code: &str) -> Result<bool> {
    let query = "SELECT 1 FROM access_codes WHERE code = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check access code uniqueness")?;
    Ok(row.is_some())
}

/// Bind a code to its form. Both rows live in the caller's transaction.
pub(super) async fn insert_access_code(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    code: &str,
    form_id: Uuid,
) -> Result<()> {
    let query = "INSERT INTO access_codes (code, form_id) VALUES ($1, $2)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(code)
        .bind(form_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert access code")?;
    Ok(())
}

/// Form fields a school sees after redeeming its code.
pub(crate) struct FormRecord {
    pub(crate) id: Uuid,
    pub(crate) school_name: String,
    pub(crate) title: String,
    pub(crate) status: String,
}

/// Resolve a normalized code to its form.
pub(super) async fn lookup_form_by_code(pool: &PgPool, code: &str) -> Result<Option<FormRecord>> {
    let query = r"
        SELECT forms.id, forms.school_name, forms.title, forms.status
        FROM access_codes
        JOIN forms ON forms.id = access_codes.form_id
        WHERE access_codes.code = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(code)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup form by access code")?;

    Ok(row.map(|row| FormRecord {
        id: row.get("id"),
        school_name: row.get("school_name"),
        title: row.get("title"),
        status: row.get("status"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_code_shape(code: &str, length: usize) {
        assert_eq!(code.len(), length);
        assert!(code.bytes().all(|byte| CODE_ALPHABET.contains(&byte)));
    }

    #[test]
    fn generated_codes_use_the_restricted_alphabet() -> anyhow::Result<()> {
        for _ in 0..100 {
            assert_code_shape(&generate_code(CODE_LENGTH)?, CODE_LENGTH);
        }
        assert_code_shape(
            &generate_code(FALLBACK_CODE_LENGTH)?,
            FALLBACK_CODE_LENGTH,
        );
        Ok(())
    }

    #[test]
    fn thousand_codes_do_not_collide() -> anyhow::Result<()> {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(generate_code(CODE_LENGTH)?));
        }
        Ok(())
    }

    #[test]
    fn normalize_code_trims_and_uppercases() {
        assert_eq!(
            normalize_code(" test1234 ").as_deref(),
            Some("TEST1234")
        );
        assert_eq!(normalize_code("TEST1234").as_deref(), Some("TEST1234"));
        assert_eq!(
            normalize_code("ab12cd34ef").as_deref(),
            Some("AB12CD34EF")
        );
    }

    #[test]
    fn normalize_code_rejects_malformed_input() {
        assert_eq!(normalize_code("???"), None);
        assert_eq!(normalize_code(""), None);
        assert_eq!(normalize_code("short"), None);
        assert_eq!(normalize_code("toolongforacode"), None);
        assert_eq!(normalize_code("TEST-123"), None);
        assert_eq!(normalize_code("TEST123ä"), None);
    }
}
