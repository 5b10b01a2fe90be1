//! Block registry: temporarily blocked origins and principals.
//!
//! Origin blocks live in `blocked_origins` keyed by address; principal
//! blocks live on the users row. Both writes are atomic upserts with
//! latest-expiry-wins, so concurrent rule firings for the same subject
//! converge on one row with the later expiry instead of erroring.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::models::Block;

pub(crate) async fn block_origin(
    pool: &PgPool,
    ip: &str,
    reason: &str,
    duration: Duration,
) -> Result<()> {
    let query = r"
        INSERT INTO blocked_origins (ip_address, reason, expires_at)
        VALUES ($1::inet, $2, NOW() + ($3 * INTERVAL '1 second'))
        ON CONFLICT (ip_address) DO UPDATE SET
            expires_at = GREATEST(blocked_origins.expires_at, EXCLUDED.expires_at),
            reason = EXCLUDED.reason,
            updated_at = NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(ip)
        .bind(reason)
        .bind(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert origin block")?;
    Ok(())
}

pub(crate) async fn block_principal(
    pool: &PgPool,
    principal_id: Uuid,
    reason: &str,
    duration: Duration,
) -> Result<()> {
    let query = r"
        UPDATE users
        SET blocked_until = GREATEST(
                COALESCE(blocked_until, TO_TIMESTAMP(0)),
                NOW() + ($2 * INTERVAL '1 second')
            ),
            block_reason = $3,
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
        .bind(principal_id)
        .bind(i64::try_from(duration.as_secs()).unwrap_or(i64::MAX))
        .bind(reason)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to block principal")?;
    Ok(())
}

/// Active origin block, if any. Expired rows are invisible here even
/// before the cleanup task prunes them.
pub(crate) async fn active_origin_block(pool: &PgPool, ip: &str) -> Result<Option<Block>> {
    let query = r"
        SELECT reason, expires_at
        FROM blocked_origins
        WHERE ip_address = $1::inet
          AND expires_at > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(ip)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup origin block")?;

    Ok(row.map(|row| Block {
        reason: row.get("reason"),
        expires_at: row.get::<DateTime<Utc>, _>("expires_at"),
    }))
}

/// Active principal block, if any.
pub(crate) async fn active_principal_block(
    pool: &PgPool,
    principal_id: Uuid,
) -> Result<Option<Block>> {
    let query = r"
        SELECT COALESCE(block_reason, '') AS reason, blocked_until
        FROM users
        WHERE id = $1
          AND blocked_until > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal block")?;

    Ok(row.map(|row| Block {
        reason: row.get("reason"),
        expires_at: row.get::<DateTime<Utc>, _>("blocked_until"),
    }))
}
