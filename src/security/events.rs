//! Append-only event log and the window queries the rules run over.

use anyhow::{Context, Result};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::Instrument;
use uuid::Uuid;

use super::models::{EventKind, Origin};

/// One fact to append. Events are immutable once written.
#[derive(Debug)]
pub struct NewEvent<'a> {
    pub kind: EventKind,
    pub principal_id: Option<Uuid>,
    pub identifier: Option<&'a str>,
    pub origin: &'a Origin,
    pub success: bool,
    pub detail: Option<serde_json::Value>,
}

/// Append a single event. A single-row insert, so a cancelled caller can
/// never leave a partial write behind.
pub(crate) async fn insert_event(pool: &PgPool, event: NewEvent<'_>) -> Result<()> {
    let query = r"
        INSERT INTO security_events
            (kind, user_id, identifier, ip_address, user_agent, success, detail)
        VALUES ($1, $2, $3, $4::inet, $5, $6, $7::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let detail = match event.detail {
        Some(value) => Some(
            serde_json::to_string(&value).context("failed to serialize event detail")?,
        ),
        None => None,
    };
    sqlx::query(query)
        .bind(event.kind.as_str())
        .bind(event.principal_id)
        .bind(event.identifier)
        .bind(event.origin.ip.as_deref())
        .bind(event.origin.user_agent.as_deref())
        .bind(event.success)
        .bind(detail)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to append security event")?;
    Ok(())
}

/// Failed logins within the window for an identifier or an origin; the
/// original tracks both under one rule so either dimension can trip it.
pub(crate) async fn count_login_failures(
    pool: &PgPool,
    identifier: &str,
    ip: Option<&str>,
    window: Duration,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM security_events
        WHERE kind = 'LOGIN_ATTEMPT'
          AND success = FALSE
          AND (identifier = $1 OR ip_address = $2::inet)
          AND created_at > NOW() - $3::interval
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .bind(ip)
        .bind(interval(window))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count login failures")?;
    Ok(row.get("count"))
}

/// Distinct failing origins for one identifier within the window.
pub(crate) async fn count_distinct_failing_origins(
    pool: &PgPool,
    identifier: &str,
    window: Duration,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(DISTINCT ip_address) AS count
        FROM security_events
        WHERE kind = 'LOGIN_ATTEMPT'
          AND success = FALSE
          AND identifier = $1
          AND created_at > NOW() - $2::interval
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(identifier)
        .bind(interval(window))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count distinct failing origins")?;
    Ok(row.get("count"))
}

/// Failed second-factor checks for one principal within the window.
pub(crate) async fn count_second_factor_failures(
    pool: &PgPool,
    principal_id: Uuid,
    window: Duration,
) -> Result<i64> {
    let query = r"
        SELECT COUNT(*) AS count
        FROM security_events
        WHERE kind = 'SECOND_FACTOR_ATTEMPT'
          AND success = FALSE
          AND user_id = $1
          AND created_at > NOW() - $2::interval
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(principal_id)
        .bind(interval(window))
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to count second-factor failures")?;
    Ok(row.get("count"))
}

fn interval(window: Duration) -> String {
    format!("{} seconds", window.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_pool;
    use anyhow::Result;

    #[test]
    fn interval_renders_seconds() {
        assert_eq!(interval(Duration::from_secs(3600)), "3600 seconds");
        assert_eq!(interval(Duration::from_secs(90)), "90 seconds");
    }

    #[tokio::test]
    async fn events_outside_the_window_do_not_count() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let origin = Origin::from_ip("198.51.100.7");

        insert_event(
            &pool,
            NewEvent {
                kind: EventKind::LoginAttempt,
                principal_id: None,
                identifier: Some("old@example.com"),
                origin: &origin,
                success: false,
                detail: None,
            },
        )
        .await?;

        // Age the event past the window, then verify it no longer counts.
        sqlx::query(
            "UPDATE security_events SET created_at = NOW() - INTERVAL '2 hours' WHERE identifier = $1",
        )
        .bind("old@example.com")
        .execute(&pool)
        .await?;

        let count = count_login_failures(
            &pool,
            "old@example.com",
            None,
            Duration::from_secs(3600),
        )
        .await?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn login_failures_match_identifier_or_origin() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let origin = Origin::from_ip("198.51.100.8");

        for identifier in ["a@example.com", "b@example.com"] {
            insert_event(
                &pool,
                NewEvent {
                    kind: EventKind::LoginAttempt,
                    principal_id: None,
                    identifier: Some(identifier),
                    origin: &origin,
                    success: false,
                    detail: None,
                },
            )
            .await?;
        }

        // Same origin ties both identifiers together.
        let count = count_login_failures(
            &pool,
            "a@example.com",
            Some("198.51.100.8"),
            Duration::from_secs(3600),
        )
        .await?;
        assert_eq!(count, 2);

        // Identifier alone only sees its own failure.
        let count =
            count_login_failures(&pool, "a@example.com", None, Duration::from_secs(3600)).await?;
        assert_eq!(count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn distinct_origin_count_ignores_successes() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let identifier = "probe@example.com";

        for (ip, success) in [
            ("203.0.113.1", false),
            ("203.0.113.2", false),
            ("203.0.113.3", true),
        ] {
            insert_event(
                &pool,
                NewEvent {
                    kind: EventKind::LoginAttempt,
                    principal_id: None,
                    identifier: Some(identifier),
                    origin: &Origin::from_ip(ip),
                    success,
                    detail: None,
                },
            )
            .await?;
        }

        let count =
            count_distinct_failing_origins(&pool, identifier, Duration::from_secs(3600)).await?;
        assert_eq!(count, 2);
        Ok(())
    }
}
