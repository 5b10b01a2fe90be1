//! Sliding-window threshold rules over the event log.
//!
//! Rule set (closed, compile-time constants, never caller-supplied):
//!
//! | rule | window | threshold | action |
//! |---|---|---|---|
//! | failed logins per identifier/origin | 1h | 5 | HIGH alert + 30m origin block |
//! | failing origins per identifier | 1h | 3 distinct | HIGH alert, no block |
//! | failed 2FA per principal | 30m | 3 | MEDIUM alert + 15m principal block |
//!
//! The `record_*` methods never fail the triggering request: losing one
//! audit entry is preferable to failing the user-facing action, so every
//! bookkeeping error is logged and swallowed.

use serde_json::json;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use super::blocks;
use super::events::{self, NewEvent};
use super::models::{AlertType, Block, EventKind, Origin};

const FAILED_LOGIN_WINDOW: Duration = Duration::from_secs(60 * 60);
const FAILED_LOGIN_THRESHOLD: i64 = 5;
const LOGIN_BLOCK_DURATION: Duration = Duration::from_secs(30 * 60);

const DISTINCT_ORIGIN_WINDOW: Duration = Duration::from_secs(60 * 60);
const DISTINCT_ORIGIN_THRESHOLD: i64 = 3;

const FAILED_2FA_WINDOW: Duration = Duration::from_secs(30 * 60);
const FAILED_2FA_THRESHOLD: i64 = 3;
const TWO_FACTOR_BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);

const ORIGIN_BLOCK_REASON: &str = "Multiple failed login attempts";
const PRINCIPAL_BLOCK_REASON: &str = "Multiple failed 2FA attempts";

/// Consumes authentication events, evaluates the rule set, and maintains
/// the block registry. Constructed once at startup and shared by
/// reference.
#[derive(Debug, Clone)]
pub struct SecurityMonitor {
    pool: PgPool,
}

impl SecurityMonitor {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a login attempt and, on failure, evaluate the login rules.
    pub async fn record_login_attempt(
        &self,
        principal_id: Option<Uuid>,
        identifier: &str,
        success: bool,
        origin: &Origin,
        detail: Option<serde_json::Value>,
    ) {
        let appended = events::insert_event(
            &self.pool,
            NewEvent {
                kind: EventKind::LoginAttempt,
                principal_id,
                identifier: Some(identifier),
                origin,
                success,
                detail,
            },
        )
        .await;
        if let Err(err) = appended {
            error!("Failed to record login attempt for {identifier}: {err:#}");
            return;
        }

        if !success {
            self.evaluate_login_rules(identifier, origin).await;
        }
    }

    /// Append a second-factor attempt and, on failure, evaluate the 2FA rule.
    pub async fn record_second_factor_attempt(
        &self,
        principal_id: Uuid,
        success: bool,
        attempt_type: &str,
        origin: &Origin,
    ) {
        let appended = events::insert_event(
            &self.pool,
            NewEvent {
                kind: EventKind::SecondFactorAttempt,
                principal_id: Some(principal_id),
                identifier: None,
                origin,
                success,
                detail: Some(json!({ "attempt_type": attempt_type })),
            },
        )
        .await;
        if let Err(err) = appended {
            error!("Failed to record 2FA attempt for {principal_id}: {err:#}");
            return;
        }

        if !success {
            self.evaluate_second_factor_rule(principal_id, origin).await;
        }
    }

    /// Append a sensitive action. Audit trail only; never triggers blocking.
    pub async fn record_sensitive_action(
        &self,
        principal_id: Uuid,
        action: &str,
        detail: serde_json::Value,
        origin: &Origin,
    ) {
        let appended = events::insert_event(
            &self.pool,
            NewEvent {
                kind: EventKind::SensitiveAction,
                principal_id: Some(principal_id),
                identifier: None,
                origin,
                success: true,
                detail: Some(json!({ "action": action, "detail": detail })),
            },
        )
        .await;
        if let Err(err) = appended {
            error!("Failed to record sensitive action {action} for {principal_id}: {err:#}");
        }
    }

    /// Active block for a network origin, checked by the gate before the
    /// resolver so a blocked subject learns nothing about its grants.
    /// A registry lookup failure is logged and reported as "no block".
    pub async fn is_origin_blocked(&self, ip: &str) -> Option<Block> {
        match blocks::active_origin_block(&self.pool, ip).await {
            Ok(block) => block,
            Err(err) => {
                error!("Origin block lookup failed for {ip}: {err:#}");
                None
            }
        }
    }

    /// Active block for a principal.
    pub async fn is_principal_blocked(&self, principal_id: Uuid) -> Option<Block> {
        match blocks::active_principal_block(&self.pool, principal_id).await {
            Ok(block) => block,
            Err(err) => {
                error!("Principal block lookup failed for {principal_id}: {err:#}");
                None
            }
        }
    }

    async fn evaluate_login_rules(&self, identifier: &str, origin: &Origin) {
        let ip = origin.ip.as_deref();

        match events::count_login_failures(&self.pool, identifier, ip, FAILED_LOGIN_WINDOW).await {
            Ok(count) if count >= FAILED_LOGIN_THRESHOLD => {
                self.trigger_alert(
                    AlertType::MultipleFailedLogins,
                    json!({
                        "identifier": identifier,
                        "ip_address": ip,
                        "failed_attempts": count,
                        "window": "1 hour",
                    }),
                    ip,
                    None,
                )
                .await;
            }
            Ok(_) => {}
            Err(err) => error!("Failed-login rule evaluation failed for {identifier}: {err:#}"),
        }

        match events::count_distinct_failing_origins(&self.pool, identifier, DISTINCT_ORIGIN_WINDOW)
            .await
        {
            Ok(count) if count >= DISTINCT_ORIGIN_THRESHOLD => {
                // Origin diversity makes origin-blocking ineffective here,
                // so this rule alerts without containment.
                self.trigger_alert(
                    AlertType::MultipleIpAttempts,
                    json!({
                        "identifier": identifier,
                        "origin_count": count,
                        "window": "1 hour",
                    }),
                    None,
                    None,
                )
                .await;
            }
            Ok(_) => {}
            Err(err) => error!("Distinct-origin rule evaluation failed for {identifier}: {err:#}"),
        }
    }

    async fn evaluate_second_factor_rule(&self, principal_id: Uuid, origin: &Origin) {
        match events::count_second_factor_failures(&self.pool, principal_id, FAILED_2FA_WINDOW)
            .await
        {
            Ok(count) if count >= FAILED_2FA_THRESHOLD => {
                self.trigger_alert(
                    AlertType::MultipleFailed2fa,
                    json!({
                        "principal_id": principal_id,
                        "ip_address": origin.ip.as_deref(),
                        "failed_attempts": count,
                        "window": "30 minutes",
                    }),
                    None,
                    Some(principal_id),
                )
                .await;
            }
            Ok(_) => {}
            Err(err) => error!("2FA rule evaluation failed for {principal_id}: {err:#}"),
        }
    }

    /// Persist an alert, then apply the rule's automatic containment.
    async fn trigger_alert(
        &self,
        alert_type: AlertType,
        detail: serde_json::Value,
        block_ip: Option<&str>,
        block_principal: Option<Uuid>,
    ) {
        warn!("SECURITY ALERT {alert_type}: {detail}");

        if let Err(err) = self.insert_alert(alert_type, &detail).await {
            error!("Failed to persist {alert_type} alert: {err:#}");
        }

        match alert_type {
            AlertType::MultipleFailedLogins => {
                if let Some(ip) = block_ip {
                    if let Err(err) =
                        blocks::block_origin(&self.pool, ip, ORIGIN_BLOCK_REASON, LOGIN_BLOCK_DURATION)
                            .await
                    {
                        error!("Failed to block origin {ip}: {err:#}");
                    }
                }
            }
            AlertType::MultipleFailed2fa => {
                if let Some(principal_id) = block_principal {
                    if let Err(err) = blocks::block_principal(
                        &self.pool,
                        principal_id,
                        PRINCIPAL_BLOCK_REASON,
                        TWO_FACTOR_BLOCK_DURATION,
                    )
                    .await
                    {
                        error!("Failed to block principal {principal_id}: {err:#}");
                    }
                }
            }
            _ => {}
        }
    }

    async fn insert_alert(
        &self,
        alert_type: AlertType,
        detail: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let query = r"
            INSERT INTO security_alerts (alert_type, severity, detail)
            VALUES ($1, $2, $3::jsonb)
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(alert_type.as_str())
            .bind(alert_type.severity().as_str())
            .bind(serde_json::to_string(detail)?)
            .execute(&self.pool)
            .instrument(span)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{insert_user, test_pool, unique_email};
    use anyhow::Result;
    use chrono::Utc;
    use sqlx::Row;

    async fn alert_count(pool: &PgPool, alert_type: AlertType, needle: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM security_alerts WHERE alert_type = $1 AND detail::text LIKE $2",
        )
        .bind(alert_type.as_str())
        .bind(format!("%{needle}%"))
        .fetch_one(pool)
        .await?;
        Ok(row.get("count"))
    }

    #[tokio::test]
    async fn four_failures_do_not_block_the_fifth_does() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let ip = "203.0.113.5";
        let origin = Origin::from_ip(ip);
        let identifier = "admin@example.com";

        for _ in 0..4 {
            monitor
                .record_login_attempt(None, identifier, false, &origin, None)
                .await;
        }
        assert!(monitor.is_origin_blocked(ip).await.is_none());
        assert_eq!(
            alert_count(&pool, AlertType::MultipleFailedLogins, identifier).await?,
            0
        );

        monitor
            .record_login_attempt(None, identifier, false, &origin, None)
            .await;

        let block = monitor
            .is_origin_blocked(ip)
            .await
            .expect("fifth failure should block the origin");
        assert_eq!(block.reason, ORIGIN_BLOCK_REASON);

        // Expiry is ~30 minutes out.
        let remaining = block.expires_at - Utc::now();
        assert!(remaining.num_minutes() >= 28 && remaining.num_minutes() <= 30);

        assert!(
            alert_count(&pool, AlertType::MultipleFailedLogins, identifier).await? >= 1
        );
        Ok(())
    }

    #[tokio::test]
    async fn successful_logins_never_trip_rules() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let ip = "203.0.113.9";
        let origin = Origin::from_ip(ip);

        for _ in 0..10 {
            monitor
                .record_login_attempt(None, "ok@example.com", true, &origin, None)
                .await;
        }
        assert!(monitor.is_origin_blocked(ip).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn many_origins_alert_without_blocking() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let identifier = "probed@example.com";

        for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
            monitor
                .record_login_attempt(None, identifier, false, &Origin::from_ip(ip), None)
                .await;
        }

        assert!(
            alert_count(&pool, AlertType::MultipleIpAttempts, identifier).await? >= 1
        );
        // Origin diversity: none of the probing origins gets blocked.
        for ip in ["198.51.100.1", "198.51.100.2", "198.51.100.3"] {
            assert!(monitor.is_origin_blocked(ip).await.is_none());
        }
        Ok(())
    }

    #[tokio::test]
    async fn third_failed_second_factor_blocks_the_principal() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let user_id = insert_user(&pool, &unique_email("2fa"), "USER").await?;
        let origin = Origin::from_ip("192.0.2.77");

        for _ in 0..2 {
            monitor
                .record_second_factor_attempt(user_id, false, "totp", &origin)
                .await;
        }
        assert!(monitor.is_principal_blocked(user_id).await.is_none());

        monitor
            .record_second_factor_attempt(user_id, false, "totp", &origin)
            .await;

        let block = monitor
            .is_principal_blocked(user_id)
            .await
            .expect("third 2FA failure should block the principal");
        assert_eq!(block.reason, PRINCIPAL_BLOCK_REASON);
        let remaining = block.expires_at - Utc::now();
        assert!(remaining.num_minutes() >= 13 && remaining.num_minutes() <= 15);
        Ok(())
    }

    #[tokio::test]
    async fn sensitive_actions_are_logged_but_never_block() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let user_id = insert_user(&pool, &unique_email("sensitive"), "ADMIN").await?;
        let origin = Origin::from_ip("192.0.2.88");

        for _ in 0..10 {
            monitor
                .record_sensitive_action(
                    user_id,
                    "rates.update",
                    json!({ "rate_id": 7 }),
                    &origin,
                )
                .await;
        }

        assert!(monitor.is_principal_blocked(user_id).await.is_none());
        assert!(monitor.is_origin_blocked("192.0.2.88").await.is_none());

        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM security_events WHERE user_id = $1 AND kind = 'SENSITIVE_ACTION'",
        )
        .bind(user_id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(row.get::<i64, _>("count"), 10);
        Ok(())
    }
}
