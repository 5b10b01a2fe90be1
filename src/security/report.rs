//! Read-only aggregation over events and alerts for a trailing window.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::Instrument;

use super::models::Alert;

const RECENT_ALERT_LIMIT: i64 = 10;
const TOP_THREAT_LIMIT: i64 = 5;
const FAILED_ATTEMPTS_RECOMMENDATION_FLOOR: i64 = 100;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReportSummary {
    pub total_events: i64,
    pub successful_events: i64,
    pub failed_events: i64,
    pub distinct_origins: i64,
    pub distinct_principals: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatOrigin {
    pub ip_address: String,
    pub failed_attempts: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub period_days: i64,
    pub generated_at: DateTime<Utc>,
    pub summary: ReportSummary,
    pub alerts: Vec<Alert>,
    pub top_threats: Vec<ThreatOrigin>,
    pub recommendations: Vec<String>,
}

/// Derived view over the event log and alerts; produces no side effects.
#[derive(Debug, Clone)]
pub struct SecurityReporter {
    pool: PgPool,
}

impl SecurityReporter {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Aggregate the trailing `window_days`. An empty event log yields
    /// zeroed counts and empty lists, not an error.
    ///
    /// # Errors
    /// Returns an error if the underlying store is unreachable.
    pub async fn generate_report(&self, window_days: i64) -> Result<SecurityReport> {
        let summary = self.summary(window_days).await?;
        let alerts = self.recent_alerts(window_days).await?;
        let top_threats = self.top_threats(window_days).await?;

        let mut recommendations = Vec::new();
        if summary.failed_events > FAILED_ATTEMPTS_RECOMMENDATION_FLOOR {
            recommendations
                .push("Consider enabling stricter rate limiting on login endpoints".to_string());
        }
        if alerts.iter().any(|alert| alert.severity == "CRITICAL") {
            recommendations.push("Review critical alerts immediately".to_string());
        }

        Ok(SecurityReport {
            period_days: window_days,
            generated_at: Utc::now(),
            summary,
            alerts,
            top_threats,
            recommendations,
        })
    }

    async fn summary(&self, window_days: i64) -> Result<ReportSummary> {
        // The window bound is a bind parameter, never interpolated.
        let query = r"
            SELECT
                COUNT(*) AS total_events,
                COUNT(*) FILTER (WHERE success) AS successful_events,
                COUNT(*) FILTER (WHERE NOT success) AS failed_events,
                COUNT(DISTINCT ip_address) AS distinct_origins,
                COUNT(DISTINCT user_id) AS distinct_principals
            FROM security_events
            WHERE created_at > NOW() - ($1 * INTERVAL '1 day')
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(window_days)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to aggregate event summary")?;

        Ok(ReportSummary {
            total_events: row.get("total_events"),
            successful_events: row.get("successful_events"),
            failed_events: row.get("failed_events"),
            distinct_origins: row.get("distinct_origins"),
            distinct_principals: row.get("distinct_principals"),
        })
    }

    async fn recent_alerts(&self, window_days: i64) -> Result<Vec<Alert>> {
        let query = r"
            SELECT alert_type, severity, detail, created_at
            FROM security_alerts
            WHERE created_at > NOW() - ($1 * INTERVAL '1 day')
            ORDER BY created_at DESC
            LIMIT $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(window_days)
            .bind(RECENT_ALERT_LIMIT)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list recent alerts")?;

        Ok(rows
            .into_iter()
            .map(|row| Alert {
                alert_type: row.get("alert_type"),
                severity: row.get("severity"),
                detail: row.get("detail"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn top_threats(&self, window_days: i64) -> Result<Vec<ThreatOrigin>> {
        let query = r"
            SELECT ip_address::text AS ip_address, COUNT(*) AS failed_attempts
            FROM security_events
            WHERE success = FALSE
              AND ip_address IS NOT NULL
              AND created_at > NOW() - ($1 * INTERVAL '1 day')
            GROUP BY ip_address
            ORDER BY failed_attempts DESC
            LIMIT $2
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let rows = sqlx::query(query)
            .bind(window_days)
            .bind(TOP_THREAT_LIMIT)
            .fetch_all(&self.pool)
            .instrument(span)
            .await
            .context("failed to list top failing origins")?;

        Ok(rows
            .into_iter()
            .map(|row| ThreatOrigin {
                ip_address: row.get("ip_address"),
                failed_attempts: row.get("failed_attempts"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::models::{EventKind, Origin};
    use crate::security::monitor::SecurityMonitor;
    use crate::test_util::test_pool;

    #[tokio::test]
    async fn empty_log_yields_zeroed_report() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let reporter = SecurityReporter::new(pool);

        let report = reporter.generate_report(7).await?;
        assert_eq!(report.period_days, 7);
        assert_eq!(report.summary.total_events, 0);
        assert_eq!(report.summary.failed_events, 0);
        assert_eq!(report.summary.distinct_origins, 0);
        assert!(report.alerts.is_empty());
        assert!(report.top_threats.is_empty());
        assert!(report.recommendations.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn report_aggregates_events_and_alerts() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let monitor = SecurityMonitor::new(pool.clone());
        let reporter = SecurityReporter::new(pool);

        monitor
            .record_login_attempt(
                None,
                "ok@example.com",
                true,
                &Origin::from_ip("203.0.113.20"),
                None,
            )
            .await;
        for _ in 0..5 {
            monitor
                .record_login_attempt(
                    None,
                    "victim@example.com",
                    false,
                    &Origin::from_ip("203.0.113.21"),
                    None,
                )
                .await;
        }

        let report = reporter.generate_report(1).await?;
        assert_eq!(report.summary.total_events, 6);
        assert_eq!(report.summary.successful_events, 1);
        assert_eq!(report.summary.failed_events, 5);
        assert_eq!(report.summary.distinct_origins, 2);

        // The fifth failure raised an alert and its origin tops the list.
        assert!(!report.alerts.is_empty());
        assert_eq!(report.top_threats.len(), 1);
        assert_eq!(report.top_threats[0].ip_address, "203.0.113.21");
        assert_eq!(report.top_threats[0].failed_attempts, 5);
        Ok(())
    }

    #[tokio::test]
    async fn report_serializes_for_the_api() -> Result<()> {
        let Some(pool) = test_pool().await? else {
            return Ok(());
        };
        let reporter = SecurityReporter::new(pool);

        let report = reporter.generate_report(7).await?;
        let value = serde_json::to_value(&report)?;
        assert!(value.get("summary").is_some());
        assert!(value.get("alerts").is_some());
        assert!(value.get("top_threats").is_some());
        Ok(())
    }

    #[test]
    fn event_kind_is_used_in_report_queries() {
        // Window queries filter on the stable wire names.
        assert_eq!(EventKind::LoginAttempt.as_str(), "LOGIN_ATTEMPT");
    }
}
