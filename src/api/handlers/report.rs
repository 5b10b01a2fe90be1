//! On-demand security report.

use axum::{extract::Query, http::StatusCode, Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

use crate::security::{SecurityReport, SecurityReporter};

const DEFAULT_WINDOW_DAYS: i64 = 7;
const MAX_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Deserialize)]
pub struct ReportParams {
    pub days: Option<i64>,
}

pub async fn security_report(
    Extension(reporter): Extension<Arc<SecurityReporter>>,
    Query(params): Query<ReportParams>,
) -> Result<Json<SecurityReport>, StatusCode> {
    let days = params.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(StatusCode::BAD_REQUEST);
    }

    match reporter.generate_report(days).await {
        Ok(report) => Ok(Json(report)),
        Err(err) => {
            error!("Report generation failed: {err:#}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds() {
        assert!((1..=MAX_WINDOW_DAYS).contains(&DEFAULT_WINDOW_DAYS));
        assert!(!(1..=MAX_WINDOW_DAYS).contains(&0));
        assert!(!(1..=MAX_WINDOW_DAYS).contains(&365));
    }
}
