//! Event ingestion endpoints.
//!
//! These always answer 202 once the payload is well-formed: the monitor
//! swallows bookkeeping failures so the triggering request never fails on
//! audit-trail trouble.

use axum::{http::StatusCode, Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::valid_identifier;
use crate::security::{Origin, SecurityMonitor};

#[derive(Debug, Deserialize)]
pub struct LoginEvent {
    pub principal_id: Option<Uuid>,
    pub identifier: String,
    pub success: bool,
    #[serde(default)]
    pub origin: Origin,
    pub detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct SecondFactorEvent {
    pub principal_id: Uuid,
    pub success: bool,
    pub attempt_type: String,
    #[serde(default)]
    pub origin: Origin,
}

#[derive(Debug, Deserialize)]
pub struct SensitiveActionEvent {
    pub principal_id: Uuid,
    pub action: String,
    #[serde(default)]
    pub detail: serde_json::Value,
    #[serde(default)]
    pub origin: Origin,
}

pub async fn record_login(
    Extension(monitor): Extension<Arc<SecurityMonitor>>,
    Json(body): Json<LoginEvent>,
) -> StatusCode {
    if !valid_identifier(&body.identifier) {
        return StatusCode::BAD_REQUEST;
    }

    monitor
        .record_login_attempt(
            body.principal_id,
            &body.identifier,
            body.success,
            &body.origin,
            body.detail,
        )
        .await;

    StatusCode::ACCEPTED
}

pub async fn record_second_factor(
    Extension(monitor): Extension<Arc<SecurityMonitor>>,
    Json(body): Json<SecondFactorEvent>,
) -> StatusCode {
    if body.attempt_type.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    monitor
        .record_second_factor_attempt(
            body.principal_id,
            body.success,
            &body.attempt_type,
            &body.origin,
        )
        .await;

    StatusCode::ACCEPTED
}

pub async fn record_sensitive_action(
    Extension(monitor): Extension<Arc<SecurityMonitor>>,
    Json(body): Json<SensitiveActionEvent>,
) -> StatusCode {
    if body.action.is_empty() {
        return StatusCode::BAD_REQUEST;
    }

    monitor
        .record_sensitive_action(body.principal_id, &body.action, body.detail, &body.origin)
        .await;

    StatusCode::ACCEPTED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_event_deserializes_without_origin() {
        let body: LoginEvent = serde_json::from_str(
            r#"{
                "identifier": "admin@example.com",
                "success": false
            }"#,
        )
        .expect("valid login event body");
        assert!(body.principal_id.is_none());
        assert!(body.origin.ip.is_none());
        assert!(!body.success);
    }

    #[test]
    fn sensitive_action_defaults_detail_to_null() {
        let body: SensitiveActionEvent = serde_json::from_str(
            r#"{
                "principal_id": "00000000-0000-0000-0000-000000000000",
                "action": "rates.update"
            }"#,
        )
        .expect("valid sensitive action body");
        assert!(body.detail.is_null());
    }
}
