//! Authorization endpoints consumed by the request gate.
//!
//! A denial and a resolver outage both answer `allowed: false`; only
//! malformed input surfaces as 4xx, so nothing about internal state leaks
//! through the decision path.

use axum::{
    extract::{Path, Query},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::authz::{AccessLevel, EffectivePermission, OverrideOutcome, PermissionResolver};

#[derive(Debug, Deserialize)]
pub struct PermissionCheck {
    pub principal_id: Uuid,
    pub permission: String,
}

#[derive(Debug, Deserialize)]
pub struct RoleCheck {
    pub principal_id: Uuid,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ScopeCheck {
    pub principal_id: Uuid,
    pub scope_id: Uuid,
    pub minimum_level: AccessLevel,
}

#[derive(Debug, Serialize)]
pub struct Decision {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub actor_id: Uuid,
    pub permission: String,
    pub granted: bool,
}

#[derive(Debug, Deserialize)]
pub struct RevokeParams {
    pub actor_id: Uuid,
}

pub async fn check_permission(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Json(body): Json<PermissionCheck>,
) -> Result<Json<Decision>, StatusCode> {
    match resolver
        .has_permission(body.principal_id, &body.permission)
        .await
    {
        Ok(allowed) => Ok(Json(Decision { allowed })),
        Err(_) => Err(StatusCode::BAD_REQUEST),
    }
}

pub async fn check_role(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Json(body): Json<RoleCheck>,
) -> Result<Json<Decision>, StatusCode> {
    match resolver.has_role(body.principal_id, &body.role).await {
        Ok(allowed) => Ok(Json(Decision { allowed })),
        Err(_) => Err(StatusCode::BAD_REQUEST),
    }
}

pub async fn check_scope(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Json(body): Json<ScopeCheck>,
) -> Result<Json<Decision>, StatusCode> {
    match resolver
        .has_scoped_access(body.principal_id, body.scope_id, body.minimum_level)
        .await
    {
        Ok(allowed) => Ok(Json(Decision { allowed })),
        Err(_) => Err(StatusCode::BAD_REQUEST),
    }
}

pub async fn list_effective_permissions(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Path(principal_id): Path<Uuid>,
) -> Json<Vec<EffectivePermission>> {
    Json(resolver.effective_permissions(principal_id).await)
}

pub async fn grant_override(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Path(principal_id): Path<Uuid>,
    Json(body): Json<OverrideRequest>,
) -> StatusCode {
    match resolver
        .grant_override(body.actor_id, principal_id, &body.permission, body.granted)
        .await
    {
        Ok(OverrideOutcome::Applied) => StatusCode::NO_CONTENT,
        Ok(OverrideOutcome::UnknownPrincipal | OverrideOutcome::UnknownPermission) => {
            StatusCode::NOT_FOUND
        }
        Err(err) => {
            error!("Override grant failed for {principal_id}: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn revoke_override(
    Extension(resolver): Extension<Arc<PermissionResolver>>,
    Path((principal_id, code)): Path<(Uuid, String)>,
    Query(params): Query<RevokeParams>,
) -> StatusCode {
    match resolver
        .revoke_override(params.actor_id, principal_id, &code)
        .await
    {
        Ok(OverrideOutcome::Applied) => StatusCode::NO_CONTENT,
        Ok(OverrideOutcome::UnknownPrincipal | OverrideOutcome::UnknownPermission) => {
            StatusCode::NOT_FOUND
        }
        Err(err) => {
            error!("Override revoke failed for {principal_id}: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
