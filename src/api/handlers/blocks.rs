//! Block registry lookups, consulted by the gate before any authorization
//! check so blocked subjects are rejected without leaking grant state.

use axum::{extract::Path, http::StatusCode, Extension, Json};
use std::sync::Arc;
use uuid::Uuid;

use crate::security::{Block, SecurityMonitor};

pub async fn origin_block(
    Extension(monitor): Extension<Arc<SecurityMonitor>>,
    Path(ip): Path<String>,
) -> Result<Json<Block>, StatusCode> {
    if ip.parse::<std::net::IpAddr>().is_err() {
        return Err(StatusCode::BAD_REQUEST);
    }

    match monitor.is_origin_blocked(&ip).await {
        Some(block) => Ok(Json(block)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

pub async fn principal_block(
    Extension(monitor): Extension<Arc<SecurityMonitor>>,
    Path(principal_id): Path<Uuid>,
) -> Result<Json<Block>, StatusCode> {
    match monitor.is_principal_blocked(principal_id).await {
        Some(block) => Ok(Json(block)),
        None => Err(StatusCode::NOT_FOUND),
    }
}
