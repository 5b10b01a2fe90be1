//! HTTP surface: one endpoint per contract method, plus health.
//!
//! The caller here is the surrounding application's request gate, not the
//! end user; authentication of that caller belongs to the transport in
//! front of this service.

use crate::{
    authz::PermissionResolver,
    security::{cleanup, SecurityMonitor, SecurityReporter},
};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::{delete, get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;

use handlers::{blocks, events, gate, health, report};

/// Build the API router with all routes registered.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/authz/permission", post(gate::check_permission))
        .route("/authz/role", post(gate::check_role))
        .route("/authz/scope", post(gate::check_scope))
        .route(
            "/authz/principals/:id/permissions",
            get(gate::list_effective_permissions),
        )
        .route("/authz/principals/:id/overrides", post(gate::grant_override))
        .route(
            "/authz/principals/:id/overrides/:code",
            delete(gate::revoke_override),
        )
        .route("/events/login", post(events::record_login))
        .route("/events/second-factor", post(events::record_second_factor))
        .route(
            "/events/sensitive-action",
            post(events::record_sensitive_action),
        )
        .route("/blocks/origins/:ip", get(blocks::origin_block))
        .route("/blocks/principals/:id", get(blocks::principal_block))
        .route("/reports/security", get(report::security_report))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, dsn: String, cleanup_interval: u64) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let resolver = Arc::new(PermissionResolver::new(pool.clone()));
    let monitor = Arc::new(SecurityMonitor::new(pool.clone()));
    let reporter = Arc::new(SecurityReporter::new(pool.clone()));

    // Storage hygiene only; block expiry is enforced by every read.
    cleanup::spawn_cleanup_task(pool, Duration::from_secs(cleanup_interval));

    let app = router().layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(Extension(resolver))
            .layer(Extension(monitor))
            .layer(Extension(reporter)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        method = %request.method(),
        path,
        request_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_builds() {
        // Route registration panics on malformed paths; building is the test.
        let _router: Router = router();
    }
}
