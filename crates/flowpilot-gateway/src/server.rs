//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use flowpilot_core::config::GatewayConfig;
use flowpilot_engine::ProcessEngine;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProcessEngine>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(engine: Arc<ProcessEngine>) -> Router {
    let state = Arc::new(AppState {
        engine,
        start_time: std::time::Instant::now(),
    });

    Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        .route("/api/v1/info", get(super::routes::system_info))
        .route("/api/v1/processes", post(super::routes::save_process))
        .route("/api/v1/processes/{name}", get(super::routes::get_process))
        .route(
            "/api/v1/processes/{name}",
            delete(super::routes::delete_process),
        )
        .route("/api/v1/actions", get(super::routes::list_actions))
        .route(
            "/api/v1/actions/approvals",
            get(super::routes::list_approvals),
        )
        .route(
            "/api/v1/actions/{id}/approve",
            post(super::routes::approve_action),
        )
        .route(
            "/api/v1/actions/{id}/reject",
            post(super::routes::reject_action),
        )
        .route("/api/v1/log", get(super::routes::query_log))
        .route(
            "/api/v1/portal/stages/{name}",
            get(super::routes::portal_stages),
        )
        .layer({
            let cors = CorsLayer::new()
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(Any)
                .max_age(std::time::Duration::from_secs(3600));

            // Restrict CORS origins in production via env var, e.g.
            // FLOWPILOT_CORS_ORIGINS=https://app.example.com,https://portal.example.com
            if let Ok(origins_str) = std::env::var("FLOWPILOT_CORS_ORIGINS") {
                let origins: Vec<_> = origins_str
                    .split(',')
                    .filter_map(|s| s.trim().parse::<axum::http::HeaderValue>().ok())
                    .collect();
                cors.allow_origin(origins)
            } else {
                cors.allow_origin(Any)
            }
        })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, engine: Arc<ProcessEngine>) -> anyhow::Result<()> {
    let app = build_router(engine);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
