//! Public HTTP listener: mounts the MCP streamable-HTTP transport at
//! `/mcp`, the OAuth issuer surface (when enabled), and `/healthz`/`/metrics`.
//!
//! Built on the usual `ServiceBuilder` middleware stack
//! (`TraceLayer`/`CorsLayer` composition, `axum::serve` over a bound
//! `TcpListener`). Every MCP-facing call goes through
//! [`crate::mcp::McpServer`] rather than a REST route per operation.

pub mod response;

use crate::auth::AuthService;
use crate::config::HttpConfig;
use crate::mcp::McpServer;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;

/// Assembles the full router: MCP transport, optional OAuth issuer surface,
/// and the unauthenticated health/metrics endpoints.
pub fn build_router(mcp: McpServer, auth: Option<Arc<AuthService>>, config: &HttpConfig) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest_service("/mcp", mcp.streamable_http_service());

    if let Some(auth) = auth {
        router = router.merge(auth.router());
    }

    router.layer(
        ServiceBuilder::new()
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(false))
                    .on_response(DefaultOnResponse::new().level(tracing::Level::INFO).latency_unit(LatencyUnit::Millis)),
            )
            .layer(cors_layer(config)),
    )
}

/// Restrictive by default: only origins the operator explicitly lists are
/// allowed; with none configured, no cross-origin requests are permitted
/// at all.
fn cors_layer(config: &HttpConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION]);

    match &config.allowed_origins {
        Some(origins) if !origins.is_empty() => {
            let parsed: Vec<HeaderValue> = origins
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok())
                .collect();
            layer.allow_origin(parsed)
        }
        _ => layer,
    }
}

/// Binds `config.host:config.port` and serves `router` until the process is
/// torn down. Shutdown itself is driven by [`crate::signals::wait_for_shutdown`]
/// in the caller, not by this function.
pub async fn serve(router: Router, config: &HttpConfig) -> crate::error::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let socket_addr: SocketAddr = addr
        .parse()
        .map_err(|e| crate::error::GatewayError::config(format!("invalid http address {addr}: {e}")))?;

    tracing::info!(addr = %socket_addr, "http listener starting");
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;
    axum::serve(listener, router)
        .await
        .map_err(|e| crate::error::GatewayError::internal(format!("http server error: {e}")))?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn metrics_handler() -> std::result::Result<(StatusCode, String), response::ApiErrorResponse> {
    let metrics = crate::telemetry::get_metrics().map_err(response::ApiErrorResponse)?;
    Ok((StatusCode::OK, metrics))
}
