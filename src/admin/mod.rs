//! Admin interface: a Unix-domain-socket Axum server, mode 0600, entirely
//! separate from the public HTTP listener so it can never be reachable over
//! the network.
//!
//! Mounted on its own `UnixListener` rather than sharing the public
//! `TcpListener`, following the same "second `Router`, second listener"
//! pattern the public/admin split elsewhere in this codebase uses.

use crate::reload::ReloadCoordinator;
use crate::storage::TokenStore;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

pub struct AdminState {
    pub reload: Arc<ReloadCoordinator>,
    pub store: Arc<dyn TokenStore>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(reload: Arc<ReloadCoordinator>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            reload,
            store,
            started_at: Instant::now(),
        }
    }
}

fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/reload", post(reload))
        .route("/auth/sessions", get(list_sessions))
        .route("/auth/sessions/{id}", delete(delete_session))
        .route("/auth/cleanup", post(cleanup))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn status(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    Json(json!({
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "inFlightRequests": state.reload.in_flight(),
        "reloadGeneration": state.reload.current_number(),
    }))
}

async fn reload(State(state): State<Arc<AdminState>>) -> Response {
    match state.reload.reload(None).await {
        Ok(generation) => (StatusCode::OK, Json(json!({"generation": generation}))).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "admin-triggered reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response()
        }
    }
}

async fn list_sessions(State(state): State<Arc<AdminState>>) -> Response {
    match state.store.list_sessions().await {
        Ok(sessions) => {
            let summaries: Vec<_> = sessions
                .iter()
                .map(|s| {
                    json!({
                        "sessionId": s.session_id,
                        "userId": s.user.user_id,
                        "provider": s.user.provider,
                        "createdAt": s.created_at,
                        "expiresAt": s.expires_at,
                    })
                })
                .collect();
            Json(json!({"sessions": summaries})).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn delete_session(State(state): State<Arc<AdminState>>, Path(id): Path<String>) -> Response {
    match state.store.delete_session(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

async fn cleanup(State(state): State<Arc<AdminState>>) -> Response {
    match state.store.delete_expired().await {
        Ok(count) => Json(json!({"deleted": count})).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"error": e.to_string()}))).into_response(),
    }
}

/// Binds the admin socket at `path` (removing any stale socket file left
/// over from an unclean shutdown), sets its permissions to 0600, and serves
/// until the process is torn down.
pub async fn serve(path: impl AsRef<std::path::Path>, state: Arc<AdminState>) -> crate::error::Result<()> {
    let path = path.as_ref();
    if path.exists() {
        std::fs::remove_file(path)
            .map_err(|e| crate::error::GatewayError::config(format!("removing stale admin socket {}: {e}", path.display())))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let listener = tokio::net::UnixListener::bind(path)
        .map_err(|e| crate::error::GatewayError::config(format!("binding admin socket {}: {e}", path.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| crate::error::GatewayError::config(format!("setting admin socket permissions: {e}")))?;
    }

    tracing::info!(path = %path.display(), "admin interface listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| crate::error::GatewayError::internal(format!("admin server error: {e}")))?;
    Ok(())
}
