//! HTTP routing for the authorization server.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::oauth::{AuthorizationFlow, ClientRegistry, TokenService, handlers};
use crate::config::Config;
use crate::store::Store;

/// Shared state for HTTP handlers.
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub registry: ClientRegistry,
    pub flow: AuthorizationFlow,
    pub tokens: TokenService,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").field("issuer", &self.config.issuer).finish()
    }
}

/// Create the HTTP router with every OAuth endpoint.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/.well-known/oauth-authorization-server", get(handlers::handle_auth_server_metadata))
        .route("/.well-known/oauth-protected-resource", get(handlers::handle_protected_resource))
        .route("/jwks", get(handlers::handle_jwks))
        .route("/register", post(handlers::handle_register))
        .route(
            "/register/{client_id}",
            get(handlers::handle_client_read)
                .put(handlers::handle_client_update)
                .delete(handlers::handle_client_delete),
        )
        .route("/authorize", get(handlers::handle_authorize))
        .route("/callback", get(handlers::handle_callback))
        .route("/token", post(handlers::handle_token))
        .route("/verify", get(handlers::handle_verify).post(handlers::handle_verify))
        .route("/revoke", post(handlers::handle_revoke))
        .route("/introspect", post(handlers::handle_introspect))
        .route("/success", get(handlers::handle_success_page))
        .route("/error", get(handlers::handle_error_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "service": "mcp-oauth-gateway",
                "version": env!("CARGO_PKG_VERSION")
            })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed: store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "unavailable",
                    "service": "mcp-oauth-gateway",
                    "version": env!("CARGO_PKG_VERSION")
                })),
            )
        }
    }
}
