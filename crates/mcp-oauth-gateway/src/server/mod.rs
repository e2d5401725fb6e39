//! Authorization server assembly.
//!
//! Wires the store, GitHub client, JWT codec and OAuth services together and
//! serves them over HTTP. Every piece of cross-request state lives in the
//! [`Store`], so any number of instances can run behind a load balancer.

pub mod http;
pub mod oauth;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use self::http::AppState;
use self::oauth::{AuthorizationFlow, ClientRegistry, JwtCodec, TokenService};
use crate::config::Config;
use crate::store::{MemoryStore, RedisStore, Store};
use crate::upstream::GitHubClient;

/// OAuth 2.1 authorization server fronting GitHub.
pub struct AuthServer {
    state: Arc<AppState>,
}

impl AuthServer {
    /// Create a server, connecting to Redis when `REDIS_URL` is configured.
    ///
    /// # Errors
    ///
    /// Returns error if Redis is unreachable or the HTTP client cannot be built.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn Store> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(RedisStore::connect(url).await?),
            None => {
                tracing::warn!("REDIS_URL not set, using in-memory store (single instance only)");
                Arc::new(MemoryStore::new())
            }
        };
        Self::with_store(config, store)
    }

    /// Create a server on an existing store.
    ///
    /// # Errors
    ///
    /// Returns error if a configured lifetime is out of range or the HTTP
    /// client cannot be built.
    pub fn with_store(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let upstream = GitHubClient::new(&config)?;
        let codec =
            JwtCodec::new(config.jwt_secret.as_bytes(), config.jwt_algorithm, config.issuer.clone());

        let registry = ClientRegistry::new(Arc::clone(&store), Arc::clone(&config));
        let flow = AuthorizationFlow::new(
            Arc::clone(&store),
            Arc::clone(&config),
            registry.clone(),
            upstream,
        );
        let tokens =
            TokenService::new(Arc::clone(&store), Arc::clone(&config), codec, registry.clone());

        Ok(Self { state: Arc::new(AppState { config, store, registry, flow, tokens }) })
    }

    /// The HTTP router, for embedding or testing.
    #[must_use]
    pub fn router(&self) -> Router {
        http::create_router(Arc::clone(&self.state))
    }

    /// Token operations outside HTTP, e.g. bulk revocation.
    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.state.tokens
    }

    /// Run the server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!(issuer = %self.state.config.issuer, "OAuth gateway listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for AuthServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthServer").field("state", &self.state).finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
