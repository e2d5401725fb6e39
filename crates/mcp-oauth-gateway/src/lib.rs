//! MCP OAuth Gateway
//!
//! An OAuth 2.1 authorization server that puts MCP services behind GitHub
//! login. MCP clients register themselves dynamically, send users through
//! GitHub, and receive short-lived JWT access tokens that a reverse proxy
//! checks against `/verify` on every request.
//!
//! # Features
//!
//! - **Dynamic registration**: RFC 7591 registration and RFC 7592 self-management
//! - **Authorization code + PKCE**: single-use codes, S256 and plain challenges
//! - **Revocable JWTs**: every token has a `jti` record in the store
//! - **Stateless**: Redis (or an in-process store) holds all state
//!
//! # Example
//!
//! ```no_run
//! use mcp_oauth_gateway::{config::Config, server::AuthServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = AuthServer::new(config).await?;
//!     server.run_http(8000).await
//! }
//! ```

pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod upstream;

pub use config::Config;
pub use error::{OAuthError, StoreError, UpstreamError};
pub use server::AuthServer;
