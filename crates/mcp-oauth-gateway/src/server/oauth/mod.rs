//! OAuth 2.1 authorization server.
//!
//! Brokers GitHub logins and issues its own tokens to MCP clients.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7636: PKCE (S256, plain)
//! - RFC 7591 / 7592: Dynamic Client Registration and Management
//! - RFC 7009: Token Revocation
//! - RFC 7662: Token Introspection
//! - RFC 8414: Authorization Server Metadata
//! - RFC 9728: Protected Resource Metadata

pub mod flow;
pub mod handlers;
pub mod jwt;
pub mod pages;
pub mod pkce;
pub mod registry;
pub mod tokens;
pub mod types;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;

pub use flow::AuthorizationFlow;
pub use jwt::JwtCodec;
pub use registry::ClientRegistry;
pub use tokens::TokenService;

/// Generate a URL-safe random token from `bytes` bytes of OS entropy.
#[must_use]
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Current Unix time in seconds.
#[must_use]
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Unix time `lifetime` after `issued_at`, saturating at `i64::MAX`.
#[must_use]
pub fn expires_at(issued_at: i64, lifetime: std::time::Duration) -> i64 {
    i64::try_from(lifetime.as_secs()).map_or(i64::MAX, |secs| issued_at.saturating_add(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_token_shape() {
        let token = random_token(32);
        assert_eq!(token.len(), 43);
        assert!(token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
        assert_ne!(token, random_token(32));
    }

    #[test]
    fn test_expires_at_saturates() {
        assert_eq!(expires_at(100, std::time::Duration::from_secs(50)), 150);
        assert_eq!(expires_at(100, std::time::Duration::from_secs(u64::MAX)), i64::MAX);
    }
}
