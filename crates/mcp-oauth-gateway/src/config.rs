//! Configuration for the OAuth gateway.

use std::time::Duration;

use anyhow::Context;
use jsonwebtoken::Algorithm;

/// Default values for the gateway configuration.
pub mod defaults {
    use std::time::Duration;

    /// GitHub authorization page.
    pub const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";

    /// GitHub code exchange endpoint.
    pub const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";

    /// GitHub REST API.
    pub const GITHUB_API_URL: &str = "https://api.github.com";

    /// Scope requested from GitHub.
    pub const GITHUB_SCOPE: &str = "user:email";

    /// Access token lifetime (30 minutes).
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(1800);

    /// Refresh token lifetime (1 year).
    pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(31_536_000);

    /// Pending authorization state lifetime (5 minutes).
    pub const SESSION_TIMEOUT: Duration = Duration::from_secs(300);

    /// Authorization code lifetime. Long on purpose, codes are still single-use.
    pub const AUTH_CODE_LIFETIME: Duration = Duration::from_secs(31_536_000);

    /// Registered client lifetime (90 days).
    pub const CLIENT_LIFETIME: Duration = Duration::from_secs(7_776_000);

    /// Timeout for calls to the upstream identity provider.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

    /// Connection timeout for the upstream identity provider.
    pub const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Scope granted when the client asks for none.
    pub const DEFAULT_SCOPE: &str = "openid profile email";

    /// Scopes advertised in server metadata.
    pub const SCOPES_SUPPORTED: &[&str] = &["openid", "profile", "email"];

    /// Upper bound for every configured lifetime (10 years).
    pub const MAX_LIFETIME: Duration = Duration::from_secs(315_360_000);
}

/// Gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// Public issuer URL, e.g. `https://auth.example.com`. No trailing slash.
    pub issuer: String,

    /// GitHub OAuth app client id.
    pub github_client_id: String,

    /// GitHub OAuth app client secret.
    pub github_client_secret: String,

    /// GitHub authorization page (overridable for tests).
    pub github_authorize_url: String,

    /// GitHub code exchange endpoint (overridable for tests).
    pub github_token_url: String,

    /// GitHub REST API base (overridable for tests).
    pub github_api_url: String,

    /// HMAC secret for signing access tokens.
    pub jwt_secret: String,

    /// JWT signing algorithm.
    pub jwt_algorithm: Algorithm,

    /// Redis connection string. `None` selects the in-process store.
    pub redis_url: Option<String>,

    pub access_token_lifetime: Duration,

    pub refresh_token_lifetime: Duration,

    /// Lifetime of a pending `/authorize` → `/callback` round trip.
    pub session_timeout: Duration,

    pub auth_code_lifetime: Duration,

    /// Lifetime of registered clients. Zero means clients never expire.
    pub client_lifetime: Duration,

    /// GitHub usernames allowed to log in. `None` allows everyone.
    pub allowed_users: Option<Vec<String>>,

    /// Issue a new refresh token on every refresh grant.
    pub rotate_refresh_tokens: bool,

    /// Timeout for upstream HTTP calls.
    pub upstream_timeout: Duration,

    /// Connection timeout for upstream HTTP calls.
    pub upstream_connect_timeout: Duration,
}

impl Config {
    /// Create a configuration with default lifetimes and GitHub endpoints.
    #[must_use]
    pub fn new(
        issuer: impl Into<String>,
        github_client_id: impl Into<String>,
        github_client_secret: impl Into<String>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into().trim_end_matches('/').to_string(),
            github_client_id: github_client_id.into(),
            github_client_secret: github_client_secret.into(),
            github_authorize_url: defaults::GITHUB_AUTHORIZE_URL.to_string(),
            github_token_url: defaults::GITHUB_TOKEN_URL.to_string(),
            github_api_url: defaults::GITHUB_API_URL.to_string(),
            jwt_secret: jwt_secret.into(),
            jwt_algorithm: Algorithm::HS256,
            redis_url: None,
            access_token_lifetime: defaults::ACCESS_TOKEN_LIFETIME,
            refresh_token_lifetime: defaults::REFRESH_TOKEN_LIFETIME,
            session_timeout: defaults::SESSION_TIMEOUT,
            auth_code_lifetime: defaults::AUTH_CODE_LIFETIME,
            client_lifetime: defaults::CLIENT_LIFETIME,
            allowed_users: None,
            rotate_refresh_tokens: false,
            upstream_timeout: defaults::UPSTREAM_TIMEOUT,
            upstream_connect_timeout: defaults::UPSTREAM_CONNECT_TIMEOUT,
        }
    }

    /// Create a test configuration with GitHub endpoints on a mock server.
    #[must_use]
    pub fn for_testing(upstream_base: &str) -> Self {
        let upstream_base = upstream_base.trim_end_matches('/');
        Self {
            github_authorize_url: format!("{upstream_base}/login/oauth/authorize"),
            github_token_url: format!("{upstream_base}/login/oauth/access_token"),
            github_api_url: upstream_base.to_string(),
            upstream_timeout: Duration::from_secs(5),
            upstream_connect_timeout: Duration::from_secs(2),
            ..Self::new(
                "https://auth.example.com",
                "gh-test-client",
                "gh-test-secret",
                "test-jwt-secret-that-is-long-enough",
            )
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if a required variable is missing or a value is invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let issuer = match std::env::var("ISSUER_URL") {
            Ok(url) => url,
            Err(_) => {
                let domain = required("BASE_DOMAIN")?;
                format!("https://auth.{domain}")
            }
        };

        let mut config = Self::new(
            issuer,
            required("GITHUB_CLIENT_ID")?,
            required("GITHUB_CLIENT_SECRET")?,
            required("GATEWAY_JWT_SECRET")?,
        );

        if let Ok(alg) = std::env::var("JWT_ALGORITHM") {
            config.jwt_algorithm = parse_algorithm(&alg)?;
        }
        config.redis_url = std::env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        if let Some(lifetime) = seconds("ACCESS_TOKEN_LIFETIME")? {
            config.access_token_lifetime = lifetime;
        }
        if let Some(lifetime) = seconds("REFRESH_TOKEN_LIFETIME")? {
            config.refresh_token_lifetime = lifetime;
        }
        if let Some(lifetime) = seconds("SESSION_TIMEOUT")? {
            config.session_timeout = lifetime;
        }
        if let Some(lifetime) = seconds("AUTH_CODE_LIFETIME")? {
            config.auth_code_lifetime = lifetime;
        }
        if let Some(lifetime) = seconds("CLIENT_LIFETIME")? {
            config.client_lifetime = lifetime;
        }
        if let Some(timeout) = seconds("UPSTREAM_TIMEOUT")? {
            config.upstream_timeout = timeout;
        }

        config.allowed_users = std::env::var("ALLOWED_GITHUB_USERS")
            .ok()
            .and_then(|raw| parse_allowed_users(&raw));

        if let Ok(raw) = std::env::var("ROTATE_REFRESH_TOKENS") {
            config.rotate_refresh_tokens = raw
                .parse()
                .with_context(|| format!("ROTATE_REFRESH_TOKENS must be true or false, got {raw:?}"))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check lifetimes and timeouts.
    ///
    /// Every lifetime is capped at [`defaults::MAX_LIFETIME`]. Only the client
    /// lifetime may be zero.
    ///
    /// # Errors
    ///
    /// Returns error naming the first out-of-range setting.
    pub fn validate(&self) -> anyhow::Result<()> {
        let lifetimes = [
            ("ACCESS_TOKEN_LIFETIME", self.access_token_lifetime, false),
            ("REFRESH_TOKEN_LIFETIME", self.refresh_token_lifetime, false),
            ("SESSION_TIMEOUT", self.session_timeout, false),
            ("AUTH_CODE_LIFETIME", self.auth_code_lifetime, false),
            ("CLIENT_LIFETIME", self.client_lifetime, true),
            ("UPSTREAM_TIMEOUT", self.upstream_timeout, false),
        ];
        for (name, lifetime, zero_allowed) in lifetimes {
            if lifetime.is_zero() && !zero_allowed {
                anyhow::bail!("{name} must be at least one second");
            }
            if lifetime > defaults::MAX_LIFETIME {
                anyhow::bail!(
                    "{name} must not exceed {} seconds, got {}",
                    defaults::MAX_LIFETIME.as_secs(),
                    lifetime.as_secs()
                );
            }
        }
        Ok(())
    }

    /// Whether registered clients live forever.
    #[must_use]
    pub fn clients_are_eternal(&self) -> bool {
        self.client_lifetime.is_zero()
    }

    /// Whether a GitHub user may log in.
    #[must_use]
    pub fn is_user_allowed(&self, username: &str) -> bool {
        match &self.allowed_users {
            None => true,
            Some(users) => users.iter().any(|u| u == "*" || u.eq_ignore_ascii_case(username)),
        }
    }

    #[must_use]
    pub fn authorization_endpoint(&self) -> String {
        format!("{}/authorize", self.issuer)
    }

    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}/token", self.issuer)
    }

    #[must_use]
    pub fn registration_endpoint(&self) -> String {
        format!("{}/register", self.issuer)
    }

    /// RFC 7592 management URI for one client.
    #[must_use]
    pub fn registration_client_uri(&self, client_id: &str) -> String {
        format!("{}/register/{client_id}", self.issuer)
    }

    /// Where GitHub sends the user back to.
    #[must_use]
    pub fn callback_endpoint(&self) -> String {
        format!("{}/callback", self.issuer)
    }

    #[must_use]
    pub fn jwks_uri(&self) -> String {
        format!("{}/jwks", self.issuer)
    }

    #[must_use]
    pub fn revocation_endpoint(&self) -> String {
        format!("{}/revoke", self.issuer)
    }

    #[must_use]
    pub fn introspection_endpoint(&self) -> String {
        format!("{}/introspect", self.issuer)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("issuer", &self.issuer)
            .field("github_client_id", &self.github_client_id)
            .field("jwt_algorithm", &self.jwt_algorithm)
            .field("redis", &self.redis_url.is_some())
            .field("access_token_lifetime", &self.access_token_lifetime)
            .field("client_lifetime", &self.client_lifetime)
            .field("allowed_users", &self.allowed_users)
            .finish()
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name).with_context(|| format!("{name} must be set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty");
    }
    Ok(value)
}

fn seconds(name: &str) -> anyhow::Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("{name} must be a number of seconds, got {raw:?}"))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

/// Parse a JWT algorithm name. Only HMAC algorithms are supported.
pub fn parse_algorithm(name: &str) -> anyhow::Result<Algorithm> {
    match name.trim().to_ascii_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => anyhow::bail!("unsupported JWT_ALGORITHM {other:?}, expected HS256, HS384 or HS512"),
    }
}

/// Parse `ALLOWED_GITHUB_USERS`. An empty list or `*` allows everyone.
pub fn parse_allowed_users(raw: &str) -> Option<Vec<String>> {
    let users: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(ToString::to_string)
        .collect();

    if users.is_empty() || users.iter().any(|u| u == "*") { None } else { Some(users) }
}
