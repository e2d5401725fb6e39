//! GitHub OAuth client.
//!
//! Provides:
//! - Redirect URL construction for the GitHub authorization page
//! - Code exchange (never retried, GitHub codes are single-use)
//! - Profile lookup with retry middleware and exponential backoff

use std::time::Duration;

use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;

use crate::config::{Config, defaults};
use crate::error::{UpstreamError, UpstreamResult};

/// A GitHub user profile.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubUser {
    pub id: u64,
    pub login: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// GitHub OAuth and REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    /// Plain client for the code exchange.
    http: Client,

    /// Client with retry middleware for idempotent API reads.
    api: ClientWithMiddleware,

    client_id: String,
    client_secret: String,
    authorize_url: String,
    token_url: String,
    api_url: String,
}

impl GitHubClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static(concat!(
                "mcp-oauth-gateway/",
                env!("CARGO_PKG_VERSION")
            )),
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.upstream_timeout)
            .connect_timeout(config.upstream_connect_timeout)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(200), Duration::from_secs(2))
            .build_with_max_retries(2);

        let api = ClientBuilder::new(http.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            http,
            api,
            client_id: config.github_client_id.clone(),
            client_secret: config.github_client_secret.clone(),
            authorize_url: config.github_authorize_url.clone(),
            token_url: config.github_token_url.clone(),
            api_url: config.github_api_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the GitHub authorization page for one login attempt.
    ///
    /// # Errors
    ///
    /// Returns error if the configured authorize URL is not a valid URL.
    pub fn authorization_url(&self, callback: &str, state: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&self.authorize_url)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", callback)
            .append_pair("scope", defaults::GITHUB_SCOPE)
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange an authorization code for a GitHub access token.
    ///
    /// # Errors
    ///
    /// Returns error on transport failure, non-2xx status, or a GitHub error body.
    pub async fn exchange_code(&self, code: &str, callback: &str) -> UpstreamResult<String> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", callback),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let response = Self::check_status(response).await?;
        let body: ExchangeResponse = response.json().await?;

        // GitHub reports exchange failures with 200 and an error field
        if let Some(error) = body.error {
            tracing::warn!(
                error = %error,
                description = body.error_description.as_deref().unwrap_or(""),
                "GitHub rejected code exchange"
            );
            return Err(UpstreamError::rejected(error));
        }

        body.access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| UpstreamError::rejected("missing access_token"))
    }

    /// Fetch the authenticated user's profile.
    ///
    /// Falls back to `/user/emails` for the primary verified address when the
    /// profile email is private.
    ///
    /// # Errors
    ///
    /// Returns error if the profile request fails.
    pub async fn fetch_user(&self, access_token: &str) -> UpstreamResult<GitHubUser> {
        let url = format!("{}/user", self.api_url);
        let response = self.api.get(&url).bearer_auth(access_token).send().await?;
        let response = Self::check_status(response).await?;
        let mut user: GitHubUser = response.json().await?;

        if user.email.is_none() {
            match self.primary_email(access_token).await {
                Ok(email) => user.email = email,
                Err(e) => {
                    tracing::debug!(username = %user.login, error = %e, "No email from /user/emails");
                }
            }
        }

        Ok(user)
    }

    async fn primary_email(&self, access_token: &str) -> UpstreamResult<Option<String>> {
        let url = format!("{}/user/emails", self.api_url);
        let response = self.api.get(&url).bearer_auth(access_token).send().await?;
        let response = Self::check_status(response).await?;
        let emails: Vec<GitHubEmail> = response.json().await?;

        Ok(emails.into_iter().find(|e| e.primary && e.verified).map(|e| e.email))
    }

    async fn check_status(response: reqwest::Response) -> UpstreamResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(UpstreamError::UnexpectedStatus { status: status.as_u16(), message })
    }
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("client_id", &self.client_id)
            .field("api_url", &self.api_url)
            .finish()
    }
}
