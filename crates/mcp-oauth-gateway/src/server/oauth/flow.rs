//! Federated authorization: `/authorize` → GitHub → `/callback`.
//!
//! ```text
//! START ──/authorize──▶ AWAITING_UPSTREAM ──/callback──▶ CODE_ISSUED
//!   │                          │
//!   └── bad client/redirect    └── bad state, upstream failure, not allowed
//!         (400, no redirect)         ──▶ REJECTED (error redirect)
//! ```
//!
//! Failures before the redirect URI is validated are answered directly.
//! Everything after is reported to the client through its redirect URI.

use std::sync::Arc;

use serde::Deserialize;

use super::pkce::{self, CodeChallengeMethod};
use super::random_token;
use super::registry::{ClientRegistry, OOB_REDIRECT_URI};
use super::types::{AuthorizationCode, AuthorizationState};
use crate::config::Config;
use crate::error::{ErrorCode, OAuthError, OAuthResult};
use crate::store::{Store, keys, ttl_for};
use crate::upstream::GitHubClient;

/// Query parameters of `GET /authorize`.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeRequest {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Query parameters GitHub sends to `GET /callback`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Where a flow step sends the browser next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowRedirect {
    /// To GitHub's authorization page (307).
    Upstream(String),
    /// Back to the client's redirect URI (302).
    Client(String),
    /// To one of this server's own pages (302).
    Page(String),
}

impl FlowRedirect {
    #[must_use]
    pub fn location(&self) -> &str {
        match self {
            Self::Upstream(url) | Self::Client(url) | Self::Page(url) => url,
        }
    }
}

/// Orchestrates the login round trip through GitHub.
#[derive(Clone)]
pub struct AuthorizationFlow {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    registry: ClientRegistry,
    upstream: GitHubClient,
}

impl AuthorizationFlow {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<Config>,
        registry: ClientRegistry,
        upstream: GitHubClient,
    ) -> Self {
        Self { store, config, registry, upstream }
    }

    /// Validate an authorization request and send the user to GitHub.
    pub async fn authorize(&self, req: AuthorizeRequest) -> OAuthResult<FlowRedirect> {
        let Some(client_id) = req.client_id.as_deref().filter(|id| !id.is_empty()) else {
            return Err(OAuthError::invalid_request("client_id is required"));
        };
        let Some(client) = self.registry.find(client_id).await? else {
            tracing::warn!(client_id = %client_id, "Authorization request for unknown client");
            return Err(OAuthError::unknown_client("Unknown client_id"));
        };

        let Some(redirect_uri) = req.redirect_uri.as_deref().filter(|u| !u.is_empty()) else {
            return Err(OAuthError::invalid_request("redirect_uri is required"));
        };
        if !client.has_redirect_uri(redirect_uri) {
            tracing::warn!(client_id = %client_id, "redirect_uri not registered for client");
            return Err(OAuthError::invalid_redirect_uri(
                "redirect_uri is not registered for this client",
            ));
        }

        // redirect_uri is trusted from here on
        let state = req.state.as_deref();

        if req.response_type.as_deref() != Some("code") {
            return Ok(client_error(
                redirect_uri,
                ErrorCode::UnsupportedResponseType,
                "Only response_type=code is supported",
                state,
            ));
        }

        let code_challenge_method = match req.code_challenge.as_deref() {
            Some(challenge) if !pkce::is_valid_challenge(challenge) => {
                return Ok(client_error(
                    redirect_uri,
                    ErrorCode::InvalidRequest,
                    "code_challenge must be 43-128 unreserved characters",
                    state,
                ));
            }
            Some(_) => match CodeChallengeMethod::parse(req.code_challenge_method.as_deref()) {
                Some(method) => Some(method),
                None => {
                    return Ok(client_error(
                        redirect_uri,
                        ErrorCode::InvalidRequest,
                        "Unsupported code_challenge_method",
                        state,
                    ));
                }
            },
            None => None,
        };

        let pending = AuthorizationState {
            client_id: client.client_id.clone(),
            redirect_uri: redirect_uri.to_owned(),
            scope: req
                .scope
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| client.scope.clone()),
            state: req.state.clone(),
            code_challenge: req.code_challenge.clone(),
            code_challenge_method,
        };

        let auth_state = random_token(32);
        if let Err(e) = self
            .store
            .set_json(&keys::state(&auth_state), &pending, ttl_for(self.config.session_timeout))
            .await
        {
            tracing::error!(error = %e, "Failed to persist authorization state");
            return Ok(client_error(
                redirect_uri,
                ErrorCode::ServerError,
                "Temporary storage failure",
                state,
            ));
        }

        let upstream_url =
            match self.upstream.authorization_url(&self.config.callback_endpoint(), &auth_state) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!(error = %e, "Invalid upstream authorization URL");
                    return Ok(client_error(
                        redirect_uri,
                        ErrorCode::ServerError,
                        "Upstream misconfigured",
                        state,
                    ));
                }
            };

        tracing::info!(client_id = %client.client_id, "Redirecting to GitHub for authorization");
        Ok(FlowRedirect::Upstream(upstream_url))
    }

    /// Complete the GitHub round trip and issue an authorization code.
    pub async fn callback(&self, query: CallbackQuery) -> FlowRedirect {
        let Some(auth_state) = query.state.as_deref().filter(|s| !s.is_empty()) else {
            return error_page(ErrorCode::InvalidRequest, "Missing state parameter");
        };

        // Single use: the state is consumed whatever happens next
        let pending: AuthorizationState = match self.store.take_json(&keys::state(auth_state)).await
        {
            Ok(Some(pending)) => pending,
            Ok(None) => {
                tracing::warn!("Callback with unknown or expired state");
                return error_page(
                    ErrorCode::InvalidRequest,
                    "Authorization session expired or invalid. Please start again.",
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load authorization state");
                return error_page(ErrorCode::ServerError, "Temporary storage failure");
            }
        };

        let redirect_uri = pending.redirect_uri.as_str();
        let client_state = pending.state.as_deref();

        if let Some(error) = query.error.as_deref() {
            tracing::info!(
                client_id = %pending.client_id,
                error = %error,
                description = query.error_description.as_deref().unwrap_or(""),
                "GitHub returned an error"
            );
            return client_error(
                redirect_uri,
                ErrorCode::AccessDenied,
                "The user denied the request",
                client_state,
            );
        }

        let Some(code) = query.code.as_deref().filter(|c| !c.is_empty()) else {
            return client_error(
                redirect_uri,
                ErrorCode::InvalidRequest,
                "Missing code parameter",
                client_state,
            );
        };

        let github_token =
            match self.upstream.exchange_code(code, &self.config.callback_endpoint()).await {
                Ok(token) => token,
                Err(e) => {
                    tracing::error!(client_id = %pending.client_id, error = %e, "GitHub code exchange failed");
                    return client_error(
                        redirect_uri,
                        ErrorCode::ServerError,
                        "Failed to authenticate with GitHub",
                        client_state,
                    );
                }
            };

        let user = match self.upstream.fetch_user(&github_token).await {
            Ok(user) => user,
            Err(e) => {
                tracing::error!(client_id = %pending.client_id, error = %e, "GitHub profile lookup failed");
                return client_error(
                    redirect_uri,
                    ErrorCode::ServerError,
                    "Failed to fetch GitHub profile",
                    client_state,
                );
            }
        };

        if !self.config.is_user_allowed(&user.login) {
            tracing::warn!(username = %user.login, "GitHub user not on allow-list");
            return client_error(
                redirect_uri,
                ErrorCode::AccessDenied,
                "User is not authorized to access this service",
                client_state,
            );
        }

        let record = AuthorizationCode {
            client_id: pending.client_id.clone(),
            redirect_uri: pending.redirect_uri.clone(),
            scope: pending.scope.clone(),
            user_id: user.id.to_string(),
            username: user.login.clone(),
            email: user.email,
            name: user.name,
            code_challenge: pending.code_challenge.clone(),
            code_challenge_method: pending.code_challenge_method,
        };

        let code = random_token(32);
        if let Err(e) = self
            .store
            .set_json(&keys::code(&code), &record, ttl_for(self.config.auth_code_lifetime))
            .await
        {
            tracing::error!(error = %e, "Failed to persist authorization code");
            return client_error(
                redirect_uri,
                ErrorCode::ServerError,
                "Temporary storage failure",
                client_state,
            );
        }

        tracing::info!(
            client_id = %record.client_id,
            username = %record.username,
            "Issued authorization code"
        );

        if redirect_uri == OOB_REDIRECT_URI {
            return FlowRedirect::Page(with_params(
                "/success",
                &[("code", Some(code.as_str())), ("state", client_state)],
            ));
        }
        FlowRedirect::Client(with_params(
            redirect_uri,
            &[("code", Some(code.as_str())), ("state", client_state)],
        ))
    }
}

impl std::fmt::Debug for AuthorizationFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlow").finish()
    }
}

/// Redirect back to the client with an OAuth error.
fn client_error(
    redirect_uri: &str,
    code: ErrorCode,
    description: &str,
    state: Option<&str>,
) -> FlowRedirect {
    if redirect_uri == OOB_REDIRECT_URI {
        return error_page(code, description);
    }
    FlowRedirect::Client(with_params(
        redirect_uri,
        &[
            ("error", Some(code.as_str())),
            ("error_description", Some(description)),
            ("state", state),
        ],
    ))
}

fn error_page(code: ErrorCode, description: &str) -> FlowRedirect {
    FlowRedirect::Page(with_params(
        "/error",
        &[("error", Some(code.as_str())), ("error_description", Some(description))],
    ))
}

/// Append query parameters, keeping any query already on the base URI.
fn with_params(base: &str, params: &[(&str, Option<&str>)]) -> String {
    let present = params.iter().filter_map(|(k, v)| v.map(|v| (*k, v)));

    match url::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(present);
            url.into()
        }
        // Server-relative paths such as "/error"
        Err(_) => {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(present)
                .finish();
            let separator = if base.contains('?') { '&' } else { '?' };
            format!("{base}{separator}{query}")
        }
    }
}
