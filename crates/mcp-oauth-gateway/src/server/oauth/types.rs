//! OAuth 2.0 records persisted in the store.

use serde::{Deserialize, Serialize};

use super::pkce::CodeChallengeMethod;

/// A dynamically registered OAuth client (RFC 7591).
#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub client_id_issued_at: i64,
    /// Unix time the secret expires, `0` for never.
    pub client_secret_expires_at: i64,
    pub registration_access_token: String,
    pub redirect_uris: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
    pub scope: String,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tos_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contacts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
}

impl OAuthClient {
    /// Whether the client secret has passed its expiry.
    #[must_use]
    pub fn secret_expired(&self, now: i64) -> bool {
        self.client_secret_expires_at != 0 && now >= self.client_secret_expires_at
    }

    #[must_use]
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

impl std::fmt::Debug for OAuthClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClient")
            .field("client_id", &self.client_id)
            .field("client_name", &self.client_name)
            .field("redirect_uris", &self.redirect_uris)
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .finish()
    }
}

/// A pending `/authorize` request waiting for GitHub to call back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationState {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    /// The client's own `state`, echoed back on redirect.
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

/// An authorization code issued after upstream login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationCode {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
}

/// Claims carried by every access token, also stored under its `jti`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub scope: String,
    pub client_id: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
}

/// Server-side record of an opaque refresh token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub client_id: String,
    pub scope: String,
    pub created_at: i64,
}

/// Identity shared by codes and refresh tokens, used to mint access tokens.
#[derive(Debug, Clone)]
pub struct Grant {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub client_id: String,
    pub scope: String,
}

impl From<&AuthorizationCode> for Grant {
    fn from(code: &AuthorizationCode) -> Self {
        Self {
            user_id: code.user_id.clone(),
            username: code.username.clone(),
            email: code.email.clone(),
            name: code.name.clone(),
            client_id: code.client_id.clone(),
            scope: code.scope.clone(),
        }
    }
}

impl From<&RefreshTokenRecord> for Grant {
    fn from(record: &RefreshTokenRecord) -> Self {
        Self {
            user_id: record.user_id.clone(),
            username: record.username.clone(),
            email: record.email.clone(),
            name: record.name.clone(),
            client_id: record.client_id.clone(),
            scope: record.scope.clone(),
        }
    }
}

/// Successful `/token` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
}
