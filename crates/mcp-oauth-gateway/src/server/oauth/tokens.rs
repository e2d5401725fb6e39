//! Token issuance, refresh, revocation, introspection and verification.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::jwt::JwtCodec;
use super::pkce::{self, CodeChallengeMethod};
use super::registry::ClientRegistry;
use super::types::{
    AuthorizationCode, Grant, OAuthClient, RefreshTokenRecord, TokenClaims, TokenResponse,
};
use super::{expires_at, now, random_token};
use crate::config::Config;
use crate::error::{OAuthError, OAuthResult, StoreResult};
use crate::store::{Store, keys, ttl_for};

/// Form body of `POST /token`.
#[derive(Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Form body of `POST /revoke` and `POST /introspect`.
#[derive(Default, Deserialize)]
pub struct TokenLookupRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// Client credentials from HTTP Basic or the form body.
#[derive(Clone, Default)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Prefer `client_secret_basic` and fall back to `client_secret_post`.
    #[must_use]
    pub fn resolve(
        basic: Option<(String, String)>,
        form_id: Option<String>,
        form_secret: Option<String>,
    ) -> Self {
        match basic {
            Some((id, secret)) => Self { client_id: Some(id), client_secret: Some(secret) },
            None => Self { client_id: form_id, client_secret: form_secret },
        }
    }
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials").field("client_id", &self.client_id).finish()
    }
}

/// RFC 7662 introspection response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    #[must_use]
    pub fn inactive() -> Self {
        Self::default()
    }

    fn from_claims(claims: TokenClaims) -> Self {
        Self {
            active: true,
            scope: Some(claims.scope),
            client_id: Some(claims.client_id),
            username: Some(claims.username),
            token_type: Some("Bearer".into()),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            iss: Some(claims.iss),
            jti: Some(claims.jti),
        }
    }
}

/// Store keys written for one issued token set, kept for rollback.
#[derive(Debug)]
struct Minted {
    response: TokenResponse,
    jti: String,
    username: String,
    refresh_token: Option<String>,
}

/// Issues and manages access and refresh tokens.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    codec: JwtCodec,
    registry: ClientRegistry,
}

impl TokenService {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        config: Arc<Config>,
        codec: JwtCodec,
        registry: ClientRegistry,
    ) -> Self {
        Self { store, config, codec, registry }
    }

    /// Handle a `/token` request.
    pub async fn exchange(
        &self,
        req: TokenRequest,
        credentials: ClientCredentials,
    ) -> OAuthResult<TokenResponse> {
        let client = self
            .registry
            .authenticate(credentials.client_id.as_deref(), credentials.client_secret.as_deref())
            .await?;

        match req.grant_type.as_deref() {
            Some("authorization_code") => self.authorization_code_grant(&client, req).await,
            Some("refresh_token") => self.refresh_token_grant(&client, req).await,
            Some(other) => Err(OAuthError::unsupported_grant_type(other)),
            None => Err(OAuthError::invalid_request("grant_type is required")),
        }
    }

    async fn authorization_code_grant(
        &self,
        client: &OAuthClient,
        req: TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let Some(code) = req.code.as_deref().filter(|c| !c.is_empty()) else {
            return Err(OAuthError::invalid_request("code is required"));
        };
        let code_key = keys::code(code);

        let Some(record): Option<AuthorizationCode> = self.store.get_json(&code_key).await? else {
            tracing::warn!(client_id = %client.client_id, "Unknown or used authorization code");
            return Err(OAuthError::invalid_grant("Invalid or expired authorization code"));
        };

        if record.client_id != client.client_id {
            tracing::warn!(
                client_id = %client.client_id,
                code_client_id = %record.client_id,
                "Authorization code presented by another client"
            );
            return Err(OAuthError::invalid_grant("Authorization code was not issued to this client"));
        }
        if req.redirect_uri.as_deref() != Some(record.redirect_uri.as_str()) {
            return Err(OAuthError::invalid_grant("redirect_uri does not match authorization request"));
        }
        if let Some(challenge) = record.code_challenge.as_deref() {
            let Some(verifier) = req.code_verifier.as_deref() else {
                return Err(OAuthError::invalid_grant("code_verifier is required"));
            };
            let method = record.code_challenge_method.unwrap_or(CodeChallengeMethod::Plain);
            if !pkce::verify(verifier, challenge, method) {
                tracing::warn!(client_id = %client.client_id, "PKCE verification failed");
                return Err(OAuthError::invalid_grant("PKCE verification failed"));
            }
        }

        let minted = self.mint(&Grant::from(&record), issues_refresh(client)).await?;

        // Consuming the code is the last step: only the request that takes it may answer
        match self.store.take(&code_key).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                tracing::warn!(client_id = %client.client_id, "Authorization code consumed concurrently");
                self.rollback(&minted).await;
                return Err(OAuthError::invalid_grant("Invalid or expired authorization code"));
            }
            Err(e) => {
                self.rollback(&minted).await;
                return Err(e.into());
            }
        }

        tracing::info!(
            client_id = %client.client_id,
            username = %minted.username,
            jti = %minted.jti,
            "Exchanged authorization code for tokens"
        );
        Ok(minted.response)
    }

    async fn refresh_token_grant(
        &self,
        client: &OAuthClient,
        req: TokenRequest,
    ) -> OAuthResult<TokenResponse> {
        let Some(token) = req.refresh_token.as_deref().filter(|t| !t.is_empty()) else {
            return Err(OAuthError::invalid_request("refresh_token is required"));
        };
        let refresh_key = keys::refresh(token);

        let Some(record): Option<RefreshTokenRecord> = self.store.get_json(&refresh_key).await?
        else {
            return Err(OAuthError::invalid_grant("Invalid or expired refresh token"));
        };
        if record.client_id != client.client_id {
            tracing::warn!(client_id = %client.client_id, "Refresh token presented by another client");
            return Err(OAuthError::invalid_grant("Refresh token was not issued to this client"));
        }

        let rotate = self.config.rotate_refresh_tokens;
        let minted = self.mint(&Grant::from(&record), rotate).await?;

        if rotate {
            match self.store.take(&refresh_key).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    self.rollback(&minted).await;
                    return Err(OAuthError::invalid_grant("Invalid or expired refresh token"));
                }
                Err(e) => {
                    self.rollback(&minted).await;
                    return Err(e.into());
                }
            }
        }

        tracing::info!(
            client_id = %client.client_id,
            username = %minted.username,
            jti = %minted.jti,
            rotated = rotate,
            "Refreshed access token"
        );
        Ok(minted.response)
    }

    /// Sign an access token, persist its claims and optionally a refresh token.
    async fn mint(&self, grant: &Grant, with_refresh: bool) -> OAuthResult<Minted> {
        let issued_at = now();
        let lifetime = self.config.access_token_lifetime;

        let claims = TokenClaims {
            sub: grant.user_id.clone(),
            username: grant.username.clone(),
            email: grant.email.clone(),
            name: grant.name.clone(),
            scope: grant.scope.clone(),
            client_id: grant.client_id.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: issued_at,
            exp: expires_at(issued_at, lifetime),
            iss: self.codec.issuer().to_string(),
        };
        let access_token = self.codec.encode(&claims)?;

        let index_key = keys::user_tokens(&claims.username);
        self.store.set_json(&keys::token(&claims.jti), &claims, ttl_for(lifetime)).await?;
        self.prune_index(&index_key).await?;
        self.store.set_add(&index_key, &claims.jti).await?;
        // The newest member always outlives the rest
        self.store.expire(&index_key, lifetime).await?;

        let mut minted = Minted {
            response: TokenResponse {
                access_token,
                token_type: "Bearer".into(),
                expires_in: lifetime.as_secs(),
                refresh_token: None,
                scope: claims.scope.clone(),
            },
            jti: claims.jti,
            username: claims.username,
            refresh_token: None,
        };

        if with_refresh {
            let refresh_token = random_token(32);
            let record = RefreshTokenRecord {
                user_id: grant.user_id.clone(),
                username: grant.username.clone(),
                email: grant.email.clone(),
                name: grant.name.clone(),
                client_id: grant.client_id.clone(),
                scope: grant.scope.clone(),
                created_at: issued_at,
            };
            let stored = self
                .store
                .set_json(
                    &keys::refresh(&refresh_token),
                    &record,
                    ttl_for(self.config.refresh_token_lifetime),
                )
                .await;
            if let Err(e) = stored {
                self.rollback(&minted).await;
                return Err(e.into());
            }
            minted.response.refresh_token = Some(refresh_token.clone());
            minted.refresh_token = Some(refresh_token);
        }

        Ok(minted)
    }

    /// Best-effort removal of everything `mint` wrote.
    async fn rollback(&self, minted: &Minted) {
        let result: StoreResult<()> = async {
            self.store.delete(&keys::token(&minted.jti)).await?;
            self.store.set_remove(&keys::user_tokens(&minted.username), &minted.jti).await?;
            if let Some(refresh) = &minted.refresh_token {
                self.store.delete(&keys::refresh(refresh)).await?;
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            tracing::error!(jti = %minted.jti, error = %e, "Failed to roll back minted tokens");
        }
    }

    /// Revoke an access or refresh token (RFC 7009).
    ///
    /// Never fails: unknown clients, unknown tokens and store errors all end
    /// in the same silent success.
    pub async fn revoke(&self, req: TokenLookupRequest, credentials: ClientCredentials) {
        let client = match self
            .registry
            .authenticate(credentials.client_id.as_deref(), credentials.client_secret.as_deref())
            .await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!(error = %e, "Revocation with failed client authentication");
                return;
            }
        };
        let Some(token) = req.token.as_deref().filter(|t| !t.is_empty()) else {
            return;
        };

        if let Err(e) = self.revoke_token(&client, token).await {
            tracing::error!(client_id = %client.client_id, error = %e, "Token revocation failed");
        }
    }

    async fn revoke_token(&self, client: &OAuthClient, token: &str) -> StoreResult<()> {
        if let Ok(claims) = self.codec.decode_ignoring_expiry(token) {
            if claims.client_id != client.client_id {
                tracing::warn!(client_id = %client.client_id, jti = %claims.jti, "Revocation of another client's token ignored");
                return Ok(());
            }
            self.store.delete(&keys::token(&claims.jti)).await?;
            self.store.set_remove(&keys::user_tokens(&claims.username), &claims.jti).await?;
            tracing::info!(client_id = %client.client_id, jti = %claims.jti, "Revoked access token");
            return Ok(());
        }

        let refresh_key = keys::refresh(token);
        if let Some(record) = self.store.get_json::<RefreshTokenRecord>(&refresh_key).await? {
            if record.client_id == client.client_id {
                self.store.delete(&refresh_key).await?;
                tracing::info!(client_id = %client.client_id, username = %record.username, "Revoked refresh token");
            }
        }
        Ok(())
    }

    /// Describe a token (RFC 7662). Failures answer `active: false`.
    pub async fn introspect(
        &self,
        req: TokenLookupRequest,
        credentials: ClientCredentials,
    ) -> IntrospectionResponse {
        if let Err(e) = self
            .registry
            .authenticate(credentials.client_id.as_deref(), credentials.client_secret.as_deref())
            .await
        {
            tracing::debug!(error = %e, "Introspection with failed client authentication");
            return IntrospectionResponse::inactive();
        }
        let Some(token) = req.token.as_deref().filter(|t| !t.is_empty()) else {
            return IntrospectionResponse::inactive();
        };

        match self.lookup(token).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "Token introspection failed");
                IntrospectionResponse::inactive()
            }
        }
    }

    async fn lookup(&self, token: &str) -> StoreResult<IntrospectionResponse> {
        if let Ok(claims) = self.codec.decode(token) {
            let live = self.store.exists(&keys::token(&claims.jti)).await?;
            return Ok(if live {
                IntrospectionResponse::from_claims(claims)
            } else {
                IntrospectionResponse::inactive()
            });
        }

        let refresh_key = keys::refresh(token);
        let Some(record) = self.store.get_json::<RefreshTokenRecord>(&refresh_key).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        let exp = self.store.ttl(&refresh_key).await?.map(|ttl| expires_at(now(), ttl));

        Ok(IntrospectionResponse {
            active: true,
            scope: Some(record.scope),
            client_id: Some(record.client_id),
            username: Some(record.username),
            token_type: Some("refresh_token".into()),
            sub: Some(record.user_id),
            exp,
            iat: Some(record.created_at),
            iss: Some(self.codec.issuer().to_string()),
            jti: None,
        })
    }

    /// Validate a bearer access token for the reverse proxy.
    pub async fn verify(&self, token: &str) -> OAuthResult<TokenClaims> {
        let claims = self.codec.decode(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected bearer token");
            OAuthError::invalid_token("Invalid or expired token")
        })?;

        if !self.store.exists(&keys::token(&claims.jti)).await? {
            tracing::info!(jti = %claims.jti, username = %claims.username, "Bearer token revoked or unknown");
            return Err(OAuthError::invalid_token("Token has been revoked"));
        }
        Ok(claims)
    }

    /// Drop index members whose access token has expired or been removed.
    async fn prune_index(&self, index_key: &str) -> StoreResult<()> {
        for jti in self.store.set_members(index_key).await? {
            if !self.store.exists(&keys::token(&jti)).await? {
                self.store.set_remove(index_key, &jti).await?;
            }
        }
        Ok(())
    }

    /// Revoke every access token issued to `username`. Returns how many were live.
    pub async fn revoke_all_for_user(&self, username: &str) -> OAuthResult<usize> {
        let index_key = keys::user_tokens(username);
        let mut revoked = 0;
        for jti in self.store.set_members(&index_key).await? {
            if self.store.delete(&keys::token(&jti)).await? {
                revoked += 1;
            }
        }
        self.store.delete(&index_key).await?;

        tracing::info!(username = %username, revoked, "Revoked all access tokens for user");
        Ok(revoked)
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService").field("codec", &self.codec).finish()
    }
}

fn issues_refresh(client: &OAuthClient) -> bool {
    client.grant_types.iter().any(|g| g == "refresh_token")
}
