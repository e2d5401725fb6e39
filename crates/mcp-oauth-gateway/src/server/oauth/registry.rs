//! Dynamic client registration (RFC 7591) and management (RFC 7592).

use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use subtle::ConstantTimeEq;

use super::types::OAuthClient;
use super::{expires_at, now, random_token};
use crate::config::{Config, defaults};
use crate::error::{OAuthError, OAuthResult, StoreResult};
use crate::store::{Store, keys, ttl_for};

/// Compared against when the client does not exist, so a miss costs the same
/// as a wrong token.
const DECOY_REGISTRATION_TOKEN: &str = "reg-AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

pub const SUPPORTED_GRANT_TYPES: &[&str] = &["authorization_code", "refresh_token"];
pub const SUPPORTED_RESPONSE_TYPES: &[&str] = &["code"];
pub const SUPPORTED_AUTH_METHODS: &[&str] = &["client_secret_post", "client_secret_basic"];

/// Out-of-band redirect URI for clients without a web server.
pub const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Client metadata accepted by `POST /register`.
#[derive(Debug, Default, Deserialize)]
pub struct ClientMetadata {
    pub redirect_uris: Option<Vec<String>>,
    pub client_name: Option<String>,
    pub scope: Option<String>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
    pub token_endpoint_auth_method: Option<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub tos_uri: Option<String>,
    pub policy_uri: Option<String>,
    pub contacts: Option<Vec<String>>,
    pub software_id: Option<String>,
    pub software_version: Option<String>,
}

/// Mutable fields for `PUT /register/{client_id}`.
///
/// Credentials (`client_id`, `client_secret`, `registration_access_token`)
/// are not fields here, so they are dropped during deserialization.
#[derive(Debug, Default, Deserialize)]
pub struct ClientUpdate {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub scope: Option<String>,
    pub client_uri: Option<String>,
    pub logo_uri: Option<String>,
    pub tos_uri: Option<String>,
    pub policy_uri: Option<String>,
    pub contacts: Option<Vec<String>>,
    pub grant_types: Option<Vec<String>>,
    pub response_types: Option<Vec<String>>,
}

/// Registered client store.
#[derive(Clone)]
pub struct ClientRegistry {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Register a new client.
    pub async fn register(&self, metadata: ClientMetadata) -> OAuthResult<OAuthClient> {
        let redirect_uris = metadata.redirect_uris.unwrap_or_default();
        if redirect_uris.is_empty() {
            return Err(OAuthError::invalid_client_metadata("redirect_uris is required"));
        }
        validate_redirect_uris(&redirect_uris)?;

        let grant_types = validate_values(
            metadata.grant_types,
            SUPPORTED_GRANT_TYPES,
            &["authorization_code", "refresh_token"],
            "grant_types",
        )?;
        let response_types = validate_values(
            metadata.response_types,
            SUPPORTED_RESPONSE_TYPES,
            &["code"],
            "response_types",
        )?;

        let auth_method =
            metadata.token_endpoint_auth_method.unwrap_or_else(|| "client_secret_post".into());
        if !SUPPORTED_AUTH_METHODS.contains(&auth_method.as_str()) {
            return Err(OAuthError::invalid_client_metadata(format!(
                "token_endpoint_auth_method '{auth_method}' is not supported"
            )));
        }

        let issued_at = now();
        let lifetime = self.config.client_lifetime;
        let eternal = self.config.clients_are_eternal();
        let secret_expires_at = if eternal { 0 } else { expires_at(issued_at, lifetime) };

        let client = OAuthClient {
            client_id: format!("client_{}", random_token(16)),
            client_secret: random_token(32),
            client_id_issued_at: issued_at,
            client_secret_expires_at: secret_expires_at,
            registration_access_token: format!("reg-{}", random_token(32)),
            redirect_uris,
            client_name: metadata.client_name,
            scope: metadata
                .scope
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| defaults::DEFAULT_SCOPE.to_string()),
            grant_types,
            response_types,
            token_endpoint_auth_method: auth_method,
            client_uri: metadata.client_uri,
            logo_uri: metadata.logo_uri,
            tos_uri: metadata.tos_uri,
            policy_uri: metadata.policy_uri,
            contacts: metadata.contacts.unwrap_or_default(),
            software_id: metadata.software_id,
            software_version: metadata.software_version,
        };

        self.store.set_json(&keys::client(&client.client_id), &client, ttl_for(lifetime)).await?;

        tracing::info!(
            client_id = %client.client_id,
            client_name = client.client_name.as_deref().unwrap_or(""),
            eternal,
            "Registered OAuth client"
        );
        Ok(client)
    }

    /// Look up a client without authentication.
    pub async fn find(&self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        self.store.get_json(&keys::client(client_id)).await
    }

    /// Read a client's registration, authorized by its registration access token.
    pub async fn read(&self, client_id: &str, token: &str) -> OAuthResult<OAuthClient> {
        self.authorize_management(client_id, token).await
    }

    /// Update whitelisted metadata fields.
    pub async fn update(
        &self,
        client_id: &str,
        token: &str,
        update: ClientUpdate,
    ) -> OAuthResult<OAuthClient> {
        let mut client = self.authorize_management(client_id, token).await?;

        if let Some(redirect_uris) = update.redirect_uris {
            if redirect_uris.is_empty() {
                return Err(OAuthError::invalid_client_metadata("redirect_uris must not be empty"));
            }
            validate_redirect_uris(&redirect_uris)?;
            client.redirect_uris = redirect_uris;
        }
        if let Some(grant_types) = update.grant_types {
            client.grant_types = validate_values(
                Some(grant_types),
                SUPPORTED_GRANT_TYPES,
                &[],
                "grant_types",
            )?;
        }
        if let Some(response_types) = update.response_types {
            client.response_types = validate_values(
                Some(response_types),
                SUPPORTED_RESPONSE_TYPES,
                &[],
                "response_types",
            )?;
        }
        if let Some(scope) = update.scope.filter(|s| !s.trim().is_empty()) {
            client.scope = scope;
        }
        if update.client_name.is_some() {
            client.client_name = update.client_name;
        }
        if update.client_uri.is_some() {
            client.client_uri = update.client_uri;
        }
        if update.logo_uri.is_some() {
            client.logo_uri = update.logo_uri;
        }
        if update.tos_uri.is_some() {
            client.tos_uri = update.tos_uri;
        }
        if update.policy_uri.is_some() {
            client.policy_uri = update.policy_uri;
        }
        if let Some(contacts) = update.contacts {
            client.contacts = contacts;
        }

        // Keep the original expiry rather than restarting the lifetime
        let ttl = if client.client_secret_expires_at == 0 {
            None
        } else {
            let remaining = (client.client_secret_expires_at - now()).max(1);
            Some(Duration::from_secs(remaining as u64))
        };
        self.store.set_json(&keys::client(client_id), &client, ttl).await?;

        tracing::info!(client_id = %client_id, "Updated OAuth client");
        Ok(client)
    }

    /// Delete a client. A second delete answers 404.
    pub async fn delete(&self, client_id: &str, token: &str) -> OAuthResult<()> {
        self.authorize_management(client_id, token).await?;
        if !self.store.delete(&keys::client(client_id)).await? {
            return Err(OAuthError::client_not_found());
        }

        tracing::info!(client_id = %client_id, "Deleted OAuth client");
        Ok(())
    }

    /// Authenticate a client at the token, revocation or introspection endpoint.
    pub async fn authenticate(
        &self,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> OAuthResult<OAuthClient> {
        let Some(client_id) = client_id.filter(|id| !id.is_empty()) else {
            return Err(OAuthError::invalid_client("Client authentication required"));
        };
        let secret = client_secret.unwrap_or_default();

        let Some(client) = self.find(client_id).await? else {
            let _ = black_box(secret.as_bytes().ct_eq(DECOY_REGISTRATION_TOKEN.as_bytes()));
            return Err(OAuthError::invalid_client("Client authentication failed"));
        };

        if !bool::from(secret.as_bytes().ct_eq(client.client_secret.as_bytes())) {
            tracing::warn!(client_id = %client_id, "Client secret mismatch");
            return Err(OAuthError::invalid_client("Client authentication failed"));
        }
        if client.secret_expired(now()) {
            return Err(OAuthError::invalid_client("Client secret has expired"));
        }

        Ok(client)
    }

    /// Check a registration access token against exactly one client.
    async fn authorize_management(&self, client_id: &str, token: &str) -> OAuthResult<OAuthClient> {
        let client = self.find(client_id).await?;

        let expected = client
            .as_ref()
            .map_or(DECOY_REGISTRATION_TOKEN, |c| c.registration_access_token.as_str());
        let matches: bool = token.as_bytes().ct_eq(expected.as_bytes()).into();

        match client {
            None => Err(OAuthError::client_not_found()),
            Some(_) if !matches => {
                tracing::warn!(client_id = %client_id, "Registration access token mismatch");
                Err(OAuthError::forbidden("Registration access token is not valid for this client"))
            }
            Some(client) => Ok(client),
        }
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry").finish()
    }
}

fn validate_values(
    requested: Option<Vec<String>>,
    supported: &[&str],
    default: &[&str],
    field: &str,
) -> OAuthResult<Vec<String>> {
    let values = match requested {
        Some(values) if !values.is_empty() => values,
        _ if !default.is_empty() => return Ok(default.iter().map(ToString::to_string).collect()),
        _ => return Err(OAuthError::invalid_client_metadata(format!("{field} must not be empty"))),
    };

    if let Some(bad) = values.iter().find(|v| !supported.contains(&v.as_str())) {
        return Err(OAuthError::invalid_client_metadata(format!(
            "{field} value '{bad}' is not supported"
        )));
    }
    Ok(values)
}

fn validate_redirect_uris(uris: &[String]) -> OAuthResult<()> {
    for uri in uris {
        if let Err(reason) = validate_redirect_uri(uri) {
            return Err(OAuthError::invalid_redirect_uri(format!("{uri}: {reason}")));
        }
    }
    Ok(())
}

/// Check one redirect URI against the registration policy.
///
/// Accepts `https`, loopback `http`, reverse-domain private schemes (RFC 8252)
/// and the out-of-band URN.
pub fn validate_redirect_uri(uri: &str) -> Result<(), &'static str> {
    if uri == OOB_REDIRECT_URI {
        return Ok(());
    }

    let parsed = url::Url::parse(uri).map_err(|_| "not an absolute URI")?;
    if parsed.fragment().is_some() {
        return Err("must not contain a fragment");
    }

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost" | "127.0.0.1" | "[::1]") => Ok(()),
            _ => Err("http is only allowed for loopback hosts"),
        },
        "javascript" | "data" | "file" | "vbscript" | "about" | "blob" => {
            Err("scheme is not allowed")
        }
        scheme if scheme.contains('.') => Ok(()),
        _ => Err("custom schemes must use reverse-domain notation"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::store::MemoryStore;
    use axum::http::StatusCode;

    fn registry_with(config: Config) -> (ClientRegistry, Arc<dyn Store>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        (ClientRegistry::new(store.clone(), Arc::new(config)), store)
    }

    fn metadata(uris: &[&str]) -> ClientMetadata {
        ClientMetadata {
            redirect_uris: Some(uris.iter().map(ToString::to_string).collect()),
            client_name: Some("Test App".into()),
            ..ClientMetadata::default()
        }
    }

    #[tokio::test]
    async fn test_register_defaults() {
        let (registry, store) = registry_with(Config::for_testing("http://unused"));
        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();

        assert!(client.client_id.starts_with("client_"));
        assert!(client.registration_access_token.starts_with("reg-"));
        assert_eq!(client.grant_types, vec!["authorization_code", "refresh_token"]);
        assert_eq!(client.response_types, vec!["code"]);
        assert_eq!(client.scope, defaults::DEFAULT_SCOPE);
        assert!(client.client_secret_expires_at > client.client_id_issued_at);
        assert!(store.ttl(&keys::client(&client.client_id)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_register_eternal_client() {
        let mut config = Config::for_testing("http://unused");
        config.client_lifetime = Duration::ZERO;
        let (registry, store) = registry_with(config);

        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();
        assert_eq!(client.client_secret_expires_at, 0);
        assert!(store.ttl(&keys::client(&client.client_id)).await.unwrap().is_none());
        assert!(store.exists(&keys::client(&client.client_id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_with_unbounded_lifetime() {
        let mut config = Config::for_testing("http://unused");
        config.client_lifetime = Duration::from_secs(u64::MAX);
        let (registry, store) = registry_with(config);

        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();
        assert_eq!(client.client_secret_expires_at, i64::MAX);
        assert!(store.exists(&keys::client(&client.client_id)).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_requires_redirect_uris() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let err = registry.register(ClientMetadata::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidClientMetadata);

        let err = registry.register(metadata(&[])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidClientMetadata);
    }

    #[tokio::test]
    async fn test_register_rejects_unsupported_grant() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let mut meta = metadata(&["https://cb.example/"]);
        meta.grant_types = Some(vec!["password".into()]);
        let err = registry.register(meta).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidClientMetadata);
    }

    #[tokio::test]
    async fn test_register_rejects_dangerous_redirect() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let err = registry.register(metadata(&["javascript:alert(1)"])).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidRedirectUri);
    }

    #[tokio::test]
    async fn test_management_isolation() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let a = registry.register(metadata(&["https://a.example/cb"])).await.unwrap();
        let b = registry.register(metadata(&["https://b.example/cb"])).await.unwrap();

        assert!(registry.read(&a.client_id, &a.registration_access_token).await.is_ok());
        let err = registry.read(&b.client_id, &a.registration_access_token).await.unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);

        let err = registry.read("client_missing", &a.registration_access_token).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_update_ignores_credentials() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();

        let update: ClientUpdate = serde_json::from_value(serde_json::json!({
            "client_name": "Renamed",
            "client_id": "client_hijack",
            "client_secret": "chosen",
            "registration_access_token": "reg-chosen",
            "redirect_uris": ["https://new.example/cb"]
        }))
        .unwrap();

        let updated = registry
            .update(&client.client_id, &client.registration_access_token, update)
            .await
            .unwrap();

        assert_eq!(updated.client_name.as_deref(), Some("Renamed"));
        assert_eq!(updated.client_id, client.client_id);
        assert_eq!(updated.client_secret, client.client_secret);
        assert_eq!(updated.registration_access_token, client.registration_access_token);
        assert_eq!(updated.redirect_uris, vec!["https://new.example/cb"]);
        assert_eq!(updated.client_secret_expires_at, client.client_secret_expires_at);
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();

        registry.delete(&client.client_id, &client.registration_access_token).await.unwrap();
        let err = registry
            .delete(&client.client_id, &client.registration_access_token)
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (registry, _) = registry_with(Config::for_testing("http://unused"));
        let client = registry.register(metadata(&["https://cb.example/"])).await.unwrap();

        assert!(
            registry
                .authenticate(Some(&client.client_id), Some(&client.client_secret))
                .await
                .is_ok()
        );

        for (id, secret) in [
            (None, Some(client.client_secret.as_str())),
            (Some(client.client_id.as_str()), Some("wrong")),
            (Some(client.client_id.as_str()), None),
            (Some("client_unknown"), Some(client.client_secret.as_str())),
        ] {
            let err = registry.authenticate(id, secret).await.unwrap_err();
            assert_eq!(err.code, ErrorCode::InvalidClient);
            assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn test_redirect_uri_policy() {
        assert!(validate_redirect_uri("https://cb.example/path?x=1").is_ok());
        assert!(validate_redirect_uri("http://localhost:3000/callback").is_ok());
        assert!(validate_redirect_uri("http://127.0.0.1/cb").is_ok());
        assert!(validate_redirect_uri("com.example.app:/oauth").is_ok());
        assert!(validate_redirect_uri(OOB_REDIRECT_URI).is_ok());

        assert!(validate_redirect_uri("http://evil.example/cb").is_err());
        assert!(validate_redirect_uri("https://cb.example/#frag").is_err());
        assert!(validate_redirect_uri("data:text/html,hi").is_err());
        assert!(validate_redirect_uri("myapp://cb").is_err());
        assert!(validate_redirect_uri("/relative").is_err());
    }
}
