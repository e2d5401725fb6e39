//! OAuth 2.1 endpoint handlers.
//!
//! Implements:
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 7591 / 7592: Dynamic Client Registration and Management
//! - RFC 6749: Authorization Code and Refresh Token grants
//! - RFC 7009 / 7662: Token Revocation and Introspection

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{
        Path, Query, State,
        rejection::{FormRejection, JsonRejection, QueryRejection},
    },
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::headers::{
    Authorization, HeaderMapExt,
    authorization::{Basic, Bearer},
};
use serde::Deserialize;

use super::flow::{AuthorizeRequest, CallbackQuery, FlowRedirect};
use super::pages;
use super::registry::{
    ClientMetadata, ClientUpdate, SUPPORTED_AUTH_METHODS, SUPPORTED_GRANT_TYPES,
    SUPPORTED_RESPONSE_TYPES,
};
use super::tokens::{ClientCredentials, TokenLookupRequest, TokenRequest};
use super::types::{OAuthClient, TokenResponse};
use crate::config::{Config, defaults};
use crate::error::{OAuthError, OAuthResult};
use crate::server::http::AppState;

/// Identity headers returned by `/verify` for the reverse proxy to forward.
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");
pub const USER_NAME_HEADER: HeaderName = HeaderName::from_static("x-user-name");
pub const AUTH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-auth-token");

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(state): State<Arc<AppState>>) -> Response {
    let config = &state.config;
    let mut response = Json(serde_json::json!({
        "issuer": config.issuer,
        "authorization_endpoint": config.authorization_endpoint(),
        "token_endpoint": config.token_endpoint(),
        "registration_endpoint": config.registration_endpoint(),
        "jwks_uri": config.jwks_uri(),
        "revocation_endpoint": config.revocation_endpoint(),
        "introspection_endpoint": config.introspection_endpoint(),
        "scopes_supported": defaults::SCOPES_SUPPORTED,
        "response_types_supported": SUPPORTED_RESPONSE_TYPES,
        "grant_types_supported": SUPPORTED_GRANT_TYPES,
        "token_endpoint_auth_methods_supported": SUPPORTED_AUTH_METHODS,
        "revocation_endpoint_auth_methods_supported": SUPPORTED_AUTH_METHODS,
        "introspection_endpoint_auth_methods_supported": SUPPORTED_AUTH_METHODS,
        "code_challenge_methods_supported": ["S256", "plain"]
    }))
    .into_response();

    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600"));
    response
}

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
///
/// Tells MCP clients which authorization server protects the proxied resource.
pub async fn handle_protected_resource(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.config.issuer,
        "authorization_servers": [state.config.issuer],
        "bearer_methods_supported": ["header"],
        "scopes_supported": defaults::SCOPES_SUPPORTED
    }))
}

/// `GET /jwks`
///
/// Tokens are HMAC-signed, so there are no public keys to publish.
pub async fn handle_jwks() -> impl IntoResponse {
    Json(serde_json::json!({ "keys": [] }))
}

// ─── RFC 7591 / 7592: Client Registration ────────────────────────────────────

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ClientMetadata>, JsonRejection>,
) -> Response {
    let Json(metadata) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return OAuthError::invalid_client_metadata(rejection.body_text()).into_response();
        }
    };

    match state.registry.register(metadata).await {
        Ok(client) => {
            (StatusCode::CREATED, Json(registration_response(&state.config, &client)))
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /register/{client_id}`
pub async fn handle_client_read(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result: OAuthResult<OAuthClient> = async {
        let token = registration_token(&headers)?;
        state.registry.read(&client_id, &token).await
    }
    .await;

    match result {
        Ok(client) => Json(registration_response(&state.config, &client)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `PUT /register/{client_id}`
pub async fn handle_client_update(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<ClientUpdate>, JsonRejection>,
) -> Response {
    let result: OAuthResult<OAuthClient> = async {
        let token = registration_token(&headers)?;
        let Json(update) =
            body.map_err(|r| OAuthError::invalid_client_metadata(r.body_text()))?;
        state.registry.update(&client_id, &token, update).await
    }
    .await;

    match result {
        Ok(client) => Json(registration_response(&state.config, &client)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /register/{client_id}`
pub async fn handle_client_delete(
    State(state): State<Arc<AppState>>,
    Path(client_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let result: OAuthResult<()> = async {
        let token = registration_token(&headers)?;
        state.registry.delete(&client_id, &token).await
    }
    .await;

    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

fn registration_token(headers: &HeaderMap) -> OAuthResult<String> {
    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_owned())
        .ok_or_else(|| OAuthError::missing_bearer("Registration access token required"))
}

/// Client registration document with its management URI.
fn registration_response(config: &Config, client: &OAuthClient) -> serde_json::Value {
    let mut body = serde_json::to_value(client).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(fields) = body.as_object_mut() {
        fields.insert(
            "registration_client_uri".into(),
            config.registration_client_uri(&client.client_id).into(),
        );
    }
    body
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
pub async fn handle_authorize(
    State(state): State<Arc<AppState>>,
    query: Result<Query<AuthorizeRequest>, QueryRejection>,
) -> Response {
    let Query(request) = match query {
        Ok(query) => query,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };

    match state.flow.authorize(request).await {
        Ok(redirect) => redirect.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /callback`
pub async fn handle_callback(
    State(state): State<Arc<AppState>>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Response {
    let query = query.map(|Query(q)| q).unwrap_or_default();
    state.flow.callback(query).await.into_response()
}

impl IntoResponse for FlowRedirect {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Upstream(_) => StatusCode::TEMPORARY_REDIRECT,
            Self::Client(_) | Self::Page(_) => StatusCode::FOUND,
        };
        (status, [(header::LOCATION, self.location())]).into_response()
    }
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

/// `POST /token`
pub async fn handle_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let Form(request) = match form {
        Ok(form) => form,
        Err(rejection) => return OAuthError::invalid_request(rejection.body_text()).into_response(),
    };

    let credentials = client_credentials(
        &headers,
        request.client_id.clone(),
        request.client_secret.clone(),
    );
    match state.tokens.exchange(request, credentials).await {
        Ok(tokens) => token_success(&tokens),
        Err(e) => e.into_response(),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(tokens: &TokenResponse) -> Response {
    let mut response = Json(tokens).into_response();

    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

fn client_credentials(
    headers: &HeaderMap,
    form_id: Option<String>,
    form_secret: Option<String>,
) -> ClientCredentials {
    let basic = headers
        .typed_get::<Authorization<Basic>>()
        .map(|auth| (auth.username().to_owned(), auth.password().to_owned()));
    ClientCredentials::resolve(basic, form_id, form_secret)
}

// ─── RFC 7009 / 7662 ─────────────────────────────────────────────────────────

/// `POST /revoke`
///
/// Always answers 200, whatever the outcome.
pub async fn handle_revoke(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> StatusCode {
    let request = form.map(|Form(f)| f).unwrap_or_default();
    let credentials =
        client_credentials(&headers, request.client_id.clone(), request.client_secret.clone());

    state.tokens.revoke(request, credentials).await;
    StatusCode::OK
}

/// `POST /introspect`
pub async fn handle_introspect(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    form: Result<Form<TokenLookupRequest>, FormRejection>,
) -> Response {
    let request = form.map(|Form(f)| f).unwrap_or_default();
    let credentials =
        client_credentials(&headers, request.client_id.clone(), request.client_secret.clone());

    let mut response = Json(state.tokens.introspect(request, credentials).await).into_response();
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

// ─── Reverse proxy verification ──────────────────────────────────────────────

/// `GET|POST /verify`
///
/// Answers 200 with identity headers for a valid, unrevoked bearer token.
pub async fn handle_verify(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() else {
        return OAuthError::missing_bearer("Bearer token required").into_response();
    };
    let token = bearer.token();

    let claims = match state.tokens.verify(token).await {
        Ok(claims) => claims,
        Err(e) => return e.into_response(),
    };

    let mut response = StatusCode::OK.into_response();
    let out = response.headers_mut();
    for (name, value) in [
        (USER_ID_HEADER, claims.sub.as_str()),
        (USER_NAME_HEADER, claims.username.as_str()),
        (AUTH_TOKEN_HEADER, token),
    ] {
        if let Ok(value) = HeaderValue::from_str(value) {
            out.insert(name, value);
        }
    }
    response
}

// ─── Browser pages ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SuccessQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorQuery {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /success`
pub async fn handle_success_page(Query(query): Query<SuccessQuery>) -> Response {
    match query.code.as_deref() {
        Some(code) => Html(pages::render_success_page(code, query.state.as_deref())).into_response(),
        None => (
            StatusCode::BAD_REQUEST,
            Html(pages::render_error_page("invalid_request", Some("Missing authorization code"))),
        )
            .into_response(),
    }
}

/// `GET /error`
pub async fn handle_error_page(Query(query): Query<ErrorQuery>) -> impl IntoResponse {
    (
        StatusCode::BAD_REQUEST,
        Html(pages::render_error_page(
            query.error.as_deref().unwrap_or("unknown_error"),
            query.error_description.as_deref(),
        )),
    )
}
