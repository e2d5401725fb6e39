//! Shared helpers for driving the gateway router against a mocked GitHub.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use mcp_oauth_gateway::config::Config;
use mcp_oauth_gateway::server::AuthServer;
use mcp_oauth_gateway::store::MemoryStore;

pub const ISSUER: &str = "https://auth.example.com";
pub const REDIRECT_URI: &str = "https://cb.example/";
pub const GITHUB_LOGIN: &str = "octocat";
pub const GITHUB_ID: u64 = 583_231;

pub struct Gateway {
    pub server: AuthServer,
    pub app: Router,
    pub github: MockServer,
}

pub async fn gateway() -> Gateway {
    gateway_with(|_| {}).await
}

pub async fn gateway_with(configure: impl FnOnce(&mut Config)) -> Gateway {
    let github = MockServer::start().await;
    let mut config = Config::for_testing(&github.uri());
    configure(&mut config);

    let server = AuthServer::with_store(config, Arc::new(MemoryStore::new())).unwrap();
    let app = server.router();
    Gateway { server, app, github }
}

/// Mount a GitHub that accepts any code and logs in as `login`.
pub async fn mock_github_user(github: &MockServer, login: &str) {
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_test_token",
            "token_type": "bearer",
            "scope": "user:email"
        })))
        .mount(github)
        .await;

    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": GITHUB_ID,
            "login": login,
            "email": format!("{login}@example.com"),
            "name": "The Octocat"
        })))
        .mount(github)
        .await;
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

pub fn location(response: &Response<Body>) -> url::Url {
    let raw = response.headers()[header::LOCATION].to_str().unwrap();
    url::Url::parse(ISSUER).unwrap().join(raw).unwrap()
}

pub fn query_params(url: &url::Url) -> HashMap<String, String> {
    url.query_pairs().into_owned().collect()
}

pub fn query(pairs: &[(&str, &str)]) -> String {
    serde_urlencoded::to_string(pairs).unwrap()
}

pub fn form_request(uri: &str, pairs: &[(&str, &str)]) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(query(pairs)))
        .unwrap()
}

pub async fn register(app: &Router, redirect_uris: &[&str]) -> Value {
    let response = send(
        app,
        Request::post("/register")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "client_name": "Test MCP Client",
                    "redirect_uris": redirect_uris
                })
                .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), 201);
    body_json(response).await
}

pub fn authorize_uri(client_id: &str, redirect_uri: &str, extra: &[(&str, &str)]) -> String {
    let mut pairs = vec![
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
        ("response_type", "code"),
        ("state", "client-state"),
    ];
    pairs.extend_from_slice(extra);
    format!("/authorize?{}", query(&pairs))
}

/// Run `/authorize` and return the state the gateway handed to GitHub.
pub async fn start_login(app: &Router, client_id: &str, extra: &[(&str, &str)]) -> String {
    let response = get(app, &authorize_uri(client_id, REDIRECT_URI, extra)).await;
    assert_eq!(response.status(), 307);
    query_params(&location(&response))["state"].clone()
}

/// Complete a login through the mocked GitHub and return the issued code.
pub async fn obtain_code(app: &Router, client_id: &str, extra: &[(&str, &str)]) -> String {
    let state = start_login(app, client_id, extra).await;
    let response =
        get(app, &format!("/callback?{}", query(&[("code", "gh-code"), ("state", &state)]))).await;
    assert_eq!(response.status(), 302);

    let params = query_params(&location(&response));
    assert_eq!(params["state"], "client-state");
    params["code"].clone()
}

pub async fn exchange_code(app: &Router, client: &Value, code: &str, extra: &[(&str, &str)]) -> Response<Body> {
    let mut pairs = vec![
        ("grant_type", "authorization_code"),
        ("code", code),
        ("redirect_uri", REDIRECT_URI),
        ("client_id", client["client_id"].as_str().unwrap()),
        ("client_secret", client["client_secret"].as_str().unwrap()),
    ];
    pairs.extend_from_slice(extra);
    send(app, form_request("/token", &pairs)).await
}

/// Register a client, log in and exchange the code. Returns (client, token response).
pub async fn issue_tokens(gw: &Gateway) -> (Value, Value) {
    mock_github_user(&gw.github, GITHUB_LOGIN).await;
    let client = register(&gw.app, &[REDIRECT_URI]).await;
    let code = obtain_code(&gw.app, client["client_id"].as_str().unwrap(), &[]).await;

    let response = exchange_code(&gw.app, &client, &code, &[]).await;
    assert_eq!(response.status(), 200);
    let tokens = body_json(response).await;
    (client, tokens)
}

pub async fn verify(app: &Router, access_token: &str) -> Response<Body> {
    send(
        app,
        Request::get("/verify")
            .header(header::AUTHORIZATION, format!("Bearer {access_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await
}
