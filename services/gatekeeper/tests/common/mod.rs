#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderName, Request, StatusCode, header};
use gatekeeper::app::AppState;
use gatekeeper::store::memory::InMemoryIdentityStore;
use gatekeeper_authz::{
    Algorithm, ClaimsResolver, DecisionCore, PathMapper, PrivilegedGroups, StoreResolver,
    TokenVerifier, VerificationKey,
};
use jsonwebtoken::{EncodingKey, Header};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const SECRET: &[u8] = b"integration-test-secret";
pub const PREFIX: &str = "/secure";
pub const COOKIE: &str = "jwt";

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64
}

pub fn mint(claims: &Value) -> String {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(SECRET),
    )
    .expect("encode")
}

/// Token for `subject` valid for the next hour carrying `groups`.
pub fn user_token(subject: &str, groups: &[&str]) -> String {
    mint(&json!({
        "sub": subject,
        "iat": now(),
        "exp": now() + 3600,
        "groups": groups,
    }))
}

fn verifier() -> Arc<TokenVerifier> {
    Arc::new(
        TokenVerifier::new(Algorithm::HS256, vec![VerificationKey::from_secret(SECRET)])
            .expect("verifier"),
    )
}

fn state(core: DecisionCore, system_error_status: StatusCode) -> AppState {
    AppState {
        core: Arc::new(core),
        cookie_name: COOKIE.to_string(),
        original_uri_header: HeaderName::from_static("x-original-uri"),
        system_error_status,
    }
}

pub fn claims_state() -> AppState {
    let core = DecisionCore::new(
        PathMapper::new(PREFIX),
        verifier(),
        Arc::new(ClaimsResolver::new(PrivilegedGroups::default())),
    );
    state(core, StatusCode::INTERNAL_SERVER_ERROR)
}

pub fn store_state(
    store: Arc<InMemoryIdentityStore>,
    timeout: Duration,
    system_error_status: StatusCode,
) -> AppState {
    let resolver = StoreResolver::new(store, PrivilegedGroups::default()).with_timeout(timeout);
    let core = DecisionCore::new(PathMapper::new(PREFIX), verifier(), Arc::new(resolver));
    state(core, system_error_status)
}

pub fn app(state: AppState) -> axum::routing::RouterIntoService<Body, ()> {
    gatekeeper::app::build_router(state).into_service()
}

pub fn auth_request(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(token) = token {
        builder = builder.header(header::COOKIE, format!("theme=dark; {COOKIE}={token}"));
    }
    builder.body(Body::empty()).expect("request")
}

pub async fn read_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf8")
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}
