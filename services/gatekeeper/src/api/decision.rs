//! Auth sub-request endpoint.
//!
//! # Purpose
//! The edge server issues `GET /auth/{group}/{asset_path}` before serving a
//! protected file and forwards the client's cookies. The handler turns the
//! request into a [`DecisionCore::decide`] call and the resulting decision
//! into a status code.
//!
//! # Security considerations
//! - Response bodies are generic; reason codes go to logs and metrics only.
//! - The path the core checks is rebuilt from the raw (still
//!   percent-encoded) request URI or taken from the original-URI header, so
//!   it is decoded exactly once.
//!
//! [`DecisionCore::decide`]: gatekeeper_authz::DecisionCore::decide
use crate::app::AppState;
use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use cookie::{Cookie, CookieJar};
use gatekeeper_authz::{Decision, DecisionReason, Outcome};

const AUTH_ROUTE_PREFIX: &str = "/auth";

pub(crate) async fn authorize(
    State(state): State<AppState>,
    params: Result<Path<(String, String)>, PathRejection>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let group_hint = match params {
        Ok(Path((group, _asset_path))) => group,
        Err(err) => {
            tracing::debug!(error = %err, "auth route parameters rejected");
            return decision_response(&state, &state.core.invalid_path());
        }
    };
    let Some(url_path) = requested_path(&state, &headers, &uri) else {
        return decision_response(&state, &state.core.invalid_path());
    };
    let credential = credential_from_cookies(&headers, &state.cookie_name);

    let decision = state
        .core
        .decide(&url_path, credential.as_deref(), Some(&group_hint))
        .await;
    decision_response(&state, &decision)
}

/// Catch-all: `/auth` requests the router could not match are invalid paths,
/// everything else is simply not here.
pub(crate) async fn fallback(State(state): State<AppState>, uri: Uri) -> Response {
    let path = uri.path();
    if path == AUTH_ROUTE_PREFIX || path.starts_with("/auth/") {
        return decision_response(&state, &state.core.invalid_path());
    }
    StatusCode::NOT_FOUND.into_response()
}

pub(crate) fn decision_response(state: &AppState, decision: &Decision) -> Response {
    match (decision.outcome(), decision.reason) {
        (Outcome::Allow, _) => (StatusCode::OK, "OK").into_response(),
        (Outcome::Deny, DecisionReason::SystemError) => {
            let status = state.system_error_status;
            (status, status.canonical_reason().unwrap_or("Error")).into_response()
        }
        (Outcome::Deny, _) => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
    }
}

fn requested_path(state: &AppState, headers: &HeaderMap, uri: &Uri) -> Option<String> {
    if let Some(original) = headers.get(&state.original_uri_header) {
        // A present but unreadable header is not silently ignored.
        return original.to_str().ok().map(str::to_string);
    }
    let rest = uri.path().strip_prefix(AUTH_ROUTE_PREFIX)?;
    Some(format!("{}{}", state.core.mapper().prefix(), rest))
}

fn credential_from_cookies(headers: &HeaderMap, name: &str) -> Option<String> {
    let mut jar = CookieJar::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for chunk in value.split(';') {
            if let Ok(cookie) = Cookie::parse(chunk.trim().to_string()) {
                jar.add_original(cookie);
            }
        }
    }
    jar.get(name).map(|cookie| cookie.value().to_string())
}
