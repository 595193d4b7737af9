//! Liveness and readiness probes.
//!
//! `/health` answers as soon as the router exists, which only happens after
//! the verification key has loaded. `/ready` additionally probes the
//! membership resolver's backing store.
use crate::api::types::ReadyStatus;
use crate::app::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;

pub(crate) async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyStatus>) {
    let resolver = state.core.resolver();
    let mode = resolver.mode().as_str().to_string();
    match resolver.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadyStatus {
                status: "ok".to_string(),
                resolver: mode,
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyStatus {
                    status: "unavailable".to_string(),
                    resolver: mode,
                }),
            )
        }
    }
}
