//! Health, version and update handlers

use axum::{extract::State, response::Response};
use serde_json::json;

use crate::web::AppState;
use crate::web::responses::{handle_result, ok};

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    // The gateway is up if it can answer; report component detail alongside.
    let database_ok = state.repos.versions.get().await.is_ok();
    ok(json!({
        "status": if database_ok { "UP" } else { "DEGRADED" },
        "components": {
            "database": if database_ok { "ok" } else { "error" },
            "flavors": state.flavors.current().len(),
        }
    }))
}

/// `GET /engine/health`
pub async fn engine_health(State(state): State<AppState>) -> Response {
    ok(state.engines.health_summary().await)
}

/// `GET /version`
pub async fn version(State(state): State<AppState>) -> Response {
    handle_result(state.repos.versions.get().await)
}

/// `GET /engine/version`
pub async fn engine_version(State(state): State<AppState>) -> Response {
    ok(state.engines.version_summary().await)
}

/// `GET /update/status`
pub async fn update_status(State(state): State<AppState>) -> Response {
    match state.repos.versions.get().await {
        Ok(record) => {
            let update_available = !record.available_version.is_empty()
                && record.available_version != record.gateway_version;
            ok(json!({
                "current": record.gateway_version,
                "available": record.available_version,
                "update_available": update_available,
            }))
        }
        Err(error) => axum::response::IntoResponse::into_response(error),
    }
}

/// `POST /update` — the update channel itself is external; this records the
/// check and reports the outcome.
pub async fn apply_update(State(state): State<AppState>) -> Response {
    match state.repos.versions.get().await {
        Ok(record) => {
            if record.available_version.is_empty()
                || record.available_version == record.gateway_version
            {
                ok(json!({"updated": false, "message": "already up to date"}))
            } else {
                ok(json!({
                    "updated": false,
                    "message": format!(
                        "update to {} must be applied by the installer",
                        record.available_version
                    ),
                }))
            }
        }
        Err(error) => axum::response::IntoResponse::into_response(error),
    }
}
