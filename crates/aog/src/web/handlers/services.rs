//! Inference dispatch handlers
//!
//! Thin wrappers: run the per-service middleware, hand the payload to the
//! hybrid scheduler, relay the result. Streamed responses are Server-Sent
//! Events flushed after every translated frame; the client going away
//! cancels the outbound call through the shared token.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{AogError, AogResult};
use crate::models::is_known_service;
use crate::scheduler::ServeOutcome;
use crate::web::middleware;
use crate::web::responses::{ok, sse_value_stream};
use crate::web::AppState;

/// `POST /services/{service}`
pub async fn invoke_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
    Json(payload): Json<Value>,
) -> Response {
    match dispatch(&state, &service, payload).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

/// `GET /services/models` — the one service invoked without a body.
pub async fn list_service_models(State(state): State<AppState>) -> Response {
    match dispatch(&state, "models", Value::Object(Default::default())).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

async fn dispatch(state: &AppState, service: &str, mut payload: Value) -> AogResult<Response> {
    if !is_known_service(service) {
        return Err(AogError::bad_request(format!("unknown service '{service}'")));
    }
    if service == "speech-to-text-ws" {
        return Err(AogError::bad_request(
            "speech-to-text-ws is a WebSocket endpoint",
        ));
    }

    let target = state.scheduler.predict_source(service, &payload).await?;
    middleware::preprocess(
        service,
        &mut payload,
        target,
        &state.config.download_dir(),
        &state.client,
    )
    .await?;

    let token = CancellationToken::new();
    match state.scheduler.serve(service, payload, token).await? {
        ServeOutcome::Json { body, .. } => Ok(ok(body)),
        ServeOutcome::Stream { frames, .. } => Ok(sse_value_stream(frames)),
    }
}
