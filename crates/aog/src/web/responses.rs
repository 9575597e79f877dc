//! HTTP response types and error mapping
//!
//! Every endpoint answers with the same envelope; failures carry the
//! structured `{business_code, message}` body. Streaming endpoints use SSE
//! framed as `data: <json>\n\n`, flushed after every frame.

use axum::{
    Json,
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tracing::error;
use utoipa::ToSchema;

use crate::errors::{AogError, AogResult};

pub const SUCCESS_CODE: u32 = 200;

/// Standard API response envelope.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub business_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            business_code: SUCCESS_CODE,
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(business_code: u32, message: String) -> Self {
        Self {
            business_code,
            message,
            data: None,
        }
    }
}

/// Success helper.
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// HTTP status for each error kind.
fn status_for(error: &AogError) -> StatusCode {
    match error {
        AogError::BadRequest { .. }
        | AogError::ProviderUrlMalformed { .. }
        | AogError::UnsupportedPlatform { .. } => StatusCode::BAD_REQUEST,
        AogError::ProviderAuthMissing { .. } | AogError::ProviderAuthInvalid { .. } => {
            StatusCode::UNAUTHORIZED
        }
        AogError::SystemProviderImmutable { .. } => StatusCode::FORBIDDEN,
        AogError::ModelNotFound { .. } => StatusCode::NOT_FOUND,
        AogError::ModelAlreadyExists { .. } => StatusCode::CONFLICT,
        AogError::ServiceUnavailable { .. } | AogError::EngineUnavailable { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        AogError::ModelLoadTimeout { .. } | AogError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        // Upstream 4xx propagates; everything else is a bad gateway.
        AogError::Upstream { status, .. } => StatusCode::from_u16(*status)
            .ok()
            .filter(StatusCode::is_client_error)
            .unwrap_or(StatusCode::BAD_GATEWAY),
        AogError::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        AogError::EngineStart { .. }
        | AogError::EngineUpgrade { .. }
        | AogError::ModelPullFailed { .. }
        | AogError::Translation { .. }
        | AogError::Database(_)
        | AogError::Http(_)
        | AogError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Message surfaced to clients; internal kinds are logged with context and
/// replaced by a generic line.
fn message_for(error: &AogError) -> String {
    match error {
        AogError::Database(_) | AogError::Http(_) | AogError::Internal { .. } => {
            error!(%error, "internal error");
            "internal server error".to_string()
        }
        other => other.to_string(),
    }
}

impl IntoResponse for AogError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let mut body = ApiResponse::failure(self.business_code(), message_for(&self));
        if let AogError::BadRequest { details, .. } = &self
            && !details.is_empty()
        {
            body.message = format!(
                "{} ({})",
                body.message,
                details
                    .iter()
                    .map(|(field, message)| format!("{field}: {message}"))
                    .collect::<Vec<_>>()
                    .join("; ")
            );
        }
        (status, Json(body)).into_response()
    }
}

/// Convert a handler result into a response.
pub fn handle_result<T: Serialize>(result: AogResult<T>) -> Response {
    match result {
        Ok(data) => ok(data),
        Err(error) => error.into_response(),
    }
}

/// Encode one translated frame for the SSE writer: string frames go out
/// raw (sentinel lines like `[DONE]`), structured frames as compact JSON.
pub fn frame_data(frame: &Value) -> String {
    match frame {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// SSE response over translated value frames. A translation or upstream
/// error becomes one structured error frame, then the stream closes.
pub fn sse_value_stream<S>(frames: S) -> Response
where
    S: Stream<Item = AogResult<Value>> + Send + 'static,
{
    let events = frames.map(|frame| match frame {
        Ok(value) => Ok::<Event, std::convert::Infallible>(Event::default().data(frame_data(&value))),
        Err(error) => {
            let body = ApiResponse::failure(error.business_code(), message_for(&error));
            Ok(Event::default().data(serde_json::to_string(&body).unwrap_or_default()))
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

/// SSE response over progress frames (already terminal-aware).
pub fn sse_progress_stream<S>(frames: S) -> Response
where
    S: Stream<Item = crate::downloads::ProgressFrame> + Send + 'static,
{
    let events = frames.map(|frame| {
        Ok::<Event, std::convert::Infallible>(
            Event::default().data(serde_json::to_string(&frame).unwrap_or_default()),
        )
    });
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_frames_are_emitted_raw() {
        assert_eq!(frame_data(&json!("[DONE]")), "[DONE]");
        assert_eq!(frame_data(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn internal_errors_surface_generically() {
        let message = message_for(&AogError::internal("connection string leaked"));
        assert_eq!(message, "internal server error");
    }

    #[test]
    fn upstream_4xx_propagates_status() {
        assert_eq!(
            status_for(&AogError::Upstream {
                status: 429,
                message: "rate limited".into()
            }),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&AogError::Upstream {
                status: 502,
                message: "bad".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }
}
