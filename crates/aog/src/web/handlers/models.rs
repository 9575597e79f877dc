//! Model handlers: CRUD, streamed pulls, catalogue queries

use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use utoipa::IntoParams;

use crate::assets::SUPPORT_MODELS;
use crate::database::repositories::{DataStore, ListParams, ModelKey};
use crate::errors::{AogError, AogResult};
use crate::models::{Model, ModelRequest, ModelStreamRequest, ServiceSource};
use crate::web::AppState;
use crate::web::responses::{handle_result, ok, sse_progress_stream};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ModelQuery {
    pub provider_name: Option<String>,
    pub service_name: Option<String>,
    pub service_source: Option<String>,
}

/// `GET /model`
pub async fn list_models(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Response {
    let mut filters = Vec::new();
    if let Some(provider_name) = query.provider_name {
        filters.push(ListParams::eq("provider_name", provider_name));
    }
    if let Some(service_name) = query.service_name {
        filters.push(ListParams::eq("service_name", service_name));
    }
    if let Some(source) = query.service_source {
        filters.push(ListParams::eq("service_source", source));
    }
    handle_result(state.repos.models.list(&ListParams::filtered(filters)).await)
}

/// `POST /model` — register and pull synchronously; returns once the model
/// is downloaded (or the pull fails).
pub async fn create_model(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> Response {
    handle_result(apply_create(&state, request).await)
}

async fn apply_create(state: &AppState, request: ModelRequest) -> AogResult<Model> {
    let provider = resolve_provider(state, &request).await?;
    let subscription = state
        .downloads
        .pull(provider.clone(), &request.model_name)
        .await?;

    // Consume the job's progress to completion.
    let mut frames = std::pin::pin!(subscription.into_stream());
    while let Some(frame) = frames.next().await {
        if frame.status == "cancelled" {
            return Err(AogError::Cancelled);
        }
        if let Some(reason) = frame.error {
            return Err(AogError::ModelPullFailed { message: reason });
        }
        if frame.status == "success" {
            break;
        }
    }

    let key = ModelKey::new(&provider.provider_name, &request.model_name);
    let model = state
        .repos
        .models
        .get(&key)
        .await?
        .ok_or_else(|| AogError::ModelNotFound {
            model: request.model_name.clone(),
        })?;

    // Acquisition finished; ask the engine to load the model off the
    // request path.
    if provider.service_source == ServiceSource::Local
        && let Ok(admin) = state.engines.model_admin(&provider.flavor)
    {
        let model_name = model.model_name.clone();
        let service_name = model.service_name.clone();
        tokio::spawn(async move {
            let token = CancellationToken::new();
            if let Err(error) = admin.load_model(&model_name, &service_name, &token).await {
                tracing::warn!(model = %model_name, %error, "model load after pull failed");
            }
        });
    }

    info!(model = %model.model_name, provider = %model.provider_name, "model ready");
    Ok(model)
}

/// `DELETE /model` — unload from the engine where applicable, then drop the
/// record.
pub async fn delete_model(
    State(state): State<AppState>,
    Json(request): Json<ModelRequest>,
) -> Response {
    handle_result(apply_delete(&state, request).await)
}

async fn apply_delete(state: &AppState, request: ModelRequest) -> AogResult<()> {
    let provider = resolve_provider(state, &request).await?;
    let key = ModelKey::new(&provider.provider_name, &request.model_name);
    if !state.repos.models.is_exist(&key).await? {
        return Err(AogError::ModelNotFound {
            model: request.model_name.clone(),
        });
    }

    if provider.service_source == ServiceSource::Local {
        let admin = state.engines.model_admin(&provider.flavor)?;
        let token = CancellationToken::new();
        // Best effort: the record goes away even if the engine has already
        // forgotten the model.
        let _ = admin.unload_model(&request.model_name, &token).await;
        let _ = admin.delete_model(&request.model_name).await;
    }

    state.repos.models.delete(&key).await?;
    info!(model = %request.model_name, "model deleted");
    Ok(())
}

/// `POST /model/stream` — SSE progress for a pull, shared across
/// subscribers of the same model.
pub async fn stream_model(
    State(state): State<AppState>,
    Json(request): Json<ModelStreamRequest>,
) -> Response {
    let resolved = resolve_provider(
        &state,
        &ModelRequest {
            model_name: request.model_name.clone(),
            provider_name: request.provider_name.clone(),
            service_name: request.service_name.clone(),
            service_source: None,
        },
    )
    .await;
    let provider = match resolved {
        Ok(provider) => provider,
        Err(error) => return error.into_response(),
    };
    match state.downloads.pull(provider, &request.model_name).await {
        Ok(subscription) => sse_progress_stream(subscription.into_stream()),
        Err(error) => error.into_response(),
    }
}

/// `POST /model/stream/cancel` — idempotent.
pub async fn cancel_model_stream(
    State(state): State<AppState>,
    Json(request): Json<ModelStreamRequest>,
) -> Response {
    let cancelled = state.downloads.cancel(&request.model_name).await;
    ok(serde_json::json!({"cancelled": cancelled}))
}

/// `GET /model/recommend`
pub async fn recommend_models() -> Response {
    catalogue_section("recommend")
}

/// `GET /model/support`
pub async fn support_models() -> Response {
    catalogue_section("support")
}

fn catalogue_section(section: &str) -> Response {
    match serde_json::from_str::<Value>(SUPPORT_MODELS) {
        Ok(catalogue) => ok(catalogue.get(section).cloned().unwrap_or(Value::Array(vec![]))),
        Err(error) => AogError::internal(format!("catalogue is corrupt: {error}")).into_response(),
    }
}

/// Resolve the provider a model operation targets: explicit name first,
/// otherwise the service's bound provider for the requested side (local by
/// default).
async fn resolve_provider(
    state: &AppState,
    request: &ModelRequest,
) -> AogResult<crate::models::ServiceProvider> {
    if !request.provider_name.is_empty() {
        return state
            .repos
            .providers
            .get(&request.provider_name)
            .await?
            .ok_or_else(|| AogError::bad_request(format!(
                "unknown provider '{}'",
                request.provider_name
            )));
    }

    if request.service_name.is_empty() {
        return Err(AogError::bad_request(
            "either provider_name or service_name is required",
        ));
    }
    let service = state.repos.services.require(&request.service_name).await?;
    let source = request.service_source.unwrap_or(ServiceSource::Local);
    let bound = match source {
        ServiceSource::Local => &service.local_provider,
        ServiceSource::Remote => &service.remote_provider,
    };
    if bound.is_empty() {
        return Err(AogError::service_unavailable(request.service_name.as_str()));
    }
    state
        .repos
        .providers
        .get(bound)
        .await?
        .ok_or_else(|| AogError::service_unavailable(request.service_name.as_str()))
}
