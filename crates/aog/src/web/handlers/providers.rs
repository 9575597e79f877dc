//! Service provider CRUD handlers

use axum::{
    Json,
    extract::{Query, State},
    response::Response,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::database::repositories::{DataStore, ListParams, ModelKey};
use crate::errors::AogResult;
use crate::models::{
    Model, ModelStatus, ProviderScope, ProviderStatus, ServiceProvider, ServiceProviderRequest,
};
use crate::web::AppState;
use crate::web::responses::handle_result;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProviderQuery {
    /// Filter by serving service
    pub service_name: Option<String>,
    /// Filter by source (`local` / `remote`)
    pub service_source: Option<String>,
    /// Fetch one provider by name
    pub provider_name: Option<String>,
}

/// `GET /service_provider`
pub async fn list_providers(
    State(state): State<AppState>,
    Query(query): Query<ProviderQuery>,
) -> Response {
    let mut filters = Vec::new();
    if let Some(service_name) = query.service_name {
        filters.push(ListParams::eq("service_name", service_name));
    }
    if let Some(source) = query.service_source {
        filters.push(ListParams::eq("service_source", source));
    }
    if let Some(provider_name) = query.provider_name {
        filters.push(ListParams::eq("provider_name", provider_name));
    }
    handle_result(
        state
            .repos
            .providers
            .list(&ListParams::filtered(filters))
            .await,
    )
}

/// `POST /service_provider`
pub async fn create_provider(
    State(state): State<AppState>,
    Json(request): Json<ServiceProviderRequest>,
) -> Response {
    handle_result(apply_create(&state, request).await)
}

async fn apply_create(
    state: &AppState,
    request: ServiceProviderRequest,
) -> AogResult<ServiceProvider> {
    let models = request.models.clone();
    let provider = to_provider(request);
    let provider = state.repos.providers.add(provider).await?;
    state.registry.upsert(provider.clone()).await;

    for model_name in models {
        let record = Model {
            id: Uuid::new_v4(),
            provider_name: provider.provider_name.clone(),
            model_name,
            service_name: provider.service_name.clone(),
            service_source: provider.service_source,
            status: ModelStatus::Downloaded,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        state.repos.models.put(record).await?;
    }

    // A freshly created provider becomes the bound one for its side when
    // that side is empty.
    let (local, remote) = match provider.service_source {
        crate::models::ServiceSource::Local => (Some(provider.provider_name.clone()), None),
        crate::models::ServiceSource::Remote => (None, Some(provider.provider_name.clone())),
    };
    let service = state.repos.services.require(&provider.service_name).await?;
    let side_empty = match provider.service_source {
        crate::models::ServiceSource::Local => service.local_provider.is_empty(),
        crate::models::ServiceSource::Remote => service.remote_provider.is_empty(),
    };
    if side_empty {
        state
            .repos
            .services
            .bind_provider(&provider.service_name, local, remote)
            .await?;
    }

    info!(provider = %provider.provider_name, "service provider created");
    Ok(provider)
}

/// `PUT /service_provider`
pub async fn update_provider(
    State(state): State<AppState>,
    Json(request): Json<ServiceProviderRequest>,
) -> Response {
    handle_result(apply_update(&state, request).await)
}

async fn apply_update(
    state: &AppState,
    request: ServiceProviderRequest,
) -> AogResult<ServiceProvider> {
    let provider = state.repos.providers.put(to_provider(request)).await?;
    state.registry.upsert(provider.clone()).await;
    Ok(provider)
}

#[derive(Debug, Deserialize)]
pub struct ProviderDeleteRequest {
    pub provider_name: String,
}

/// `DELETE /service_provider` — refuses system-scope providers.
pub async fn delete_provider(
    State(state): State<AppState>,
    Json(request): Json<ProviderDeleteRequest>,
) -> Response {
    handle_result(apply_delete(&state, request).await)
}

async fn apply_delete(state: &AppState, request: ProviderDeleteRequest) -> AogResult<()> {
    state.repos.providers.delete(&request.provider_name).await?;
    state.registry.remove(&request.provider_name).await;

    // Drop this provider's model records and unbind it from its service.
    let models = state
        .repos
        .models
        .list(&ListParams::filtered(vec![ListParams::eq(
            "provider_name",
            request.provider_name.clone(),
        )]))
        .await?;
    for model in models {
        let _ = state
            .repos
            .models
            .delete(&ModelKey::new(&model.provider_name, &model.model_name))
            .await;
    }

    let services = state.repos.services.list(&ListParams::default()).await?;
    for mut service in services {
        let mut changed = false;
        if service.local_provider == request.provider_name {
            service.local_provider = String::new();
            changed = true;
        }
        if service.remote_provider == request.provider_name {
            service.remote_provider = String::new();
            changed = true;
        }
        if changed {
            // put() keeps non-empty fields, so unbinding goes through delete
            // plus add of the corrected record.
            let name = service.name.clone();
            state.repos.services.delete(&name).await?;
            state.repos.services.add(service).await?;
        }
    }

    info!(provider = %request.provider_name, "service provider deleted");
    Ok(())
}

fn to_provider(request: ServiceProviderRequest) -> ServiceProvider {
    ServiceProvider {
        provider_name: request.provider_name,
        service_name: request.service_name,
        service_source: request.service_source,
        flavor: request.flavor,
        desc: request.desc,
        method: request.method,
        url: request.url,
        auth_type: request.auth_type,
        auth_key: request.auth_key,
        extra_headers: request.extra_headers,
        extra_body: request.extra_body,
        properties: request.properties,
        status: ProviderStatus::Unknown,
        scope: ProviderScope::User,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}
