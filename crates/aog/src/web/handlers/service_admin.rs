//! Service administration handlers: install, update, export/import

use std::collections::HashMap;

use axum::{Json, extract::State, response::Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::assets::SUPPORT_MODELS;
use crate::database::repositories::{DataStore, ListParams};
use crate::errors::{AogError, AogResult};
use crate::models::{
    AuthType, Model, ModelStatus, ProviderScope, ProviderStatus, RecommendedModel, Service,
    ServiceExportEntry, ServiceInstallRequest, ServiceProvider, ServiceProviderBinding,
    ServiceProviderRequest, ServiceSource, ServiceUpdateRequest, is_known_service,
};
use crate::web::AppState;
use crate::web::responses::handle_result;

/// `GET /service`
pub async fn list_services(State(state): State<AppState>) -> Response {
    handle_result(state.repos.services.list(&ListParams::default()).await)
}

/// `PUT /service`
pub async fn update_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceUpdateRequest>,
) -> Response {
    handle_result(apply_service_update(&state, request).await)
}

async fn apply_service_update(
    state: &AppState,
    request: ServiceUpdateRequest,
) -> AogResult<Service> {
    let mut service = state.repos.services.require(&request.service_name).await?;
    if let Some(policy) = request.hybrid_policy {
        service.hybrid_policy = policy;
    }
    if let Some(local) = request.local_provider {
        service.local_provider = local;
    }
    if let Some(remote) = request.remote_provider {
        service.remote_provider = remote;
    }
    state.repos.services.put(service).await
}

/// `POST /service/install` — create the local provider for a service and
/// bootstrap its engine in the background.
pub async fn install_service(
    State(state): State<AppState>,
    Json(request): Json<ServiceInstallRequest>,
) -> Response {
    handle_result(apply_install(&state, request).await)
}

async fn apply_install(
    state: &AppState,
    request: ServiceInstallRequest,
) -> AogResult<ServiceProvider> {
    let service_name = request.service_name.clone();
    if !is_known_service(&service_name) {
        return Err(AogError::bad_request(format!(
            "unknown service '{service_name}'"
        )));
    }
    let service = state.repos.services.require(&service_name).await?;
    if !service.can_install {
        return Err(AogError::bad_request(format!(
            "service '{service_name}' is not installable"
        )));
    }

    let flavor = request
        .flavor
        .unwrap_or_else(|| default_local_flavor(&service_name).to_string());
    let provider_name = format!("local_{flavor}_{service_name}");
    let method = state.flavors.current().get(&flavor, &service_name).method.clone();

    let provider = ServiceProvider {
        provider_name: provider_name.clone(),
        service_name: service_name.clone(),
        service_source: ServiceSource::Local,
        flavor: flavor.clone(),
        desc: format!("managed local {flavor} provider for {service_name}"),
        method,
        url: String::new(),
        auth_type: AuthType::None,
        auth_key: String::new(),
        extra_headers: String::new(),
        extra_body: String::new(),
        properties: String::new(),
        status: ProviderStatus::Unknown,
        scope: ProviderScope::System,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let provider = state.repos.providers.put(provider).await?;
    state.registry.upsert(provider.clone()).await;

    state
        .repos
        .services
        .bind_provider(&service_name, Some(provider_name.clone()), None)
        .await?;

    if !request.skip_model
        && let Some(model) = recommended_model(&service_name, &flavor)
    {
        let record = Model {
            id: Uuid::new_v4(),
            provider_name: provider_name.clone(),
            model_name: model.clone(),
            service_name: service_name.clone(),
            service_source: ServiceSource::Local,
            status: ModelStatus::Absent,
            is_default: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        match state.repos.models.put(record).await {
            Ok(_) => {
                let key = crate::database::repositories::ModelKey::new(&provider_name, &model);
                let _ = state.repos.models.set_default(&key).await;
            }
            Err(error) => warn!(%error, model, "could not register default model"),
        }
    }

    // Engine bootstrap happens off the request path; install progress is
    // visible through /engine/health.
    let engines = state.engines.clone();
    let bootstrap_flavor = flavor.clone();
    tokio::spawn(async move {
        let token = CancellationToken::new();
        let Ok(supervisor) = engines.supervisor(&bootstrap_flavor) else {
            return;
        };
        if let Err(error) = supervisor.install(false, &token).await {
            warn!(flavor = %bootstrap_flavor, %error, "engine install failed");
            return;
        }
        if let Err(error) = supervisor.start("daemon").await {
            warn!(flavor = %bootstrap_flavor, %error, "engine start failed");
        }
    });

    info!(service = %service_name, provider = %provider.provider_name, "service installed");
    Ok(provider)
}

/// Local engine flavor a service installs by default.
fn default_local_flavor(service_name: &str) -> &'static str {
    match service_name {
        "text-to-image" | "speech-to-text" | "speech-to-text-ws" | "text-to-speech"
        | "image-to-image" | "image-to-video" => "openvino",
        _ => "ollama",
    }
}

/// First recommended model for (service, flavor) from the embedded catalogue.
fn recommended_model(service_name: &str, flavor: &str) -> Option<String> {
    let catalogue: Value = serde_json::from_str(SUPPORT_MODELS).ok()?;
    let recommend: Vec<RecommendedModel> =
        serde_json::from_value(catalogue.get("recommend")?.clone()).ok()?;
    recommend
        .into_iter()
        .find(|entry| entry.service_name == service_name && entry.flavor == flavor)
        .map(|entry| entry.name)
}

/// The export/import document.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExportDocument {
    pub version: String,
    pub services: HashMap<String, ServiceExportEntry>,
    pub service_providers: HashMap<String, ServiceProviderRequest>,
}

/// `POST /service/export`
pub async fn export_services(State(state): State<AppState>) -> Response {
    handle_result(build_export(&state).await)
}

async fn build_export(state: &AppState) -> AogResult<ExportDocument> {
    let version = state.repos.versions.get().await?.spec_version;
    let services = state.repos.services.list(&ListParams::default()).await?;
    let providers = state.repos.providers.list(&ListParams::default()).await?;

    let mut document = ExportDocument {
        version,
        services: HashMap::new(),
        service_providers: HashMap::new(),
    };
    for service in services {
        document.services.insert(
            service.name.clone(),
            ServiceExportEntry {
                service_providers: ServiceProviderBinding {
                    local: service.local_provider.clone(),
                    remote: service.remote_provider.clone(),
                },
                hybrid_policy: service.hybrid_policy,
            },
        );
    }
    for provider in providers {
        document.service_providers.insert(
            provider.provider_name.clone(),
            ServiceProviderRequest {
                provider_name: provider.provider_name.clone(),
                service_name: provider.service_name,
                service_source: provider.service_source,
                flavor: provider.flavor,
                desc: provider.desc,
                method: provider.method,
                url: provider.url,
                auth_type: provider.auth_type,
                auth_key: provider.auth_key,
                extra_headers: provider.extra_headers,
                extra_body: provider.extra_body,
                properties: provider.properties,
                models: Vec::new(),
            },
        );
    }
    Ok(document)
}

/// `POST /service/import` — idempotent: re-importing the same document
/// yields the same state.
pub async fn import_services(
    State(state): State<AppState>,
    Json(document): Json<ExportDocument>,
) -> Response {
    handle_result(apply_import(&state, document).await)
}

async fn apply_import(state: &AppState, document: ExportDocument) -> AogResult<Value> {
    let current = state.repos.versions.get().await?.spec_version;
    if document.version != current {
        return Err(AogError::bad_request(format!(
            "unsupported export version '{}' (expected '{current}')",
            document.version
        )));
    }

    for (name, request) in document.service_providers {
        let provider = ServiceProvider {
            provider_name: name,
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
        };
        provider.validate()?;
        state.repos.providers.put(provider).await?;
    }

    for (name, entry) in document.services {
        let Some(mut service) = state.repos.services.get(&name).await? else {
            warn!(service = %name, "import references unknown service; skipping");
            continue;
        };
        service.hybrid_policy = entry.hybrid_policy;
        service.local_provider = entry.service_providers.local;
        service.remote_provider = entry.service_providers.remote;
        state.repos.services.put(service).await?;
    }

    state.registry.hydrate().await?;
    Ok(serde_json::json!({"imported": true}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HybridPolicy;

    #[test]
    fn default_flavors_follow_service_kind() {
        assert_eq!(default_local_flavor("chat"), "ollama");
        assert_eq!(default_local_flavor("embed"), "ollama");
        assert_eq!(default_local_flavor("text-to-image"), "openvino");
        assert_eq!(default_local_flavor("speech-to-text-ws"), "openvino");
    }

    #[test]
    fn catalogue_provides_chat_default() {
        assert_eq!(recommended_model("chat", "ollama").as_deref(), Some("llama3.1"));
        assert!(recommended_model("chat", "nosuchflavor").is_none());
    }

    #[test]
    fn export_document_round_trips() {
        let json = serde_json::json!({
            "version": "v0.2",
            "services": {
                "chat": {
                    "service_providers": {"local": "local_ollama_chat", "remote": ""},
                    "hybrid_policy": "default"
                }
            },
            "service_providers": {
                "local_ollama_chat": {
                    "provider_name": "local_ollama_chat",
                    "service_name": "chat",
                    "service_source": "local",
                    "flavor": "ollama"
                }
            }
        });
        let document: ExportDocument = serde_json::from_value(json).unwrap();
        assert_eq!(document.services["chat"].hybrid_policy, HybridPolicy::Default);
        assert_eq!(
            document.service_providers["local_ollama_chat"].flavor,
            "ollama"
        );
    }
}
