//! OpenAPI document served at `/openapi.json`

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AOG Gateway API",
        description = "Local AI gateway multiplexing inference requests across local engines and remote providers",
    ),
    components(schemas(
        crate::models::Service,
        crate::models::ServiceProvider,
        crate::models::Model,
        crate::models::VersionRecord,
        crate::models::ServiceInstallRequest,
        crate::models::ServiceUpdateRequest,
        crate::models::ServiceProviderRequest,
        crate::models::ModelRequest,
        crate::models::ModelStreamRequest,
        crate::models::RecommendedModel,
        crate::models::HybridPolicy,
        crate::models::ServiceSource,
        crate::models::AuthType,
        crate::models::ProviderStatus,
        crate::models::ProviderScope,
        crate::models::ModelStatus,
        crate::downloads::ProgressFrame,
        crate::plugins::PluginInfo,
        crate::plugins::PluginManifest,
    ))
)]
pub struct ApiDoc;
