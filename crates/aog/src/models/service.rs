//! Service records and request/response shapes for the service surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::HybridPolicy;

/// A capability the gateway exposes, bound to at most one local and one
/// remote provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Service {
    /// Name from the closed service set (`chat`, `embed`, ...)
    pub name: String,
    pub hybrid_policy: HybridPolicy,
    /// Bound local provider name; empty when unbound
    #[serde(default)]
    pub local_provider: String,
    /// Bound remote provider name; empty when unbound
    #[serde(default)]
    pub remote_provider: String,
    /// Whether `/service/install` can set this service up locally
    pub can_install: bool,
    /// Aggregate availability: 1 when at least one bound provider is usable
    pub status: i32,
    /// Opaque icon reference used by the control panel
    #[serde(default)]
    pub avatar: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /service/install`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInstallRequest {
    pub service_name: String,
    /// Override the flavor of the locally installed provider (default `ollama`)
    #[serde(default)]
    pub flavor: Option<String>,
    /// Skip the local engine bootstrap and only create records
    #[serde(default)]
    pub skip_model: bool,
}

/// Body of `PUT /service`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceUpdateRequest {
    pub service_name: String,
    #[serde(default)]
    pub hybrid_policy: Option<HybridPolicy>,
    #[serde(default)]
    pub local_provider: Option<String>,
    #[serde(default)]
    pub remote_provider: Option<String>,
}

/// One service entry inside the export/import document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceExportEntry {
    pub service_providers: ServiceProviderBinding,
    pub hybrid_policy: HybridPolicy,
}

/// The local/remote provider binding of one exported service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct ServiceProviderBinding {
    #[serde(default)]
    pub local: String,
    #[serde(default)]
    pub remote: String,
}
