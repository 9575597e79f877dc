//! Model records bound to providers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{ModelStatus, ServiceSource};

/// A concrete model bound to one provider.
///
/// Keyed by (`provider_name`, `model_name`); the surrogate id exists for
/// storage only. At most one model per (service, source) pair carries
/// `is_default` — the scheduler relies on that invariant.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Model {
    pub id: Uuid,
    pub provider_name: String,
    pub model_name: String,
    pub service_name: String,
    pub service_source: ServiceSource,
    pub status: ModelStatus,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /model` and `DELETE /model`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelRequest {
    pub model_name: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub service_source: Option<ServiceSource>,
}

/// Body of `POST /model/stream` and `/model/stream/cancel`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelStreamRequest {
    pub model_name: String,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub service_name: String,
}

/// One entry of the recommended/supported model catalogue
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecommendedModel {
    pub name: String,
    pub service_name: String,
    pub flavor: String,
    #[serde(default)]
    pub desc: String,
    /// Approximate memory the model needs, in GiB
    #[serde(default)]
    pub size_gib: f64,
}
