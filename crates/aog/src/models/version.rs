//! Version record served by `/version` and the update surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Single-row record of the served spec version and gateway build.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VersionRecord {
    /// Wire-format version segment of the base path, e.g. `v0.2`
    pub spec_version: String,
    /// Running gateway version
    pub gateway_version: String,
    /// Newest version the update channel has announced, if any
    #[serde(default)]
    pub available_version: String,
    pub updated_at: DateTime<Utc>,
}
