//! Domain models shared across the gateway
//!
//! These are the records the web layer, scheduler and repositories exchange.
//! Database entities live in `crate::entities`; conversion happens inside the
//! repositories.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use utoipa::ToSchema;

pub mod model;
pub mod provider;
pub mod service;
pub mod version;

pub use model::*;
pub use provider::*;
pub use service::*;
pub use version::*;

/// The closed set of service names the gateway exposes.
pub const SERVICE_NAMES: &[&str] = &[
    "chat",
    "embed",
    "generate",
    "models",
    "text-to-image",
    "speech-to-text",
    "speech-to-text-ws",
    "text-to-speech",
    "image-to-image",
    "image-to-video",
];

/// Whether `name` belongs to the closed service set.
pub fn is_known_service(name: &str) -> bool {
    SERVICE_NAMES.contains(&name)
}

/// Per-service routing rule between the local and remote provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HybridPolicy {
    #[default]
    Default,
    AlwaysLocal,
    AlwaysRemote,
}

/// Which side of the hybrid split a provider serves from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, ToSchema,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceSource {
    Local,
    Remote,
}

/// Credential mechanism a provider expects on outbound calls.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Apikey,
    Token,
}

/// Cached liveness of a provider as seen by the health prober.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderStatus {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

/// Who owns a provider record. System-scope providers are seeded by the
/// gateway and cannot be deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProviderScope {
    #[default]
    User,
    System,
}

/// Lifecycle state of a model relative to one provider.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, ToSchema, Default,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelStatus {
    #[default]
    Absent,
    Downloading,
    Downloaded,
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn service_set_is_closed() {
        assert!(is_known_service("chat"));
        assert!(is_known_service("speech-to-text-ws"));
        assert!(!is_known_service("text_to_image"));
        assert!(!is_known_service("translate"));
    }

    #[test]
    fn enums_round_trip_through_strings() {
        assert_eq!(HybridPolicy::AlwaysRemote.to_string(), "always_remote");
        assert_eq!(
            HybridPolicy::from_str("always_local").unwrap(),
            HybridPolicy::AlwaysLocal
        );
        assert_eq!(ServiceSource::from_str("local").unwrap(), ServiceSource::Local);
        assert_eq!(ProviderStatus::Unhealthy.to_string(), "unhealthy");
    }
}
