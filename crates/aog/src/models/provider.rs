//! Service provider records and CRUD request shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AuthType, ProviderScope, ProviderStatus, ServiceSource};
use crate::errors::{AogError, AogResult};

/// A named backend that can serve one service in one dialect.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceProvider {
    /// Unique provider name, e.g. `local_ollama_chat`
    pub provider_name: String,
    pub service_name: String,
    pub service_source: ServiceSource,
    /// Dialect tag resolved against the flavor registry
    pub flavor: String,
    #[serde(default)]
    pub desc: String,
    /// HTTP method of the upstream endpoint
    pub method: String,
    pub url: String,
    pub auth_type: AuthType,
    /// Opaque credential material, stored as given and never logged
    #[serde(default)]
    pub auth_key: String,
    /// JSON object merged into outbound request headers
    #[serde(default)]
    pub extra_headers: String,
    /// JSON object merged into outbound request bodies
    #[serde(default)]
    pub extra_body: String,
    /// Free-form provider properties (supported models, limits, ...)
    #[serde(default)]
    pub properties: String,
    pub status: ProviderStatus,
    pub scope: ProviderScope,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceProvider {
    /// Enforce the record-level invariants shared by create and update paths.
    ///
    /// `auth_type != none` requires a non-empty `auth_key`, and the URL must
    /// parse whenever one is present.
    pub fn validate(&self) -> AogResult<()> {
        if self.auth_type != AuthType::None && self.auth_key.trim().is_empty() {
            return Err(AogError::ProviderAuthMissing {
                provider: self.provider_name.clone(),
            });
        }
        if !self.url.is_empty() && url::Url::parse(&self.url).is_err() {
            return Err(AogError::ProviderUrlMalformed {
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

/// Body of `POST /service_provider` and entries in the import document
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceProviderRequest {
    pub provider_name: String,
    pub service_name: String,
    pub service_source: ServiceSource,
    pub flavor: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth_key: String,
    #[serde(default)]
    pub extra_headers: String,
    #[serde(default)]
    pub extra_body: String,
    #[serde(default)]
    pub properties: String,
    /// Models to register for this provider at create time
    #[serde(default)]
    pub models: Vec<String>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> ServiceProvider {
        ServiceProvider {
            provider_name: "remote_openai_chat".into(),
            service_name: "chat".into(),
            service_source: ServiceSource::Remote,
            flavor: "openai".into(),
            desc: String::new(),
            method: "POST".into(),
            url: "https://api.openai.com/v1/chat/completions".into(),
            auth_type: AuthType::Apikey,
            auth_key: "sk-test".into(),
            extra_headers: String::new(),
            extra_body: String::new(),
            properties: String::new(),
            status: ProviderStatus::Unknown,
            scope: ProviderScope::User,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn auth_type_requires_auth_key() {
        let mut p = provider();
        p.auth_key = String::new();
        assert!(matches!(
            p.validate(),
            Err(AogError::ProviderAuthMissing { .. })
        ));
        p.auth_type = AuthType::None;
        assert!(p.validate().is_ok());
    }

    #[test]
    fn malformed_url_is_rejected() {
        let mut p = provider();
        p.url = "not a url".into();
        assert!(matches!(
            p.validate(),
            Err(AogError::ProviderUrlMalformed { .. })
        ));
    }
}
