//! Provider registry and health tracking
//!
//! The registry is the in-memory view of all known providers plus their
//! latest health verdict. The scheduler reads cached snapshots and never
//! waits on a probe; the prober and request outcomes drive transitions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub mod prober;
pub mod transport;

pub use prober::HealthProber;
pub use transport::{OutboundRequest, Transport, TransportFactory};

use crate::database::repositories::{DataStore, ListParams, ProviderRepository};
use crate::errors::AogResult;
use crate::models::{ProviderStatus, ServiceProvider};

/// Consecutive request failures that flip a provider to unhealthy.
const FAILURES_TO_UNHEALTHY: u32 = 3;

#[derive(Debug, Clone)]
struct ProviderState {
    provider: ServiceProvider,
    status: ProviderStatus,
    consecutive_failures: u32,
}

/// In-memory registry keyed by provider name; cheap to clone.
#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<RwLock<HashMap<String, ProviderState>>>,
    repository: ProviderRepository,
}

impl ProviderRegistry {
    pub fn new(repository: ProviderRepository) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            repository,
        }
    }

    /// Load every stored provider into the registry. Called at startup and
    /// after bulk changes such as import.
    pub async fn hydrate(&self) -> AogResult<()> {
        let providers = self.repository.list(&ListParams::default()).await?;
        let mut inner = self.inner.write().await;
        inner.clear();
        for provider in providers {
            inner.insert(
                provider.provider_name.clone(),
                ProviderState {
                    status: provider.status,
                    consecutive_failures: 0,
                    provider,
                },
            );
        }
        info!("provider registry hydrated with {} providers", inner.len());
        Ok(())
    }

    pub async fn upsert(&self, provider: ServiceProvider) {
        let mut inner = self.inner.write().await;
        let state = inner
            .entry(provider.provider_name.clone())
            .or_insert_with(|| ProviderState {
                status: provider.status,
                consecutive_failures: 0,
                provider: provider.clone(),
            });
        state.provider = provider;
    }

    pub async fn remove(&self, provider_name: &str) {
        self.inner.write().await.remove(provider_name);
    }

    /// Latest cached record and status; never blocks on probing.
    pub async fn snapshot(&self, provider_name: &str) -> Option<(ServiceProvider, ProviderStatus)> {
        let inner = self.inner.read().await;
        inner
            .get(provider_name)
            .map(|state| (state.provider.clone(), state.status))
    }

    pub async fn status(&self, provider_name: &str) -> ProviderStatus {
        let inner = self.inner.read().await;
        inner
            .get(provider_name)
            .map(|state| state.status)
            .unwrap_or(ProviderStatus::Unknown)
    }

    pub async fn all_names(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }

    /// One observed request success: flips straight back to healthy.
    pub async fn record_success(&self, provider_name: &str) {
        self.apply(provider_name, |state| {
            state.consecutive_failures = 0;
            let changed = state.status != ProviderStatus::Healthy;
            state.status = ProviderStatus::Healthy;
            changed
        })
        .await;
    }

    /// One observed request failure; three in a row flip to unhealthy.
    pub async fn record_failure(&self, provider_name: &str) {
        self.apply(provider_name, |state| {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= FAILURES_TO_UNHEALTHY
                && state.status != ProviderStatus::Unhealthy
            {
                state.status = ProviderStatus::Unhealthy;
                return true;
            }
            false
        })
        .await;
    }

    /// Verdict from an active probe cycle.
    pub async fn apply_probe(&self, provider_name: &str, healthy: bool) {
        self.apply(provider_name, |state| {
            let next = if healthy {
                state.consecutive_failures = 0;
                ProviderStatus::Healthy
            } else {
                ProviderStatus::Unhealthy
            };
            let changed = state.status != next;
            state.status = next;
            changed
        })
        .await;
    }

    /// Mutate one provider state under the lock, then persist any status
    /// transition after the lock is dropped.
    async fn apply(&self, provider_name: &str, f: impl FnOnce(&mut ProviderState) -> bool) {
        let transition = {
            let mut inner = self.inner.write().await;
            let Some(state) = inner.get_mut(provider_name) else {
                debug!(provider = provider_name, "ignoring update for unknown provider");
                return;
            };
            f(state).then_some(state.status)
        };

        if let Some(status) = transition {
            info!(provider = provider_name, status = %status, "provider status transition");
            if let Err(error) = self.repository.update_status(provider_name, status).await {
                warn!(
                    provider = provider_name,
                    %error,
                    "failed to persist provider status"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::models::{AuthType, ProviderScope, ServiceSource};
    use chrono::Utc;

    async fn registry_with(provider: ServiceProvider) -> ProviderRegistry {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let repo = ProviderRepository::new(db.connection());
        repo.add(provider).await.unwrap();
        let registry = ProviderRegistry::new(repo);
        registry.hydrate().await.unwrap();
        registry
    }

    fn provider(name: &str) -> ServiceProvider {
        ServiceProvider {
            provider_name: name.into(),
            service_name: "chat".into(),
            service_source: ServiceSource::Remote,
            flavor: "openai".into(),
            desc: String::new(),
            method: "POST".into(),
            url: "https://api.example.com/v1/chat".into(),
            auth_type: AuthType::None,
            auth_key: String::new(),
            extra_headers: String::new(),
            extra_body: String::new(),
            properties: String::new(),
            status: ProviderStatus::Unknown,
            scope: ProviderScope::User,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn three_failures_flip_to_unhealthy_one_success_back() {
        let registry = registry_with(provider("p")).await;

        registry.record_failure("p").await;
        registry.record_failure("p").await;
        assert_eq!(registry.status("p").await, ProviderStatus::Unknown);

        registry.record_failure("p").await;
        assert_eq!(registry.status("p").await, ProviderStatus::Unhealthy);

        registry.record_success("p").await;
        assert_eq!(registry.status("p").await, ProviderStatus::Healthy);
    }

    #[tokio::test]
    async fn probe_verdicts_drive_both_directions() {
        let registry = registry_with(provider("p")).await;
        registry.apply_probe("p", true).await;
        assert_eq!(registry.status("p").await, ProviderStatus::Healthy);
        registry.apply_probe("p", false).await;
        assert_eq!(registry.status("p").await, ProviderStatus::Unhealthy);
    }
}
