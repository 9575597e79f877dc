//! Hybrid scheduler
//!
//! Resolves each request to a provider given the service's hybrid policy,
//! the registry's cached health, and the request shape; translates the
//! payload into the provider's dialect; dispatches over the transport pair;
//! and fails over local→remote once under the `default` policy when the
//! local transport fails before the stream has emitted anything.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod policy;

use crate::database::repositories::{DataStore, ModelKey, Repositories};
use crate::errors::{AogError, AogResult};
use crate::flavor::SharedFlavorRegistry;
use crate::models::{HybridPolicy, ProviderStatus, Service, ServiceProvider, ServiceSource};
use crate::providers::transport::{FrameStream, OutboundRequest};
use crate::providers::{ProviderRegistry, TransportFactory};
use crate::translation::{ChainOutcome, run_chain, translate_stream};

/// What the gateway relays back to the client.
pub enum ServeOutcome {
    Json {
        provider: String,
        body: Value,
    },
    /// Frames already translated to the gateway wire format
    Stream {
        provider: String,
        frames: FrameStream,
    },
}

#[derive(Clone)]
pub struct HybridScheduler {
    repos: Repositories,
    registry: ProviderRegistry,
    flavors: SharedFlavorRegistry,
    transports: TransportFactory,
    remote_payload_threshold: usize,
}

impl HybridScheduler {
    pub fn new(
        repos: Repositories,
        registry: ProviderRegistry,
        flavors: SharedFlavorRegistry,
        transports: TransportFactory,
        remote_payload_threshold: usize,
    ) -> Self {
        Self {
            repos,
            registry,
            flavors,
            transports,
            remote_payload_threshold,
        }
    }

    /// Route one request. The inbound cancellation token is propagated to
    /// the outbound call and any stream translation.
    pub async fn serve(
        &self,
        service_name: &str,
        payload: Value,
        token: CancellationToken,
    ) -> AogResult<ServeOutcome> {
        let service = self.repos.services.require(service_name).await?;
        let stream_requested = payload
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let candidates = self.candidates(&service, &payload).await?;
        if candidates.is_empty() {
            return Err(AogError::service_unavailable(service_name));
        }

        let mut last_error = None;
        for (index, provider) in candidates.iter().enumerate() {
            match self
                .dispatch(provider, service_name, &payload, stream_requested, &token)
                .await
            {
                Ok(outcome) => {
                    self.registry.record_success(&provider.provider_name).await;
                    if index > 0 {
                        info!(
                            service = service_name,
                            provider = %provider.provider_name,
                            "request served after fail-over"
                        );
                    }
                    return Ok(outcome);
                }
                Err(AogError::Cancelled) => return Err(AogError::Cancelled),
                Err(error) => {
                    warn!(
                        service = service_name,
                        provider = %provider.provider_name,
                        %error,
                        "dispatch failed"
                    );
                    self.registry.record_failure(&provider.provider_name).await;

                    let failover_allowed = service.hybrid_policy == HybridPolicy::Default
                        && provider.service_source == ServiceSource::Local
                        && candidates
                            .get(index + 1)
                            .map(|next| next.service_source == ServiceSource::Remote)
                            .unwrap_or(false)
                        && self
                            .registry
                            .status(&candidates[index + 1].provider_name)
                            .await
                            != ProviderStatus::Unhealthy;
                    last_error = Some(error);
                    if !failover_allowed {
                        break;
                    }
                    debug!(service = service_name, "failing over to remote provider");
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AogError::service_unavailable(service_name)))
    }

    /// The side this request would be routed to right now. The gateway
    /// middleware uses this to rewrite payloads before dispatch.
    pub async fn predict_source(
        &self,
        service_name: &str,
        payload: &Value,
    ) -> AogResult<ServiceSource> {
        let service = self.repos.services.require(service_name).await?;
        let candidates = self.candidates(&service, payload).await?;
        candidates
            .first()
            .map(|provider| provider.service_source)
            .ok_or_else(|| AogError::service_unavailable(service_name))
    }

    /// Candidate order for this request, already filtered to bound and
    /// plausibly usable providers.
    async fn candidates(
        &self,
        service: &Service,
        payload: &Value,
    ) -> AogResult<Vec<ServiceProvider>> {
        let local = self.bound_provider(&service.local_provider).await;
        let remote = self.bound_provider(&service.remote_provider).await;

        let ordered: Vec<Option<(ServiceProvider, ProviderStatus)>> = match service.hybrid_policy {
            HybridPolicy::AlwaysLocal => vec![local],
            HybridPolicy::AlwaysRemote => vec![remote],
            HybridPolicy::Default => {
                let prefer = policy::preferred_source(policy::PreferenceInputs {
                    payload_bytes: policy::effective_payload_bytes(payload),
                    remote_payload_threshold: self.remote_payload_threshold,
                    model_is_remote_only: self
                        .model_is_remote_only(payload, local.as_ref(), remote.as_ref())
                        .await,
                });
                // Preferred side first; an unhealthy preferred side yields to
                // a usable other side.
                let (mut first, mut second) = match prefer {
                    ServiceSource::Local => (local, remote),
                    ServiceSource::Remote => (remote, local),
                };
                let first_unhealthy = matches!(
                    first.as_ref().map(|(_, status)| *status),
                    Some(ProviderStatus::Unhealthy) | None
                );
                let second_usable = matches!(
                    second.as_ref().map(|(_, status)| *status),
                    Some(ProviderStatus::Healthy) | Some(ProviderStatus::Unknown)
                );
                if first_unhealthy && second_usable {
                    std::mem::swap(&mut first, &mut second);
                }
                vec![first, second]
            }
        };

        Ok(ordered
            .into_iter()
            .flatten()
            .filter(|(_, status)| *status != ProviderStatus::Unhealthy || single(service))
            .map(|(provider, _)| provider)
            .collect())
    }

    async fn bound_provider(&self, name: &str) -> Option<(ServiceProvider, ProviderStatus)> {
        if name.is_empty() {
            return None;
        }
        self.registry.snapshot(name).await
    }

    /// Whether the requested model exists only on the remote side.
    async fn model_is_remote_only(
        &self,
        payload: &Value,
        local: Option<&(ServiceProvider, ProviderStatus)>,
        remote: Option<&(ServiceProvider, ProviderStatus)>,
    ) -> bool {
        let Some(model) = payload.get("model").and_then(Value::as_str) else {
            return false;
        };
        let (Some((local, _)), Some((remote, _))) = (local, remote) else {
            return false;
        };
        let local_has = self
            .repos
            .models
            .is_exist(&ModelKey::new(&local.provider_name, model))
            .await
            .unwrap_or(false);
        let remote_has = self
            .repos
            .models
            .is_exist(&ModelKey::new(&remote.provider_name, model))
            .await
            .unwrap_or(false);
        !local_has && remote_has
    }

    /// Translate, forward, translate back. For streams this returns as soon
    /// as the upstream stream is established; chunk translation happens as
    /// the frames flow.
    async fn dispatch(
        &self,
        provider: &ServiceProvider,
        service_name: &str,
        payload: &Value,
        stream_requested: bool,
        token: &CancellationToken,
    ) -> AogResult<ServeOutcome> {
        let flavor_registry = self.flavors.current();
        let template = flavor_registry.get(&provider.flavor, service_name);

        let mut headers = HashMap::new();
        let translated = match run_chain(&template.request_from_aog, payload.clone(), &mut headers)?
        {
            ChainOutcome::Value(value) => value,
            ChainOutcome::Dropped => {
                return Err(AogError::translation("request dropped by converter chain"));
            }
        };

        let transport = self.transports.for_provider(provider);
        let url = match transport.endpoint(service_name).await {
            Ok(url) => url,
            // Unset provider URL falls back to the template's endpoint.
            Err(AogError::ProviderUrlMalformed { .. }) if !template.url.is_empty() => {
                template.url.clone()
            }
            Err(error) => return Err(error),
        };
        let method = if provider.method.is_empty() {
            template.method.clone()
        } else {
            provider.method.clone()
        };
        let body = (method != "GET").then_some(translated);
        let request = OutboundRequest {
            url,
            method,
            headers,
            body,
        };

        if stream_requested {
            let upstream = transport.stream_call(request, token).await?;
            let chain = Arc::new(template.stream_response_to_aog.clone());
            let frames: FrameStream = Box::pin(translate_stream(chain, upstream));
            Ok(ServeOutcome::Stream {
                provider: provider.provider_name.clone(),
                frames,
            })
        } else {
            let raw = transport.sync_call(request, token).await?;
            let mut headers = HashMap::new();
            let body = match run_chain(&template.response_to_aog, raw, &mut headers)? {
                ChainOutcome::Value(value) => value,
                ChainOutcome::Dropped => {
                    return Err(AogError::translation("response dropped by converter chain"));
                }
            };
            Ok(ServeOutcome::Json {
                provider: provider.provider_name.clone(),
                body,
            })
        }
    }
}

/// Under `always_*` policies the single candidate is tried even when marked
/// unhealthy; there is nothing to fall back to and the attempt doubles as a
/// liveness check.
fn single(service: &Service) -> bool {
    service.hybrid_policy != HybridPolicy::Default
}
