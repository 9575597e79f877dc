//! Outbound transport pair
//!
//! One capability set — `sync_call`, `stream_call`, `health_probe` — with two
//! implementations: HTTP to a remote provider URL, and HTTP to a managed
//! local engine on its loopback port. Providers are data; the factory picks
//! the implementation from `service_source`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::EngineManager;
use crate::errors::{AogError, AogResult};
use crate::models::{AuthType, ServiceProvider, ServiceSource};

/// Active probe timeout.
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

pub type FrameStream = Pin<Box<dyn Stream<Item = AogResult<Value>> + Send>>;

/// A fully translated outbound request ready for one transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
}

/// The transport capability set (design note: dialect polymorphism is data,
/// not subclasses — this is the only trait seam).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Fully-resolved endpoint for this provider serving `service`.
    async fn endpoint(&self, service: &str) -> AogResult<String>;
    async fn sync_call(&self, request: OutboundRequest, token: &CancellationToken)
    -> AogResult<Value>;
    async fn stream_call(
        &self,
        request: OutboundRequest,
        token: &CancellationToken,
    ) -> AogResult<FrameStream>;
    async fn health_probe(&self) -> AogResult<()>;
}

/// Builds the right transport for a provider record.
#[derive(Clone)]
pub struct TransportFactory {
    client: reqwest::Client,
    engines: Arc<EngineManager>,
}

impl TransportFactory {
    pub fn new(client: reqwest::Client, engines: Arc<EngineManager>) -> Self {
        Self { client, engines }
    }

    pub fn for_provider(&self, provider: &ServiceProvider) -> Arc<dyn Transport> {
        match provider.service_source {
            ServiceSource::Remote => Arc::new(RemoteHttpTransport {
                client: self.client.clone(),
                provider: provider.clone(),
            }),
            ServiceSource::Local => Arc::new(LocalEngineTransport {
                client: self.client.clone(),
                engines: self.engines.clone(),
                provider: provider.clone(),
            }),
        }
    }
}

/// HTTP to a remote provider URL, with the provider's credentials.
pub struct RemoteHttpTransport {
    client: reqwest::Client,
    provider: ServiceProvider,
}

/// HTTP to a managed local engine on its loopback port.
pub struct LocalEngineTransport {
    client: reqwest::Client,
    engines: Arc<EngineManager>,
    provider: ServiceProvider,
}

#[async_trait::async_trait]
impl Transport for RemoteHttpTransport {
    async fn endpoint(&self, _service: &str) -> AogResult<String> {
        if self.provider.url.is_empty() {
            return Err(AogError::ProviderUrlMalformed { url: String::new() });
        }
        Ok(self.provider.url.clone())
    }

    async fn sync_call(
        &self,
        request: OutboundRequest,
        token: &CancellationToken,
    ) -> AogResult<Value> {
        execute_sync(&self.client, &self.provider, request, token).await
    }

    async fn stream_call(
        &self,
        request: OutboundRequest,
        token: &CancellationToken,
    ) -> AogResult<FrameStream> {
        execute_stream(&self.client, &self.provider, request, token).await
    }

    /// Minimal capability call in the provider's own dialect: hit the
    /// configured endpoint with its credentials and a short timeout. Network
    /// failures and 5xx count as unhealthy; anything the provider answers
    /// (including auth challenges for a HEAD-style probe) counts as alive.
    async fn health_probe(&self) -> AogResult<()> {
        let url = self.endpoint("").await?;
        let mut builder = self
            .client
            .get(probe_url(&url))
            .timeout(HEALTH_PROBE_TIMEOUT);
        for (name, value) in credential_headers(&self.provider)? {
            builder = builder.header(name, value);
        }
        let response = builder.send().await?;
        if response.status().is_server_error() {
            return Err(AogError::Upstream {
                status: response.status().as_u16(),
                message: "health probe failed".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Transport for LocalEngineTransport {
    async fn endpoint(&self, service: &str) -> AogResult<String> {
        let base = self.engines.endpoint(&self.provider.flavor).await.ok_or_else(|| {
            AogError::EngineUnavailable {
                flavor: self.provider.flavor.clone(),
                message: "engine is not running".to_string(),
            }
        })?;
        // A path-only provider URL overrides the per-service default.
        let path = if self.provider.url.starts_with('/') {
            self.provider.url.clone()
        } else if self.provider.url.is_empty() {
            default_engine_path(&self.provider.flavor, service).to_string()
        } else {
            return Ok(self.provider.url.clone());
        };
        Ok(format!("{base}{path}"))
    }

    async fn sync_call(
        &self,
        request: OutboundRequest,
        token: &CancellationToken,
    ) -> AogResult<Value> {
        self.ensure_accepting().await?;
        execute_sync(&self.client, &self.provider, request, token).await
    }

    async fn stream_call(
        &self,
        request: OutboundRequest,
        token: &CancellationToken,
    ) -> AogResult<FrameStream> {
        self.ensure_accepting().await?;
        execute_stream(&self.client, &self.provider, request, token).await
    }

    /// Lightweight liveness call on the engine's loopback port. The verdict
    /// also drives the engine's running↔unhealthy side-state.
    async fn health_probe(&self) -> AogResult<()> {
        let Some(base) = self.engines.endpoint(&self.provider.flavor).await else {
            return Err(AogError::EngineUnavailable {
                flavor: self.provider.flavor.clone(),
                message: "engine is not running".to_string(),
            });
        };
        let alive = self
            .client
            .get(base)
            .timeout(HEALTH_PROBE_TIMEOUT)
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false);
        self.engines.note_probe(&self.provider.flavor, alive);
        if !alive {
            return Err(AogError::EngineUnavailable {
                flavor: self.provider.flavor.clone(),
                message: "liveness probe failed".to_string(),
            });
        }
        Ok(())
    }
}

impl LocalEngineTransport {
    /// Engines clear `accept_requests` during upgrade; refuse early so the
    /// scheduler can fail over.
    async fn ensure_accepting(&self) -> AogResult<()> {
        if !self.engines.accepts_requests(&self.provider.flavor).await {
            return Err(AogError::EngineUnavailable {
                flavor: self.provider.flavor.clone(),
                message: "engine is not accepting requests".to_string(),
            });
        }
        Ok(())
    }
}

/// Default per-service admin paths of the known local engines.
fn default_engine_path(flavor: &str, service: &str) -> &'static str {
    match (flavor, service) {
        ("ollama", "chat") => "/api/chat",
        ("ollama", "generate") => "/api/generate",
        ("ollama", "embed") => "/api/embed",
        ("ollama", "models") => "/api/tags",
        ("openvino", "text-to-image") => "/v3/images/generations",
        ("openvino", "speech-to-text") => "/v3/audio/transcriptions",
        ("openvino", "text-to-speech") => "/v3/audio/speech",
        _ => "/",
    }
}

/// Probe target: the URL origin when parsable, the raw URL otherwise.
fn probe_url(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .host_str()
                .map(|host| match parsed.port() {
                    Some(port) => format!("{}://{host}:{port}/", parsed.scheme()),
                    None => format!("{}://{host}/", parsed.scheme()),
                })
        })
        .unwrap_or_else(|| url.to_string())
}

/// Credentials derived from `auth_type` + `auth_key`; never logged.
fn credential_headers(provider: &ServiceProvider) -> AogResult<Vec<(String, String)>> {
    match provider.auth_type {
        AuthType::None => Ok(Vec::new()),
        AuthType::Apikey => {
            if provider.auth_key.is_empty() {
                return Err(AogError::ProviderAuthMissing {
                    provider: provider.provider_name.clone(),
                });
            }
            Ok(vec![(
                "Authorization".to_string(),
                format!("Bearer {}", provider.auth_key),
            )])
        }
        AuthType::Token => {
            if provider.auth_key.is_empty() {
                return Err(AogError::ProviderAuthMissing {
                    provider: provider.provider_name.clone(),
                });
            }
            Ok(vec![("Authorization".to_string(), provider.auth_key.clone())])
        }
    }
}

fn build_request(
    client: &reqwest::Client,
    provider: &ServiceProvider,
    request: &OutboundRequest,
) -> AogResult<reqwest::RequestBuilder> {
    let method = Method::from_bytes(request.method.as_bytes())
        .map_err(|_| AogError::bad_request(format!("invalid method '{}'", request.method)))?;
    let url = url::Url::parse(&request.url).map_err(|_| AogError::ProviderUrlMalformed {
        url: request.url.clone(),
    })?;

    let mut builder = client.request(method, url);

    // Provider-level extra headers first, then the chain's ambient headers,
    // then credentials — later writers win.
    if !provider.extra_headers.is_empty() {
        match serde_json::from_str::<HashMap<String, String>>(&provider.extra_headers) {
            Ok(extra) => {
                for (name, value) in extra {
                    builder = builder.header(name, value);
                }
            }
            Err(error) => warn!(
                provider = %provider.provider_name,
                %error,
                "ignoring unparsable extra_headers"
            ),
        }
    }
    for (name, value) in &request.headers {
        builder = builder.header(name, value);
    }
    for (name, value) in credential_headers(provider)? {
        builder = builder.header(name, value);
    }

    if let Some(body) = &request.body {
        let body = merge_extra_body(provider, body.clone());
        builder = builder.json(&body);
    }
    Ok(builder)
}

/// Merge the provider's `extra_body` object into an object payload.
fn merge_extra_body(provider: &ServiceProvider, body: Value) -> Value {
    if provider.extra_body.is_empty() {
        return body;
    }
    let (Value::Object(mut base), Ok(Value::Object(extra))) = (
        body.clone(),
        serde_json::from_str::<Value>(&provider.extra_body),
    ) else {
        return body;
    };
    for (key, value) in extra {
        base.entry(key).or_insert(value);
    }
    Value::Object(base)
}

async fn execute_sync(
    client: &reqwest::Client,
    provider: &ServiceProvider,
    request: OutboundRequest,
    token: &CancellationToken,
) -> AogResult<Value> {
    let builder = build_request(client, provider, &request)?;
    let response = tokio::select! {
        _ = token.cancelled() => return Err(AogError::Cancelled),
        response = builder.send() => response?,
    };
    check_status(provider, &response)?;
    let value = tokio::select! {
        _ = token.cancelled() => return Err(AogError::Cancelled),
        value = response.json::<Value>() => value?,
    };
    Ok(value)
}

async fn execute_stream(
    client: &reqwest::Client,
    provider: &ServiceProvider,
    request: OutboundRequest,
    token: &CancellationToken,
) -> AogResult<FrameStream> {
    let builder = build_request(client, provider, &request)?;
    let response = tokio::select! {
        _ = token.cancelled() => return Err(AogError::Cancelled),
        response = builder.send() => response?,
    };
    check_status(provider, &response)?;
    debug!(provider = %provider.provider_name, "stream established");
    Ok(Box::pin(frame_stream(response, token.clone())))
}

fn check_status(provider: &ServiceProvider, response: &reqwest::Response) -> AogResult<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(AogError::ProviderAuthInvalid {
            provider: provider.provider_name.clone(),
        });
    }
    Err(AogError::Upstream {
        status: status.as_u16(),
        message: status
            .canonical_reason()
            .unwrap_or("upstream error")
            .to_string(),
    })
}

/// Decode a streamed body into value frames: one frame per line, handling
/// both SSE (`data: <json>`) and NDJSON bodies. Non-JSON payload lines come
/// through as string frames.
fn frame_stream(
    response: reqwest::Response,
    token: CancellationToken,
) -> impl Stream<Item = AogResult<Value>> + Send {
    async_stream::stream! {
        let mut body = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    yield Err(AogError::Cancelled);
                    return;
                }
                chunk = body.next() => match chunk {
                    Some(Ok(data)) => {
                        buffer.extend_from_slice(&data);
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            if let Some(frame) = parse_frame_line(&line) {
                                yield Ok(frame);
                            }
                        }
                    }
                    Some(Err(error)) => {
                        yield Err(AogError::from(error));
                        return;
                    }
                    None => {
                        let trailing = std::mem::take(&mut buffer);
                        if let Some(frame) = parse_frame_line(&trailing) {
                            yield Ok(frame);
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn parse_frame_line(line: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data:")
        .map(str::trim)
        .unwrap_or(trimmed);
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(data.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_lines_handle_sse_and_ndjson() {
        assert_eq!(
            parse_frame_line(b"data: {\"delta\": \"x\"}\n"),
            Some(json!({"delta": "x"}))
        );
        assert_eq!(parse_frame_line(b"{\"done\": true}\n"), Some(json!({"done": true})));
        assert_eq!(parse_frame_line(b"data: [DONE]\n"), Some(json!("[DONE]")));
        assert_eq!(parse_frame_line(b"\n"), None);
        assert_eq!(parse_frame_line(b": keep-alive\n"), None);
    }

    #[test]
    fn probe_url_reduces_to_origin() {
        assert_eq!(
            probe_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com/"
        );
        assert_eq!(
            probe_url("http://127.0.0.1:8000/v3/images"),
            "http://127.0.0.1:8000/"
        );
    }

    #[test]
    fn extra_body_never_overrides_payload_fields() {
        let mut provider = test_provider();
        provider.extra_body = r#"{"temperature": 0.2, "model": "override"}"#.to_string();
        let merged = merge_extra_body(&provider, json!({"model": "m"}));
        assert_eq!(merged, json!({"model": "m", "temperature": 0.2}));
    }

    #[test]
    fn credentials_require_a_key() {
        let mut provider = test_provider();
        provider.auth_type = AuthType::Apikey;
        provider.auth_key = String::new();
        assert!(matches!(
            credential_headers(&provider),
            Err(AogError::ProviderAuthMissing { .. })
        ));
        provider.auth_key = "k".into();
        let headers = credential_headers(&provider).unwrap();
        assert_eq!(headers[0].1, "Bearer k");
    }

    fn test_provider() -> ServiceProvider {
        use crate::models::{ProviderScope, ProviderStatus};
        ServiceProvider {
            provider_name: "p".into(),
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
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }
}
