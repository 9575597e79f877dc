//! Ollama-style engine admin adapter
//!
//! Model administration goes through the engine's HTTP admin API on its
//! loopback port: `/api/tags`, `/api/pull`, `/api/delete`, and warm-up
//! generate calls for load/unload.

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{MODEL_LOAD_TIMEOUT, MODEL_UNLOAD_TIMEOUT, ModelAdmin};
use crate::downloads::ProgressFrame;
use crate::errors::{AogError, AogResult};

pub struct OllamaAdmin {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaAdmin {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    /// Loading is a warm-up generate; unloading sets `keep_alive: 0`.
    async fn generate_control(
        &self,
        model: &str,
        keep_alive: Value,
        timeout: Duration,
        token: &CancellationToken,
    ) -> AogResult<()> {
        let body = json!({"model": model, "keep_alive": keep_alive});
        let request = self.client.post(self.url("/api/generate")).json(&body);
        let outcome = tokio::select! {
            _ = token.cancelled() => return Err(AogError::Cancelled),
            outcome = tokio::time::timeout(timeout, request.send()) => outcome,
        };
        let response = outcome
            .map_err(|_| AogError::ModelLoadTimeout {
                model: model.to_string(),
            })??;
        if !response.status().is_success() {
            return Err(AogError::Upstream {
                status: response.status().as_u16(),
                message: format!("generate control for '{model}' failed"),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ModelAdmin for OllamaAdmin {
    async fn list_models(&self) -> AogResult<Vec<String>> {
        let response = self.client.get(self.url("/api/tags")).send().await?;
        let body: Value = response.json().await?;
        let names = body["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }

    async fn load_model(
        &self,
        model: &str,
        _service: &str,
        token: &CancellationToken,
    ) -> AogResult<()> {
        debug!(model, "loading model into ollama");
        self.generate_control(model, json!("10m"), MODEL_LOAD_TIMEOUT, token)
            .await
    }

    async fn unload_model(&self, model: &str, token: &CancellationToken) -> AogResult<()> {
        debug!(model, "unloading model from ollama");
        self.generate_control(model, json!(0), MODEL_UNLOAD_TIMEOUT, token)
            .await
    }

    async fn delete_model(&self, model: &str) -> AogResult<()> {
        let response = self
            .client
            .delete(self.url("/api/delete"))
            .json(&json!({"model": model}))
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Err(AogError::ModelNotFound {
                model: model.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(AogError::Upstream {
                status: response.status().as_u16(),
                message: format!("delete of '{model}' failed"),
            });
        }
        Ok(())
    }

    /// Proxy the engine's own NDJSON pull progress as progress frames.
    async fn pull_model(
        &self,
        model: &str,
        token: &CancellationToken,
    ) -> AogResult<crate::downloads::ProgressStream> {
        let response = self
            .client
            .post(self.url("/api/pull"))
            .json(&json!({"model": model, "stream": true}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AogError::ModelPullFailed {
                message: format!("pull of '{model}' returned {}", response.status()),
            });
        }

        let token = token.clone();
        let stream = async_stream::stream! {
            let mut body = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        yield Ok(ProgressFrame::cancelled());
                        return;
                    }
                    chunk = body.next() => match chunk {
                        Some(Ok(data)) => {
                            buffer.extend_from_slice(&data);
                            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                                let line: Vec<u8> = buffer.drain(..=pos).collect();
                                let text = String::from_utf8_lossy(&line);
                                let trimmed = text.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                match serde_json::from_str::<ProgressFrame>(trimmed) {
                                    Ok(frame) => yield Ok(frame),
                                    Err(_) => yield Ok(ProgressFrame::status(trimmed)),
                                }
                            }
                        }
                        Some(Err(error)) => {
                            yield Err(AogError::from(error));
                            return;
                        }
                        None => return,
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
